// Confirmation facts shared between the reconciler and the controller

use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// The only cross-task shared mutable state.
///
/// Ownership discipline: the reconciler task is the sole writer of each fill
/// fact; the controller task is the sole reader and the only one permitted to
/// clear a fact back to absent after consuming it (`take_*`). The resting
/// scale-order id slot is the one exception: the reconciler both sets it on
/// acceptance and clears it on cancellation. Critical sections never hold the
/// lock across an await.
#[derive(Debug, Default)]
pub struct ConfirmationFacts {
    inner: Mutex<FactsInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct FactsInner {
    entry_fill_price: Option<f64>,
    scale_order_id: Option<u64>,
    scale_fill_price: Option<f64>,
    canceled_scale_order: Option<u64>,
    forced_fill_price: Option<f64>,
    exit_filled: bool,
}

impl ConfirmationFacts {
    pub fn new() -> Self {
        Self::default()
    }

    // Reconciler side: write-only.

    pub fn record_entry_fill(&self, avg_price: f64) {
        self.inner.lock().unwrap().entry_fill_price = Some(avg_price);
        self.notify.notify_waiters();
    }

    pub fn record_scale_order(&self, order_id: u64) {
        self.inner.lock().unwrap().scale_order_id = Some(order_id);
        self.notify.notify_waiters();
    }

    pub fn record_scale_fill(&self, avg_price: f64) {
        self.inner.lock().unwrap().scale_fill_price = Some(avg_price);
        self.notify.notify_waiters();
    }

    /// Cancellations name the order they confirm, so a late acknowledgement
    /// for an already-replaced resting order cannot be mistaken for the live
    /// one.
    pub fn record_scale_cancel(&self, order_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.scale_order_id == Some(order_id) {
            inner.scale_order_id = None;
        }
        inner.canceled_scale_order = Some(order_id);
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn record_forced_fill(&self, avg_price: f64) {
        self.inner.lock().unwrap().forced_fill_price = Some(avg_price);
        self.notify.notify_waiters();
    }

    pub fn record_exit_fill(&self) {
        self.inner.lock().unwrap().exit_filled = true;
        self.notify.notify_waiters();
    }

    // Controller side: non-clearing reads for sequencing decisions that may
    // still fail (e.g. a position query), followed by an atomic take once the
    // fact has been acted on.

    pub fn entry_fill_price(&self) -> Option<f64> {
        self.inner.lock().unwrap().entry_fill_price
    }

    pub fn scale_fill_price(&self) -> Option<f64> {
        self.inner.lock().unwrap().scale_fill_price
    }

    pub fn forced_fill_price(&self) -> Option<f64> {
        self.inner.lock().unwrap().forced_fill_price
    }

    pub fn exit_filled(&self) -> bool {
        self.inner.lock().unwrap().exit_filled
    }

    pub fn scale_order_id(&self) -> Option<u64> {
        self.inner.lock().unwrap().scale_order_id
    }

    // Controller side: atomic check-and-clear. A fact can be consumed at most
    // once; re-delivering an already-consumed fact yields None.

    pub fn take_entry_fill(&self) -> Option<f64> {
        self.inner.lock().unwrap().entry_fill_price.take()
    }

    pub fn take_scale_fill(&self) -> Option<f64> {
        self.inner.lock().unwrap().scale_fill_price.take()
    }

    pub fn take_scale_cancel(&self) -> Option<u64> {
        self.inner.lock().unwrap().canceled_scale_order.take()
    }

    pub fn take_forced_fill(&self) -> Option<f64> {
        self.inner.lock().unwrap().forced_fill_price.take()
    }

    pub fn take_exit_fill(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.exit_filled)
    }

    /// Cycle teardown: every fact back to absent.
    pub fn clear(&self) {
        *self.inner.lock().unwrap() = FactsInner::default();
    }

    pub fn is_clear(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.entry_fill_price.is_none()
            && inner.scale_order_id.is_none()
            && inner.scale_fill_price.is_none()
            && inner.canceled_scale_order.is_none()
            && inner.forced_fill_price.is_none()
            && !inner.exit_filled
    }

    /// Wait until any fact is written or the deadline passes. The wakeup is
    /// advisory: callers must re-check the fact they want, since a write can
    /// land between their last check and this wait.
    pub async fn wait_for_update(&self, deadline: Instant) -> bool {
        tokio::time::timeout_at(deadline, self.notify.notified())
            .await
            .is_ok()
    }
}
