// Fill/cancel event stream -> confirmation facts

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::facts::ConfirmationFacts;
use crate::error::TradingError;
use crate::types::{FillEvent, OrderStatus, OrderType, Side};

/// Side of the cycle in flight, written by the controller at entry and
/// cleared on cycle teardown. The reconciler only reads it, to validate
/// that an event belongs to the position it thinks it is confirming.
#[derive(Debug, Default)]
pub struct CycleSide {
    cell: Mutex<Option<Side>>,
}

impl CycleSide {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, side: Side) {
        *self.cell.lock().unwrap() = Some(side);
    }

    pub fn get(&self) -> Option<Side> {
        *self.cell.lock().unwrap()
    }

    pub fn clear(&self) {
        *self.cell.lock().unwrap() = None;
    }
}

/// Translates the raw execution event stream into `ConfirmationFacts`.
/// Write-only towards the facts; malformed or unrecognized events are logged
/// and dropped, never fatal.
pub struct EventReconciler {
    facts: Arc<ConfirmationFacts>,
    cycle_side: Arc<CycleSide>,
    /// (order id, status) pairs already applied. The venue redelivers events
    /// after stream reconnects; a duplicate must not re-create a fact the
    /// controller has already consumed.
    seen: Mutex<SeenEvents>,
}

/// Bounded dedup memory: insertion-ordered so that crossing the cap evicts
/// the oldest pairs one at a time, keeping recent events deduplicated.
#[derive(Debug, Default)]
struct SeenEvents {
    set: HashSet<(u64, OrderStatus)>,
    order: VecDeque<(u64, OrderStatus)>,
}

const SEEN_EVENTS_CAP: usize = 4096;

impl SeenEvents {
    /// False when the pair was already present.
    fn insert(&mut self, key: (u64, OrderStatus)) -> bool {
        if !self.set.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > SEEN_EVENTS_CAP {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

impl EventReconciler {
    pub fn new(facts: Arc<ConfirmationFacts>, cycle_side: Arc<CycleSide>) -> Self {
        Self {
            facts,
            cycle_side,
            seen: Mutex::new(SeenEvents::default()),
        }
    }

    /// Consume the event stream until it closes.
    pub async fn run(&self, mut events: mpsc::Receiver<FillEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply(&event) {
                warn!(order_id = event.order_id, tag = %event.client_tag, error = %e, "dropping event");
            }
        }
        debug!("fill event stream closed");
    }

    /// Classify one event by (order type, position side, client tag) and
    /// record the matching fact.
    pub fn apply(&self, event: &FillEvent) -> Result<(), TradingError> {
        let tag_kind = event
            .client_tag
            .split('-')
            .next()
            .unwrap_or(event.client_tag.as_str());

        // Events for the cycle's own side open or add to the position; the
        // exit is the only close. Anything off-side is someone else's order.
        if let Some(side) = self.cycle_side.get() {
            if event.position_side != side {
                return Err(TradingError::Reconciliation(format!(
                    "event side {:?} does not match cycle side {:?}",
                    event.position_side, side
                )));
            }
        }

        if !self.seen.lock().unwrap().insert((event.order_id, event.status)) {
            return Err(TradingError::Reconciliation(format!(
                "duplicate event for order {} ({:?})",
                event.order_id, event.status
            )));
        }

        match (event.order_type, event.status, tag_kind) {
            (OrderType::Limit, OrderStatus::Submitted, "scale") => {
                self.facts.record_scale_order(event.order_id);
            }
            (OrderType::Limit, OrderStatus::Filled, "scale") => {
                self.facts.record_scale_fill(event.avg_fill_price);
            }
            (OrderType::Limit, OrderStatus::Canceled, "scale") => {
                self.facts.record_scale_cancel(event.order_id);
            }
            (OrderType::Market, OrderStatus::Filled, "entry") => {
                self.facts.record_entry_fill(event.avg_fill_price);
            }
            (OrderType::Market, OrderStatus::Filled, "forced") => {
                self.facts.record_forced_fill(event.avg_fill_price);
            }
            (OrderType::Market, OrderStatus::Filled, "exit") => {
                self.facts.record_exit_fill();
            }
            // Acknowledgements of market orders carry no information the
            // controller waits for.
            (OrderType::Market, OrderStatus::Submitted, "entry" | "forced" | "exit") => {}
            _ => {
                return Err(TradingError::Reconciliation(format!(
                    "unclassifiable event: type {:?}, status {:?}, tag {}",
                    event.order_type, event.status, event.client_tag
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciler() -> (EventReconciler, Arc<ConfirmationFacts>, Arc<CycleSide>) {
        let facts = Arc::new(ConfirmationFacts::new());
        let side = Arc::new(CycleSide::new());
        side.set(Side::Short);
        (EventReconciler::new(facts.clone(), side.clone()), facts, side)
    }

    fn event(
        order_type: OrderType,
        status: OrderStatus,
        tag: &str,
        avg_fill_price: f64,
    ) -> FillEvent {
        FillEvent {
            order_type,
            position_side: Side::Short,
            status,
            order_id: 99,
            client_tag: tag.to_string(),
            avg_fill_price,
        }
    }

    #[test]
    fn test_entry_fill_records_price() {
        let (rec, facts, _) = reconciler();
        rec.apply(&event(OrderType::Market, OrderStatus::Filled, "entry-0", 20010.5))
            .unwrap();
        assert_eq!(facts.entry_fill_price(), Some(20010.5));
    }

    #[test]
    fn test_scale_lifecycle() {
        let (rec, facts, _) = reconciler();

        rec.apply(&event(OrderType::Limit, OrderStatus::Submitted, "scale-0", 0.0))
            .unwrap();
        assert_eq!(facts.scale_order_id(), Some(99));

        rec.apply(&event(OrderType::Limit, OrderStatus::Filled, "scale-0", 20800.0))
            .unwrap();
        assert_eq!(facts.scale_fill_price(), Some(20800.0));

        rec.apply(&event(OrderType::Limit, OrderStatus::Canceled, "scale-0", 0.0))
            .unwrap();
        assert_eq!(facts.scale_order_id(), None);
        assert_eq!(facts.take_scale_cancel(), Some(99));
    }

    #[test]
    fn test_forced_and_exit_fills() {
        let (rec, facts, _) = reconciler();
        rec.apply(&event(OrderType::Market, OrderStatus::Filled, "forced-3", 21000.0))
            .unwrap();
        let mut exit = event(OrderType::Market, OrderStatus::Filled, "exit-3", 20400.0);
        exit.order_id = 100;
        rec.apply(&exit).unwrap();
        assert_eq!(facts.forced_fill_price(), Some(21000.0));
        assert!(facts.exit_filled());
    }

    #[test]
    fn test_dedup_survives_crossing_the_memory_cap() {
        let (rec, _, _) = reconciler();
        for id in 0..=SEEN_EVENTS_CAP as u64 {
            let mut ev = event(OrderType::Market, OrderStatus::Filled, "entry-0", 1.0);
            ev.order_id = id;
            rec.apply(&ev).unwrap();
        }

        // The most recent event stays deduplicated even though the oldest
        // entry has been evicted to stay under the cap.
        let mut recent = event(OrderType::Market, OrderStatus::Filled, "entry-0", 1.0);
        recent.order_id = SEEN_EVENTS_CAP as u64;
        assert!(rec.apply(&recent).is_err());
    }

    #[test]
    fn test_redelivered_event_does_not_recreate_a_consumed_fact() {
        let (rec, facts, _) = reconciler();
        let fill = event(OrderType::Limit, OrderStatus::Filled, "scale-0", 20800.0);

        rec.apply(&fill).unwrap();
        assert_eq!(facts.take_scale_fill(), Some(20800.0));

        // Stream reconnects replay events; the duplicate must be dropped.
        assert!(rec.apply(&fill).is_err());
        assert_eq!(facts.scale_fill_price(), None);
    }

    #[test]
    fn test_unrecognized_event_is_an_error_without_side_effect() {
        let (rec, facts, _) = reconciler();
        let err = rec
            .apply(&event(OrderType::Limit, OrderStatus::Filled, "mystery", 1.0))
            .unwrap_err();
        assert!(matches!(err, TradingError::Reconciliation(_)));
        assert!(facts.is_clear());
    }

    #[test]
    fn test_off_side_event_is_dropped() {
        let (rec, facts, _) = reconciler();
        let mut ev = event(OrderType::Market, OrderStatus::Filled, "entry-0", 1.0);
        ev.position_side = Side::Long;
        assert!(rec.apply(&ev).is_err());
        assert!(facts.is_clear());
    }

    #[test]
    fn test_events_accepted_before_side_known() {
        let (rec, facts, side) = reconciler();
        side.clear();
        rec.apply(&event(OrderType::Market, OrderStatus::Filled, "entry-0", 5.0))
            .unwrap();
        assert_eq!(facts.entry_fill_price(), Some(5.0));
    }
}
