// Staged position scaling state machine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TradingConfig;
use crate::core::facts::ConfirmationFacts;
use crate::core::planner::{build_stage_schedule, StageSchedule};
use crate::core::reconciler::CycleSide;
use crate::core::redundancy::RedundancyGuard;
use crate::core::signal::SignalSource;
use crate::error::{TradingError, TradingResult};
use crate::exchange::ExchangeConnector;
use crate::types::{OrderKind, OrderStatus, OrderType, PendingOrder, Position, PriceTick, Side};

/// One variant per phase of the entry -> scale -> exit round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Flat, waiting for an entry signal.
    Idle,
    /// Entry order submitted, waiting for its fill fact.
    Entering,
    /// Resting scale order out, watching the forced-scale trigger.
    Scaling,
    /// Forced scale order submitted, waiting for its fill fact.
    Forcing,
    /// Schedule exhausted, watching for price recovery.
    ExitArmed,
    /// Exit order submitted, waiting for its fill fact.
    ExitPending,
}

/// Drives one evaluation per price tick, placing orders through the exchange
/// connector and advancing on confirmation facts written by the reconciler.
/// All per-cycle state lives here; nothing is shared except the facts and the
/// cycle-side cell.
pub struct ScalingController<E: ExchangeConnector> {
    exchange: Arc<E>,
    facts: Arc<ConfirmationFacts>,
    cycle_side: Arc<CycleSide>,
    signal: Box<dyn SignalSource>,
    config: TradingConfig,

    state: ControllerState,
    schedule: Option<StageSchedule>,
    position: Option<Position>,
    side: Option<Side>,
    /// Entry fill price, the fixed reference for resting scale prices.
    standard_price: Option<f64>,
    exit_arm_price: Option<f64>,
    pending: HashMap<OrderKind, PendingOrder>,
    cycle: u64,
    min_qty: f64,

    status_guard: RedundancyGuard,
    status_logging: bool,
    tick_logging: bool,
    fact_wait: Duration,
}

impl<E: ExchangeConnector> ScalingController<E> {
    pub fn new(
        exchange: Arc<E>,
        facts: Arc<ConfirmationFacts>,
        cycle_side: Arc<CycleSide>,
        signal: Box<dyn SignalSource>,
        config: TradingConfig,
    ) -> Self {
        let fact_wait = Duration::from_millis(config.fact_poll_ms);
        Self {
            exchange,
            facts,
            cycle_side,
            signal,
            config,
            state: ControllerState::Idle,
            schedule: None,
            position: None,
            side: None,
            standard_price: None,
            exit_arm_price: None,
            pending: HashMap::new(),
            cycle: 0,
            min_qty: 0.0,
            status_guard: RedundancyGuard::new(),
            status_logging: true,
            tick_logging: false,
            fact_wait,
        }
    }

    pub fn with_status_logging(mut self, enable: bool) -> Self {
        self.status_logging = enable;
        self
    }

    pub fn with_tick_logging(mut self, enable: bool) -> Self {
        self.tick_logging = enable;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn schedule(&self) -> Option<&StageSchedule> {
        self.schedule.as_ref()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn exit_arm_price(&self) -> Option<f64> {
        self.exit_arm_price
    }

    pub fn pending_order(&self, kind: OrderKind) -> Option<&PendingOrder> {
        self.pending.get(&kind)
    }

    /// Startup preflight: leverage, margin type, position, balance and the
    /// exchange minimum order quantity. Any failure is fatal; the controller
    /// must not run.
    pub async fn initialize(&mut self) -> TradingResult<()> {
        let fatal = |e: TradingError| TradingError::Initialization(e.to_string());

        let position = self.exchange.query_position().await.map_err(fatal)?;
        if position.is_some() {
            return Err(TradingError::Initialization(
                "an open position already exists; close it before starting".to_string(),
            ));
        }
        self.exchange
            .set_leverage(self.config.leverage)
            .await
            .map_err(fatal)?;
        self.exchange
            .set_margin_type(&self.config.margin_type)
            .await
            .map_err(fatal)?;

        self.min_qty = self.exchange.min_order_qty().await.map_err(fatal)?;
        if self.min_qty <= 0.0 {
            return Err(TradingError::Initialization(
                "exchange reported a non-positive minimum order quantity".to_string(),
            ));
        }

        let balance = self.exchange.query_balance().await.map_err(fatal)?;
        if balance <= 0.0 {
            return Err(TradingError::Initialization("no available balance".to_string()));
        }

        info!(min_qty = self.min_qty, balance, "preflight complete");
        Ok(())
    }

    /// Long-running entry point: one evaluation per price tick until the feed
    /// closes or shutdown is signalled. A failed tick is logged and treated
    /// as a no-op; the next tick retries.
    pub async fn run(
        &mut self,
        mut ticks: mpsc::Receiver<PriceTick>,
        mut shutdown: watch::Receiver<bool>,
    ) -> TradingResult<()> {
        info!(symbol = %self.config.symbol, "controller running");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
                tick = ticks.recv() => {
                    let Some(tick) = tick else {
                        warn!("price feed closed");
                        break;
                    };
                    if self.tick_logging {
                        debug!(price = tick.last, bid_size = tick.top_bid_size, ask_size = tick.top_ask_size, "tick");
                    }
                    if let Err(e) = self.on_tick(&tick).await {
                        error!(state = ?self.state, error = %e, "evaluation tick failed");
                    }
                    self.log_status(&tick);
                }
            }
        }
        Ok(())
    }

    /// One evaluation step.
    pub async fn on_tick(&mut self, tick: &PriceTick) -> TradingResult<()> {
        match self.state {
            ControllerState::Idle => self.evaluate_idle(tick).await,
            ControllerState::Entering => self.evaluate_entering().await,
            ControllerState::Scaling => self.evaluate_scaling(tick).await,
            ControllerState::Forcing => self.evaluate_forcing().await,
            ControllerState::ExitArmed => self.evaluate_exit_armed(tick).await,
            ControllerState::ExitPending => self.evaluate_exit_pending().await,
        }
    }

    async fn evaluate_idle(&mut self, tick: &PriceTick) -> TradingResult<()> {
        let Some(side) = self.signal.entry_side(tick).await? else {
            return Ok(());
        };

        let balance = self.exchange.query_balance().await?;
        let schedule = build_stage_schedule(
            balance,
            tick.last,
            self.config.leverage,
            self.config.growth_rate,
            self.min_qty,
            self.config.safety_factor,
        );
        let Some(entry_qty) = schedule.peek() else {
            warn!(balance, price = tick.last, "balance cannot cover a minimum-sized entry");
            return Ok(());
        };

        self.cycle_side.set(side);
        self.submit(OrderKind::Entry, side, OrderType::Market, entry_qty, None)
            .await?;
        info!(
            cycle = self.cycle,
            ?side,
            stage_max = schedule.stage_max(),
            qty = entry_qty,
            "entry submitted"
        );
        self.schedule = Some(schedule);
        self.side = Some(side);
        self.state = ControllerState::Entering;
        Ok(())
    }

    async fn evaluate_entering(&mut self) -> TradingResult<()> {
        let Some(fill_price) = self.fact_or_wait(|f| f.entry_fill_price()).await else {
            return Ok(());
        };
        // Refresh the position before consuming the fact, so a failed query
        // leaves the fact in place for the next tick.
        let position = self.exchange.query_position().await?;
        let Some(position) = position else {
            debug!("entry fill seen but position query still flat; retrying");
            return Ok(());
        };

        self.facts.take_entry_fill();
        self.pending.remove(&OrderKind::Entry);
        self.standard_price = Some(fill_price);
        info!(
            fill_price,
            avg_entry = position.entry_price,
            qty = position.quantity,
            "entry confirmed"
        );
        self.position = Some(position);
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.consume();
        }
        self.state = ControllerState::Scaling;
        Ok(())
    }

    async fn evaluate_scaling(&mut self, tick: &PriceTick) -> TradingResult<()> {
        let side = self
            .side
            .ok_or_else(|| TradingError::Internal("scaling without a side".to_string()))?;
        let scale_percent = self.config.scale_percent;

        // A cancel fact only retires the pending order it names. The venue's
        // acknowledgement of a cancel we requested on the forced path can
        // arrive after that order was already replaced; such a stale ack must
        // not touch the live resting order.
        if let Some(canceled_id) = self.facts.take_scale_cancel() {
            let live = self
                .pending
                .get(&OrderKind::ScaleLimit)
                .map(|p| p.order_id);
            if live == Some(canceled_id) {
                self.pending.remove(&OrderKind::ScaleLimit);
                warn!(order_id = canceled_id, "resting scale order canceled externally; will resubmit");
            } else {
                debug!(order_id = canceled_id, "stale cancel acknowledgement ignored");
            }
        }

        // The resting fill and the forced trigger race; first fact wins, and
        // the atomic take below means the stage cannot be retired twice.
        if self.facts.scale_fill_price().is_some() {
            let position = self.exchange.query_position().await?.ok_or_else(|| {
                TradingError::Internal("position flat after a scale fill".to_string())
            })?;
            let Some(fill_price) = self.facts.take_scale_fill() else {
                return Ok(());
            };
            self.pending.remove(&OrderKind::ScaleLimit);
            self.advance_stage(position, fill_price)?;
            return Ok(());
        }

        let avg_entry = self
            .position
            .as_ref()
            .map(|p| p.entry_price)
            .ok_or_else(|| TradingError::Internal("scaling without a position".to_string()))?;

        if side.forced_trigger(avg_entry, scale_percent, tick.last) {
            if let Some(resting) = self.pending.get(&OrderKind::ScaleLimit) {
                self.exchange.cancel_order(resting.order_id).await?;
            }
            self.pending.remove(&OrderKind::ScaleLimit);

            let qty = self
                .schedule
                .as_ref()
                .and_then(|s| s.peek())
                .ok_or_else(|| TradingError::Internal("no stage left to force".to_string()))?;
            self.submit(OrderKind::ScaleForced, side, OrderType::Market, qty, None)
                .await?;
            info!(price = tick.last, qty, "forced scale submitted");
            self.state = ControllerState::Forcing;
            return Ok(());
        }

        if !self.pending.contains_key(&OrderKind::ScaleLimit) {
            let standard_price = self.standard_price.ok_or_else(|| {
                TradingError::Internal("scaling without an entry reference price".to_string())
            })?;
            let qty = self
                .schedule
                .as_ref()
                .and_then(|s| s.peek())
                .ok_or_else(|| TradingError::Internal("no stage left to rest".to_string()))?;
            let price = side.scale_limit_price(avg_entry, standard_price, scale_percent);
            self.submit(OrderKind::ScaleLimit, side, OrderType::Limit, qty, Some(price))
                .await?;
            debug!(price, qty, "resting scale order submitted");
        }
        Ok(())
    }

    async fn evaluate_forcing(&mut self) -> TradingResult<()> {
        // Ack of our own cancellation, no further action required.
        let _ = self.facts.take_scale_cancel();

        // The resting order can fill before the cancellation lands at the
        // venue. That fill is real: retire its stage, then keep waiting for
        // the forced fill.
        if self.facts.scale_fill_price().is_some() {
            let position = self.exchange.query_position().await?.ok_or_else(|| {
                TradingError::Internal("position flat after a scale fill".to_string())
            })?;
            if let Some(fill_price) = self.facts.take_scale_fill() {
                warn!("resting scale order filled before cancellation; retiring its stage");
                self.pending.remove(&OrderKind::ScaleLimit);
                self.advance_stage(position, fill_price)?;
                if self.state == ControllerState::Scaling {
                    self.state = ControllerState::Forcing;
                }
            }
        }

        if self.fact_or_wait(|f| f.forced_fill_price()).await.is_none() {
            return Ok(());
        }
        let position = self.exchange.query_position().await?.ok_or_else(|| {
            TradingError::Internal("position flat after a forced fill".to_string())
        })?;
        let Some(fill_price) = self.facts.take_forced_fill() else {
            return Ok(());
        };
        self.pending.remove(&OrderKind::ScaleForced);

        if self.schedule.as_ref().map_or(true, |s| s.is_exhausted()) {
            // The raced resting fill above already spent the schedule; fold
            // the forced fill into the position and arm the exit from it.
            warn!("forced fill arrived after the schedule was spent");
            let avg_entry = position.entry_price;
            self.position = Some(position);
            let arm = midpoint(avg_entry, fill_price);
            self.exit_arm_price = Some(arm);
            self.state = ControllerState::ExitArmed;
            return Ok(());
        }

        self.advance_stage(position, fill_price)?;
        Ok(())
    }

    async fn evaluate_exit_armed(&mut self, tick: &PriceTick) -> TradingResult<()> {
        let side = self
            .side
            .ok_or_else(|| TradingError::Internal("exit armed without a side".to_string()))?;
        // A forced fill can land after a raced resting fill already spent the
        // schedule; fold it into the position and re-arm from it.
        if self.facts.forced_fill_price().is_some() {
            let position = self.exchange.query_position().await?.ok_or_else(|| {
                TradingError::Internal("position flat after a forced fill".to_string())
            })?;
            if let Some(fill_price) = self.facts.take_forced_fill() {
                warn!("late forced fill while exit armed; re-arming");
                self.pending.remove(&OrderKind::ScaleForced);
                let arm = midpoint(position.entry_price, fill_price);
                self.position = Some(position);
                self.exit_arm_price = Some(arm);
            }
        }

        let arm = self
            .exit_arm_price
            .ok_or_else(|| TradingError::Internal("exit armed without an arm price".to_string()))?;

        if !side.recovered(arm, tick.last) {
            return Ok(());
        }

        let qty = self
            .position
            .as_ref()
            .map(|p| p.quantity)
            .ok_or_else(|| TradingError::Internal("exit armed without a position".to_string()))?;
        self.submit(OrderKind::Exit, side, OrderType::Market, qty, None)
            .await?;
        info!(price = tick.last, qty, "exit submitted");
        self.state = ControllerState::ExitPending;
        Ok(())
    }

    async fn evaluate_exit_pending(&mut self) -> TradingResult<()> {
        let filled = self
            .fact_or_wait(|f| if f.exit_filled() { Some(()) } else { None })
            .await
            .is_some();
        if !filled {
            return Ok(());
        }
        self.facts.take_exit_fill();
        self.reset_cycle();
        Ok(())
    }

    /// Retire one stage against a refreshed position. Transitions to
    /// `ExitArmed` when the schedule is spent, arming the exit at the
    /// midpoint of the averaged entry and the retiring fill.
    fn advance_stage(&mut self, position: Position, fill_price: f64) -> TradingResult<()> {
        let schedule = self
            .schedule
            .as_mut()
            .ok_or_else(|| TradingError::Internal("stage advance without a schedule".to_string()))?;
        schedule.consume().ok_or_else(|| {
            TradingError::Internal("stage advance past the end of the schedule".to_string())
        })?;
        let exhausted = schedule.is_exhausted();
        let stage = schedule.stage();
        let stage_max = schedule.stage_max();

        let avg_entry = position.entry_price;
        self.position = Some(position);

        if exhausted {
            let arm = midpoint(avg_entry, fill_price);
            self.exit_arm_price = Some(arm);
            self.state = ControllerState::ExitArmed;
            info!(stage, stage_max, avg_entry, fill_price, exit_arm_price = arm, "schedule spent, exit armed");
        } else {
            self.state = ControllerState::Scaling;
            info!(stage, stage_max, avg_entry, fill_price, "stage retired");
        }
        Ok(())
    }

    fn reset_cycle(&mut self) {
        self.facts.clear();
        self.cycle_side.clear();
        self.schedule = None;
        self.position = None;
        self.side = None;
        self.standard_price = None;
        self.exit_arm_price = None;
        self.pending.clear();
        self.cycle += 1;
        self.state = ControllerState::Idle;
        info!(cycle = self.cycle, "cycle complete");
    }

    /// Submit an order of one kind, enforcing the one-outstanding-per-kind
    /// rule, and record it in the pending table.
    async fn submit(
        &mut self,
        kind: OrderKind,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> TradingResult<u64> {
        if matches!(self.pending.get(&kind), Some(p) if p.status == OrderStatus::Submitted) {
            return Err(TradingError::Internal(format!(
                "an order of kind {:?} is already outstanding",
                kind
            )));
        }
        let client_tag = format!("{}-{}", kind.tag(), self.cycle);
        let request = crate::types::OrderRequest {
            kind,
            side,
            order_type,
            quantity,
            price,
            client_tag,
        };
        let order_id = self.exchange.submit_order(&request).await?;
        self.pending.insert(
            kind,
            PendingOrder {
                kind,
                order_id,
                quantity,
                price,
                status: OrderStatus::Submitted,
            },
        );
        Ok(order_id)
    }

    /// Non-blocking fact check, falling back to one bounded wait on the facts
    /// notifier so confirmations are not quantized to the tick interval.
    async fn fact_or_wait<T>(&self, read: impl Fn(&ConfirmationFacts) -> Option<T>) -> Option<T> {
        if let Some(value) = read(&self.facts) {
            return Some(value);
        }
        let deadline = Instant::now() + self.fact_wait;
        self.facts.wait_for_update(deadline).await;
        read(&self.facts)
    }

    fn log_status(&mut self, tick: &PriceTick) {
        if !self.status_logging || !self.status_guard.should_fire(&tick.stamp()) {
            return;
        }
        let (stage, stage_max) = self
            .schedule
            .as_ref()
            .map(|s| (s.stage(), s.stage_max()))
            .unwrap_or((0, 0));
        match &self.position {
            Some(p) => info!(
                cycle = self.cycle,
                state = ?self.state,
                stage,
                stage_max,
                price = tick.last,
                avg_entry = p.entry_price,
                qty = p.quantity,
                "status"
            ),
            None => info!(
                cycle = self.cycle,
                state = ?self.state,
                stage,
                stage_max,
                price = tick.last,
                "status"
            ),
        }
    }
}

fn midpoint(a: f64, b: f64) -> f64 {
    (a + b) / 2.0
}
