// Candle-pattern entry signal, consumed by the controller as a collaborator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::SignalConfig;
use crate::core::redundancy::RedundancyGuard;
use crate::error::TradingResult;
use crate::exchange::ExchangeConnector;
use crate::types::{Candle, PriceTick, Side};

/// Decides the direction of the next entry. Returning `None` keeps the
/// controller idle.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn entry_side(&mut self, tick: &PriceTick) -> TradingResult<Option<Side>>;
}

/// Always enters in the configured direction.
pub struct FixedSide(pub Side);

#[async_trait]
impl SignalSource for FixedSide {
    async fn entry_side(&mut self, _tick: &PriceTick) -> TradingResult<Option<Side>> {
        Ok(Some(self.0))
    }
}

/// Recovery-candle pattern over recent klines. The expensive candle fetch is
/// gated by a redundancy guard so a burst of ticks inside one scheduling
/// interval evaluates the pattern once.
pub struct CandleRecovery<E: ExchangeConnector> {
    exchange: Arc<E>,
    config: SignalConfig,
    guard: RedundancyGuard,
    last_signal: Option<Side>,
}

impl<E: ExchangeConnector> CandleRecovery<E> {
    pub fn new(exchange: Arc<E>, config: SignalConfig) -> Self {
        Self {
            exchange,
            config,
            guard: RedundancyGuard::new(),
            last_signal: None,
        }
    }
}

#[async_trait]
impl<E: ExchangeConnector> SignalSource for CandleRecovery<E> {
    async fn entry_side(&mut self, tick: &PriceTick) -> TradingResult<Option<Side>> {
        if self.guard.should_fire(&tick.stamp()) {
            let candles = self
                .exchange
                .recent_candles(&self.config.time_frame, self.config.req_limit)
                .await?;
            self.last_signal = evaluate_recovery(&candles, self.config.condition_rate);
            debug!(signal = ?self.last_signal, "recomputed entry signal");
        }
        Ok(self.last_signal)
    }
}

/// The previous candle sets the direction; the current close must have
/// recovered at least `condition_rate` of the previous body beyond the
/// previous close without crossing the previous open. A red previous body
/// with such a recovery signals Long, a green one signals Short.
pub fn evaluate_recovery(candles: &[Candle], condition_rate: f64) -> Option<Side> {
    if candles.len() < 2 {
        return None;
    }
    let prev = &candles[candles.len() - 2];
    let current = &candles[candles.len() - 1];
    let body = prev.close - prev.open;

    if body < 0.0 {
        let floor = prev.close + body.abs() * condition_rate;
        if current.close >= floor && current.close <= prev.open {
            return Some(Side::Long);
        }
    } else if body > 0.0 {
        let ceiling = prev.close - body.abs() * condition_rate;
        if current.close <= ceiling && current.close >= prev.open {
            return Some(Side::Short);
        }
    }
    None
}
