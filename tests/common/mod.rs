// Shared test fixtures

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use scale_trading_bot::{
    Candle, ExchangeConnector, OrderRequest, Position, PriceTick, TradingConfig, TradingError,
    TradingResult,
};

/// Trading config with small round numbers so schedules stay short and the
/// in-tick fact wait does not slow tests down.
pub fn test_trading_config() -> TradingConfig {
    TradingConfig {
        symbol: "BTCUSDT".to_string(),
        leverage: 1,
        margin_type: "ISOLATED".to_string(),
        growth_rate: 1.0,
        scale_percent: 0.04,
        safety_factor: 1.0,
        entry_side: "short".to_string(),
        fact_poll_ms: 10,
    }
}

pub fn make_tick(price: f64) -> PriceTick {
    PriceTick {
        time: Utc.with_ymd_and_hms(2023, 4, 1, 12, 0, 0).unwrap(),
        last: price,
        top_bid_size: 1.0,
        top_ask_size: 1.0,
    }
}

/// Scripted exchange double. Orders are recorded, never matched; tests push
/// position snapshots and confirmation facts by hand.
pub struct MockExchange {
    pub balance: Mutex<f64>,
    pub min_qty: f64,
    position: Mutex<Option<Position>>,
    candles: Mutex<Vec<Candle>>,
    submitted: Mutex<Vec<OrderRequest>>,
    canceled: Mutex<Vec<u64>>,
    next_order_id: AtomicU64,
    reject_submissions: AtomicBool,
}

impl MockExchange {
    pub fn new(balance: f64, min_qty: f64) -> Self {
        Self {
            balance: Mutex::new(balance),
            min_qty,
            position: Mutex::new(None),
            candles: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
            reject_submissions: AtomicBool::new(false),
        }
    }

    pub fn set_position(&self, position: Option<Position>) {
        *self.position.lock().unwrap() = position;
    }

    pub fn set_reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn last_submitted(&self) -> Option<OrderRequest> {
        self.submitted.lock().unwrap().last().cloned()
    }

    pub fn canceled(&self) -> Vec<u64> {
        self.canceled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeConnector for MockExchange {
    async fn submit_order(&self, request: &OrderRequest) -> TradingResult<u64> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(TradingError::Rejected("scripted rejection".to_string()));
        }
        self.submitted.lock().unwrap().push(request.clone());
        Ok(self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn cancel_order(&self, order_id: u64) -> TradingResult<()> {
        self.canceled.lock().unwrap().push(order_id);
        Ok(())
    }

    async fn query_position(&self) -> TradingResult<Option<Position>> {
        Ok(self.position.lock().unwrap().clone())
    }

    async fn query_balance(&self) -> TradingResult<f64> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn min_order_qty(&self) -> TradingResult<f64> {
        Ok(self.min_qty)
    }

    async fn recent_candles(&self, _time_frame: &str, _limit: usize) -> TradingResult<Vec<Candle>> {
        Ok(self.candles.lock().unwrap().clone())
    }

    async fn set_leverage(&self, _leverage: u32) -> TradingResult<()> {
        Ok(())
    }

    async fn set_margin_type(&self, _margin_type: &str) -> TradingResult<()> {
        Ok(())
    }
}
