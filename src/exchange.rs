// Narrow exchange-connectivity interface consumed by the controller

use async_trait::async_trait;

use crate::error::TradingResult;
use crate::types::{Candle, OrderRequest, Position};

/// Everything the controller needs from the venue. Transport failures map to
/// `TradingError::Connectivity` (retriable), venue rejections to
/// `TradingError::Rejected`.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Submit an order, returning the exchange-assigned order id.
    async fn submit_order(&self, request: &OrderRequest) -> TradingResult<u64>;

    async fn cancel_order(&self, order_id: u64) -> TradingResult<()>;

    /// Authoritative position for the configured symbol, `None` when flat.
    async fn query_position(&self) -> TradingResult<Option<Position>>;

    /// Available quote-asset balance.
    async fn query_balance(&self) -> TradingResult<f64>;

    /// Exchange minimum order quantity for the configured symbol.
    async fn min_order_qty(&self) -> TradingResult<f64>;

    /// Most recent candles for the given time frame, oldest first.
    async fn recent_candles(&self, time_frame: &str, limit: usize) -> TradingResult<Vec<Candle>>;

    async fn set_leverage(&self, leverage: u32) -> TradingResult<()>;

    async fn set_margin_type(&self, margin_type: &str) -> TradingResult<()>;
}
