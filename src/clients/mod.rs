//! Exchange-facing clients: signed REST and the WebSocket feeds.

pub mod binance_rest;
pub mod binance_ws;

pub use binance_rest::BinanceFuturesClient;
pub use binance_ws::{run_price_feed, run_user_stream, FeedState};
