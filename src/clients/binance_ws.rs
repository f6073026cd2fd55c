// WebSocket feeds: market ticks and the user-data execution stream

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::clients::binance_rest::BinanceFuturesClient;
use crate::error::TradingResult;
use crate::types::{FillEvent, OrderStatus, OrderType, PriceTick, Side};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

/// Latest partial market observations; a tick is emitted once a price update
/// arrives and both book sizes have been seen at least once.
#[derive(Debug, Default)]
pub struct FeedState {
    last: Option<f64>,
    top_bid_size: Option<f64>,
    top_ask_size: Option<f64>,
}

impl FeedState {
    /// Fold one combined-stream payload in. Returns a tick only for price
    /// updates, so the tick rate follows the ticker stream, not the book.
    pub fn apply(&mut self, payload: &Value) -> Option<PriceTick> {
        let stream = payload.get("stream")?.as_str()?;
        let data = payload.get("data")?;

        if stream.ends_with("@bookTicker") {
            self.top_bid_size = str_f64(data, "B").or(self.top_bid_size);
            self.top_ask_size = str_f64(data, "A").or(self.top_ask_size);
            return None;
        }
        if stream.ends_with("@ticker") {
            self.last = str_f64(data, "c").or(self.last);
            return Some(PriceTick {
                time: chrono::Utc::now(),
                last: self.last?,
                top_bid_size: self.top_bid_size?,
                top_ask_size: self.top_ask_size?,
            });
        }
        None
    }
}

/// Market data task: combined ticker + book-ticker stream, reconnecting on
/// failure until shutdown.
pub async fn run_price_feed(
    ws_url: &str,
    symbol: &str,
    ticks: mpsc::Sender<PriceTick>,
    mut shutdown: watch::Receiver<bool>,
) -> TradingResult<()> {
    let lower = symbol.to_lowercase();
    let url = format!(
        "{}/stream?streams={lower}@ticker/{lower}@bookTicker",
        ws_url.trim_end_matches('/')
    );

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        match connect_async(&url).await {
            Ok((stream, _)) => {
                info!(%url, "price feed connected");
                let (mut sink, mut source) = stream.split();
                let mut state = FeedState::default();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                        message = source.next() => {
                            let Some(Ok(message)) = message else {
                                warn!("price feed dropped");
                                break;
                            };
                            match message {
                                Message::Text(text) => {
                                    let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                                        continue;
                                    };
                                    if let Some(tick) = state.apply(&payload) {
                                        if ticks.send(tick).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                }
                                Message::Ping(data) => {
                                    let _ = sink.send(Message::Pong(data)).await;
                                }
                                Message::Close(_) => break,
                                _ => {}
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "price feed connect failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// User-data task: opens a listen key, consumes order updates and keeps the
/// key alive until shutdown. Reconnects with a fresh key on failure.
pub async fn run_user_stream(
    ws_url: &str,
    symbol: &str,
    rest: Arc<BinanceFuturesClient>,
    events: mpsc::Sender<FillEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> TradingResult<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        match connect_user_stream(ws_url, &rest).await {
            Ok(stream) => {
                info!("user stream connected");
                let (mut sink, mut source) = stream.split();
                let mut keepalive = tokio::time::interval(LISTEN_KEY_KEEPALIVE);
                keepalive.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                        _ = keepalive.tick() => {
                            if let Err(e) = rest.keepalive_listen_key().await {
                                warn!(error = %e, "listen key keepalive failed");
                                break;
                            }
                        }
                        message = source.next() => {
                            let Some(Ok(message)) = message else {
                                warn!("user stream dropped");
                                break;
                            };
                            match message {
                                Message::Text(text) => {
                                    let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                                        continue;
                                    };
                                    if let Some(event) = parse_order_update(&payload, symbol) {
                                        debug!(order_id = event.order_id, tag = %event.client_tag, "order update");
                                        if events.send(event).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                }
                                Message::Ping(data) => {
                                    let _ = sink.send(Message::Pong(data)).await;
                                }
                                Message::Close(_) => break,
                                _ => {}
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "user stream connect failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_user_stream(
    ws_url: &str,
    rest: &BinanceFuturesClient,
) -> TradingResult<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
> {
    let listen_key = rest.create_listen_key().await?;
    let url = format!("{}/ws/{listen_key}", ws_url.trim_end_matches('/'));
    let (stream, _) = connect_async(&url)
        .await
        .map_err(|e| crate::error::TradingError::Connectivity(e.to_string()))?;
    Ok(stream)
}

/// One ORDER_TRADE_UPDATE into a fill event. Updates for other symbols or
/// partial fills yield nothing.
pub fn parse_order_update(payload: &Value, symbol: &str) -> Option<FillEvent> {
    if payload.get("e")?.as_str()? != "ORDER_TRADE_UPDATE" {
        return None;
    }
    let order = payload.get("o")?;
    if order.get("s")?.as_str()? != symbol {
        return None;
    }

    let status = match order.get("X")?.as_str()? {
        "NEW" => OrderStatus::Submitted,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "EXPIRED" => OrderStatus::Canceled,
        // Partial fills are not facts; only the terminal fill counts.
        _ => return None,
    };
    let order_type = match order.get("o")?.as_str()? {
        "LIMIT" => OrderType::Limit,
        "MARKET" => OrderType::Market,
        _ => return None,
    };
    let client_tag = order.get("c")?.as_str()?.to_string();

    // One-way position mode reports "BOTH"; recover the position direction
    // from the order side and whether this order opens or closes.
    let buys = order.get("S")?.as_str()? == "BUY";
    let closes = client_tag.starts_with("exit");
    let position_side = match (buys, closes) {
        (true, false) | (false, true) => Side::Long,
        (false, false) | (true, true) => Side::Short,
    };

    Some(FillEvent {
        order_type,
        position_side,
        status,
        order_id: order.get("i")?.as_u64()?,
        client_tag,
        avg_fill_price: str_f64(order, "ap").unwrap_or(0.0),
    })
}

fn str_f64(data: &Value, key: &str) -> Option<f64> {
    match data.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
