// Signed REST client for Binance USDT-margined futures

use std::env;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::error::{TradingError, TradingResult};
use crate::types::{Candle, OrderRequest, OrderType, Position, Side};

const RECV_WINDOW_MS: u64 = 6000;

/// REST-side connector. Holds the credentials and the reqwest client; every
/// signed call rebuilds its query string with a fresh timestamp.
pub struct BinanceFuturesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    symbol: String,
}

impl BinanceFuturesClient {
    /// Credentials come from the environment, never from the config file.
    pub fn new(config: &ExchangeConfig, symbol: &str) -> TradingResult<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            TradingError::Config(format!("missing environment variable {}", config.api_key_env))
        })?;
        let api_secret = env::var(&config.api_secret_env).map_err(|_| {
            TradingError::Config(format!(
                "missing environment variable {}",
                config.api_secret_env
            ))
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            symbol: symbol.to_string(),
        })
    }

    fn sign(&self, query: &str) -> TradingResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| TradingError::Internal(format!("hmac key rejected: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_url(&self, path: &str, params: &str) -> TradingResult<String> {
        let timestamp = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={timestamp}&recvWindow={RECV_WINDOW_MS}")
        } else {
            format!("{params}&timestamp={timestamp}&recvWindow={RECV_WINDOW_MS}")
        };
        let signature = self.sign(&query)?;
        Ok(format!("{}{path}?{query}&signature={signature}", self.base_url))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> TradingResult<Value> {
        let response = request.header("X-MBX-APIKEY", &self.api_key).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_client_error() {
            return Err(TradingError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(TradingError::Connectivity(format!("{status}: {body}")));
        }
        serde_json::from_str(&body)
            .map_err(|e| TradingError::Connectivity(format!("malformed response body: {e}")))
    }

    async fn signed_get(&self, path: &str, params: &str) -> TradingResult<Value> {
        let url = self.signed_url(path, params)?;
        self.send(self.http.get(url)).await
    }

    async fn signed_post(&self, path: &str, params: &str) -> TradingResult<Value> {
        let url = self.signed_url(path, params)?;
        self.send(self.http.post(url)).await
    }

    async fn signed_delete(&self, path: &str, params: &str) -> TradingResult<Value> {
        let url = self.signed_url(path, params)?;
        self.send(self.http.delete(url)).await
    }

    async fn public_get(&self, path: &str, params: &str) -> TradingResult<Value> {
        let url = format!("{}{path}?{params}", self.base_url);
        self.send(self.http.get(url)).await
    }

    /// Open a user-data stream and return its listen key.
    pub async fn create_listen_key(&self) -> TradingResult<String> {
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let body = self.send(self.http.post(url)).await?;
        body.get("listenKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TradingError::Connectivity("listenKey missing from response".to_string()))
    }

    /// The listen key expires unless pinged; callers schedule this on a
    /// periodic timer.
    pub async fn keepalive_listen_key(&self) -> TradingResult<()> {
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        self.send(self.http.put(url)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::exchange::ExchangeConnector for BinanceFuturesClient {
    async fn submit_order(&self, request: &OrderRequest) -> TradingResult<u64> {
        let order_side = match request.kind {
            crate::types::OrderKind::Exit => request.side.close_order_side(),
            _ => request.side.open_order_side(),
        };
        let mut params = format!(
            "symbol={}&side={}&quantity={}&newClientOrderId={}",
            self.symbol, order_side, request.quantity, request.client_tag
        );
        match request.order_type {
            OrderType::Limit => {
                let price = request.price.ok_or_else(|| {
                    TradingError::Internal("limit order without a price".to_string())
                })?;
                params.push_str(&format!("&type=LIMIT&timeInForce=GTC&price={price}"));
            }
            OrderType::Market => params.push_str("&type=MARKET"),
        }
        if request.kind == crate::types::OrderKind::Exit {
            params.push_str("&reduceOnly=true");
        }

        let body = self.signed_post("/fapi/v1/order", &params).await?;
        let order_id = body
            .get("orderId")
            .and_then(Value::as_u64)
            .ok_or_else(|| TradingError::Rejected(format!("orderId missing: {body}")))?;
        debug!(order_id, tag = %request.client_tag, "order accepted");
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: u64) -> TradingResult<()> {
        let params = format!("symbol={}&orderId={order_id}", self.symbol);
        self.signed_delete("/fapi/v1/order", &params).await?;
        debug!(order_id, "order canceled");
        Ok(())
    }

    async fn query_position(&self) -> TradingResult<Option<Position>> {
        let params = format!("symbol={}", self.symbol);
        let body = self.signed_get("/fapi/v2/positionRisk", &params).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| TradingError::Connectivity("positionRisk is not a list".to_string()))?;
        Ok(rows.iter().find_map(parse_position_row))
    }

    async fn query_balance(&self) -> TradingResult<f64> {
        let body = self.signed_get("/fapi/v2/balance", "").await?;
        let rows = body
            .as_array()
            .ok_or_else(|| TradingError::Connectivity("balance is not a list".to_string()))?;
        rows.iter()
            .find(|row| row.get("asset").and_then(Value::as_str) == Some("USDT"))
            .and_then(|row| field_f64(row, "availableBalance"))
            .ok_or_else(|| TradingError::Connectivity("no USDT balance in response".to_string()))
    }

    async fn min_order_qty(&self) -> TradingResult<f64> {
        let params = format!("symbol={}", self.symbol);
        let body = self.public_get("/fapi/v1/exchangeInfo", &params).await?;
        parse_min_qty(&body, &self.symbol).ok_or_else(|| {
            TradingError::Connectivity(format!("no LOT_SIZE filter for {}", self.symbol))
        })
    }

    async fn recent_candles(&self, time_frame: &str, limit: usize) -> TradingResult<Vec<Candle>> {
        let params = format!("symbol={}&interval={time_frame}&limit={limit}", self.symbol);
        let body = self.public_get("/fapi/v1/klines", &params).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| TradingError::Connectivity("klines is not a list".to_string()))?;
        Ok(rows.iter().filter_map(parse_kline_row).collect())
    }

    async fn set_leverage(&self, leverage: u32) -> TradingResult<()> {
        let params = format!("symbol={}&leverage={leverage}", self.symbol);
        self.signed_post("/fapi/v1/leverage", &params).await?;
        Ok(())
    }

    async fn set_margin_type(&self, margin_type: &str) -> TradingResult<()> {
        let params = format!("symbol={}&marginType={margin_type}", self.symbol);
        match self.signed_post("/fapi/v1/marginType", &params).await {
            Ok(_) => Ok(()),
            // -4046: margin type already set, nothing to change.
            Err(TradingError::Rejected(body)) if body.contains("-4046") => {
                warn!("margin type already {margin_type}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn field_f64(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// A positionRisk row with a non-zero amount is the open position. The sign
/// of `positionAmt` carries the direction.
fn parse_position_row(row: &Value) -> Option<Position> {
    let amount = field_f64(row, "positionAmt")?;
    if amount == 0.0 {
        return None;
    }
    let side = if amount > 0.0 { Side::Long } else { Side::Short };
    Some(Position {
        side,
        entry_price: field_f64(row, "entryPrice")?,
        quantity: amount.abs(),
        leverage: field_f64(row, "leverage")? as u32,
    })
}

fn parse_min_qty(body: &Value, symbol: &str) -> Option<f64> {
    let symbols = body.get("symbols")?.as_array()?;
    let entry = symbols
        .iter()
        .find(|s| s.get("symbol").and_then(Value::as_str) == Some(symbol))?;
    let filters = entry.get("filters")?.as_array()?;
    let lot_size = filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some("LOT_SIZE"))?;
    field_f64(lot_size, "minQty")
}

/// Klines arrive as positional arrays of strings and numbers.
fn parse_kline_row(row: &Value) -> Option<Candle> {
    let fields = row.as_array()?;
    if fields.len() < 6 {
        return None;
    }
    let open_time_ms = fields[0].as_i64()?;
    let open_time = chrono::DateTime::from_timestamp_millis(open_time_ms)?;
    let scalar = |v: &Value| -> Option<f64> {
        match v {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };
    Some(Candle {
        open_time,
        open: scalar(&fields[1])?,
        high: scalar(&fields[2])?,
        low: scalar(&fields[3])?,
        close: scalar(&fields[4])?,
        volume: scalar(&fields[5])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_position_row_short() {
        let row = json!({
            "symbol": "BTCUSDT",
            "positionAmt": "-0.003",
            "entryPrice": "20100.5",
            "leverage": "15"
        });
        let position = parse_position_row(&row).unwrap();
        assert_eq!(position.side, Side::Short);
        assert_eq!(position.quantity, 0.003);
        assert_eq!(position.entry_price, 20100.5);
        assert_eq!(position.leverage, 15);
    }

    #[test]
    fn test_parse_position_row_flat_is_none() {
        let row = json!({
            "symbol": "BTCUSDT",
            "positionAmt": "0",
            "entryPrice": "0.0",
            "leverage": "15"
        });
        assert!(parse_position_row(&row).is_none());
    }

    #[test]
    fn test_parse_min_qty_from_lot_size_filter() {
        let body = json!({
            "symbols": [{
                "symbol": "BTCUSDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000"}
                ]
            }]
        });
        assert_eq!(parse_min_qty(&body, "BTCUSDT"), Some(0.001));
        assert_eq!(parse_min_qty(&body, "ETHUSDT"), None);
    }

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1680350400000_i64,
            "20000.1", "20100.0", "19900.0", "20050.5", "123.4",
            1680350459999_i64
        ]);
        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.open, 20000.1);
        assert_eq!(candle.close, 20050.5);
        assert_eq!(candle.volume, 123.4);
    }
}
