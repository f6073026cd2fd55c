// Common types used across the application

use chrono::{DateTime, Utc};

/// Direction of the managed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Exchange order side that opens or adds to a position of this direction.
    pub fn open_order_side(self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// Exchange order side that closes a position of this direction.
    pub fn close_order_side(self) -> &'static str {
        match self {
            Side::Long => "SELL",
            Side::Short => "BUY",
        }
    }

    /// Price of the resting scale order: offset from the average entry price
    /// by `standard_price * scale_percent` in the adverse direction.
    pub fn scale_limit_price(self, avg_entry: f64, standard_price: f64, scale_percent: f64) -> f64 {
        match self {
            Side::Long => avg_entry - standard_price * scale_percent,
            Side::Short => avg_entry + standard_price * scale_percent,
        }
    }

    /// True once price has moved adversely by `scale_percent` of the average
    /// entry price.
    pub fn forced_trigger(self, avg_entry: f64, scale_percent: f64, price: f64) -> bool {
        match self {
            Side::Long => price <= avg_entry * (1.0 - scale_percent),
            Side::Short => price >= avg_entry * (1.0 + scale_percent),
        }
    }

    /// True once price has recovered past the exit arm price, i.e. moved in
    /// the favorable direction for this side.
    pub fn recovered(self, exit_arm_price: f64, price: f64) -> bool {
        match self {
            Side::Long => price >= exit_arm_price,
            Side::Short => price <= exit_arm_price,
        }
    }
}

/// Kinds of orders the controller submits. At most one order per kind may be
/// outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Entry,
    ScaleLimit,
    ScaleForced,
    Exit,
}

impl OrderKind {
    /// Client-tag prefix used to classify fill events back to their kind.
    pub fn tag(self) -> &'static str {
        match self {
            OrderKind::Entry => "entry",
            OrderKind::ScaleLimit => "scale",
            OrderKind::ScaleForced => "forced",
            OrderKind::Exit => "exit",
        }
    }
}

/// Wire-level order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Submitted,
    Filled,
    Canceled,
}

/// Order submission request handed to the exchange connector.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub kind: OrderKind,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub client_tag: String,
}

/// Controller-local record of an outstanding order of one kind.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub kind: OrderKind,
    pub order_id: u64,
    pub quantity: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
}

/// Exchange-reported position, refreshed only via explicit queries.
#[derive(Debug, Clone)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
}

/// One observation from the price/orderbook feed.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub time: DateTime<Utc>,
    pub last: f64,
    pub top_bid_size: f64,
    pub top_ask_size: f64,
}

impl PriceTick {
    /// Human-readable timestamp, also the input of the redundancy guard.
    pub fn stamp(&self) -> String {
        self.time.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// One event from the fill/cancel stream.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_type: OrderType,
    pub position_side: Side,
    pub status: OrderStatus,
    pub order_id: u64,
    pub client_tag: String,
    pub avg_fill_price: f64,
}

/// One kline from the candle endpoint, consumed by the signal generator.
#[derive(Debug, Clone)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_limit_price_is_adverse_side() {
        // Long averages down, short averages up.
        assert!(Side::Long.scale_limit_price(100.0, 100.0, 0.04) < 100.0);
        assert!(Side::Short.scale_limit_price(100.0, 100.0, 0.04) > 100.0);
    }

    #[test]
    fn test_forced_trigger_symmetry() {
        assert!(Side::Long.forced_trigger(100.0, 0.04, 96.0));
        assert!(!Side::Long.forced_trigger(100.0, 0.04, 97.0));
        assert!(Side::Short.forced_trigger(100.0, 0.04, 104.0));
        assert!(!Side::Short.forced_trigger(100.0, 0.04, 103.0));
    }

    #[test]
    fn test_recovery_direction_opposes_adverse() {
        // Long recovery is upwards, short recovery is downwards.
        assert!(Side::Long.recovered(98.0, 98.5));
        assert!(!Side::Long.recovered(98.0, 97.0));
        assert!(Side::Short.recovered(102.0, 101.5));
        assert!(!Side::Short.recovered(102.0, 103.0));
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(Side::Long.open_order_side(), "BUY");
        assert_eq!(Side::Long.close_order_side(), "SELL");
        assert_eq!(Side::Short.open_order_side(), "SELL");
        assert_eq!(Side::Short.close_order_side(), "BUY");
    }
}
