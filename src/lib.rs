// Staged Position Scaling Bot Library
//
// A single-instrument leveraged futures bot that opens a position, scales it
// on adverse moves along a precomputed stage schedule and exits on recovery

pub mod clients;
pub mod config;
pub mod core;
pub mod error;
pub mod exchange;
pub mod types;

// Re-export core components
pub use core::{
    build_stage_schedule, CandleRecovery, ConfirmationFacts, ControllerState, CycleSide,
    EventReconciler, FixedSide, RedundancyGuard, ScalingController, SignalSource, StageSchedule,
};

// Re-export error types
pub use error::{TradingError, TradingResult};

// Re-export client types
pub use clients::BinanceFuturesClient;

// Re-export configuration
pub use config::{Config, ConfigError, ExchangeConfig, LoggingConfig, SignalConfig, TradingConfig};

// Re-export the exchange seam and domain types
pub use exchange::ExchangeConnector;
pub use types::{
    Candle, FillEvent, OrderKind, OrderRequest, OrderStatus, OrderType, PendingOrder, Position,
    PriceTick, Side,
};
