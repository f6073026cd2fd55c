// Unified error handling for the scaling bot

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradingError {
    /// Transport-level failure talking to the exchange. Retriable.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The venue rejected an order. Not retriable without re-planning;
    /// the controller stays in its current state and re-attempts on the
    /// next evaluation tick.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// An execution event could not be classified. Logged and dropped by
    /// the reconciler, never propagated.
    #[error("unrecognized execution event: {0}")]
    Reconciliation(String),

    /// Startup preflight (leverage, margin type, position, balance,
    /// minimum order quantity) failed. Fatal: the controller must not start.
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TradingError {
    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradingError::Connectivity(_))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(e: reqwest::Error) -> Self {
        TradingError::Connectivity(e.to_string())
    }
}

pub type TradingResult<T> = Result<T, TradingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_retryable() {
        assert!(TradingError::Connectivity("timeout".into()).is_retryable());
        assert!(!TradingError::Rejected("margin".into()).is_retryable());
        assert!(!TradingError::Initialization("leverage".into()).is_retryable());
    }
}
