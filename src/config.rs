// Configuration management for the scaling bot

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbol: String,
    pub leverage: u32,
    pub margin_type: String,
    /// Per-stage growth rate applied to the running sum of planned quantities.
    pub growth_rate: f64,
    /// Adverse move, as a fraction of the average entry price, that prices the
    /// resting scale order and triggers the forced scale.
    pub scale_percent: f64,
    /// Fraction of the available balance the schedule may commit.
    pub safety_factor: f64,
    /// "long", "short" or "signal" (candle-pattern generator).
    pub entry_side: String,
    /// Upper bound, in milliseconds, of the in-tick wait for a confirmation fact.
    pub fact_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub rest_url: String,
    pub ws_url: String,
    /// Environment variable names holding the API credentials.
    pub api_key_env: String,
    pub api_secret_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub time_frame: String,
    pub req_limit: usize,
    /// Minimum recovery of the previous candle body, as a fraction of the
    /// body, required to emit a signal.
    pub condition_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub enable_status_logging: bool,
    pub enable_tick_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trading: TradingConfig,
    pub exchange: ExchangeConfig,
    pub signal: SignalConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading: TradingConfig {
                symbol: "BTCUSDT".to_string(),
                leverage: 15,
                margin_type: "ISOLATED".to_string(),
                growth_rate: 0.75,
                scale_percent: 0.04,
                safety_factor: 0.95,
                entry_side: "short".to_string(),
                fact_poll_ms: 250,
            },
            exchange: ExchangeConfig {
                rest_url: "https://fapi.binance.com".to_string(),
                ws_url: "wss://fstream.binance.com".to_string(),
                api_key_env: "BINANCE_API_KEY".to_string(),
                api_secret_env: "BINANCE_SECRET_KEY".to_string(),
            },
            signal: SignalConfig {
                time_frame: "1m".to_string(),
                req_limit: 100,
                condition_rate: 0.05,
            },
            logging: LoggingConfig {
                enable_status_logging: true,
                enable_tick_logging: false,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.symbol.is_empty() {
            return Err(ConfigError::Validation("symbol must not be empty".to_string()));
        }

        if self.trading.leverage == 0 {
            return Err(ConfigError::Validation("leverage must be greater than 0".to_string()));
        }

        if self.trading.growth_rate <= 0.0 {
            return Err(ConfigError::Validation("growth_rate must be positive".to_string()));
        }

        if self.trading.scale_percent <= 0.0 || self.trading.scale_percent >= 1.0 {
            return Err(ConfigError::Validation("scale_percent must be in (0, 1)".to_string()));
        }

        if self.trading.safety_factor <= 0.0 || self.trading.safety_factor > 1.0 {
            return Err(ConfigError::Validation("safety_factor must be in (0, 1]".to_string()));
        }

        if !matches!(self.trading.entry_side.as_str(), "long" | "short" | "signal") {
            return Err(ConfigError::Validation(
                "entry_side must be one of: long, short, signal".to_string(),
            ));
        }

        if self.trading.fact_poll_ms == 0 {
            return Err(ConfigError::Validation("fact_poll_ms must be greater than 0".to_string()));
        }

        if self.signal.req_limit < 2 {
            return Err(ConfigError::Validation("req_limit must be at least 2".to_string()));
        }

        if self.signal.condition_rate <= 0.0 {
            return Err(ConfigError::Validation("condition_rate must be positive".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
