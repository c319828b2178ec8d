use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/ratiobot.toml";

/// Top-level runtime settings.
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `RATIOBOT__SECTION__KEY` environment variables. Credentials may also come
/// from the plain `BITGET_*` variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeConfig,
    pub stream: StreamConfig,
    pub indicators: IndicatorConfig,
    pub strategy: StrategyConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    pub symbol: String,
    pub product_type: String,
    pub margin_coin: String,
    /// `crossed` or `isolated`
    pub margin_mode: String,
    /// Decimal places accepted for order and trigger prices
    pub price_decimals: u32,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bitget.com".to_string(),
            ws_url: "wss://ws.bitget.com/v2/ws/public".to_string(),
            api_key: String::new(),
            secret_key: String::new(),
            passphrase: String::new(),
            symbol: "BTCUSDT".to_string(),
            product_type: "USDT-FUTURES".to_string(),
            margin_coin: "USDT".to_string(),
            margin_mode: "crossed".to_string(),
            price_decimals: 1,
            request_timeout_ms: 5_000,
            max_retries: 3,
            retry_initial_delay_ms: 1_000,
            rate_limit_per_sec: 2,
            rate_limit_burst: 10,
        }
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub channel: String,
    pub ping_interval_secs: u64,
    pub subscribe_timeout_secs: u64,
    pub reconnect_initial_secs: u64,
    pub reconnect_max_secs: u64,
    pub close_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel: "candle1m".to_string(),
            ping_interval_secs: 30,
            subscribe_timeout_secs: 10,
            reconnect_initial_secs: 1,
            reconnect_max_secs: 60,
            close_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub candle_capacity: usize,
    pub oi_capacity: usize,
    pub ratio_capacity: usize,
    /// Relative change a new OI/ratio sample needs before it is admitted.
    pub change_threshold: f64,
    /// Aggregation period passed to the long/short ratio endpoint.
    pub ratio_period: String,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            candle_capacity: 200,
            oi_capacity: 50,
            ratio_capacity: 3,
            change_threshold: 0.00001,
            ratio_period: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub leverage: u32,
    pub max_leverage: u32,
    pub min_leverage: u32,
    pub position_size_pct: f64,
    pub stop_loss_pct: f64,
    pub min_slope: f64,
    pub acceleration_threshold: f64,
    pub min_trade_interval_secs: u64,
    pub base_volatility: f64,
    pub evaluation_interval_ms: u64,
    pub oi_refresh_secs: u64,
    pub ratio_refresh_secs: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            leverage: 10,
            max_leverage: 20,
            min_leverage: 5,
            position_size_pct: 95.0,
            stop_loss_pct: 10.0,
            min_slope: 0.0001,
            acceleration_threshold: 0.0001,
            min_trade_interval_secs: 120,
            base_volatility: 100.0,
            evaluation_interval_ms: 1_000,
            oi_refresh_secs: 60,
            ratio_refresh_secs: 60,
        }
    }
}

impl StrategyConfig {
    pub fn min_trade_interval(&self) -> Duration {
        Duration::from_secs(self.min_trade_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Redis URL. Without one the bot keeps history in memory only.
    pub redis_url: Option<String>,
}

impl Settings {
    /// Load settings from the given file (optional) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let raw = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RATIOBOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("exchange.api_key", std::env::var("BITGET_API_KEY").ok())?
            .set_override_option(
                "exchange.secret_key",
                std::env::var("BITGET_SECRET_KEY").ok(),
            )?
            .set_override_option(
                "exchange.passphrase",
                std::env::var("BITGET_PASSPHRASE").ok(),
            )?
            .build()?;

        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.api_key.is_empty() {
            return Err(ConfigError::MissingCredential("BITGET_API_KEY"));
        }
        if self.exchange.secret_key.is_empty() {
            return Err(ConfigError::MissingCredential("BITGET_SECRET_KEY"));
        }
        if self.exchange.passphrase.is_empty() {
            return Err(ConfigError::MissingCredential("BITGET_PASSPHRASE"));
        }
        if self.exchange.rate_limit_per_sec == 0 || self.exchange.rate_limit_burst == 0 {
            return Err(ConfigError::Invalid {
                key: "exchange.rate_limit_per_sec",
                reason: "rate and burst must be positive".to_string(),
            });
        }
        if self.strategy.min_leverage == 0 || self.strategy.min_leverage > self.strategy.max_leverage
        {
            return Err(ConfigError::Invalid {
                key: "strategy.min_leverage",
                reason: format!(
                    "must be in 1..={} (got {})",
                    self.strategy.max_leverage, self.strategy.min_leverage
                ),
            });
        }
        if self.indicators.ratio_capacity < 3 {
            return Err(ConfigError::Invalid {
                key: "indicators.ratio_capacity",
                reason: "acceleration needs at least 3 samples".to_string(),
            });
        }
        Ok(())
    }
}
