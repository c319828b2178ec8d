use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar for one minute bucket. `timestamp` is the bucket open in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
}

/// Long/short account ratio sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSample {
    pub timestamp: i64,
    pub long_ratio: f64,
    pub short_ratio: f64,
    pub long_short_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestSample {
    pub timestamp: i64,
    pub value: f64,
}

/// Anything that lives in a time-ordered rolling window.
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for Candle {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for RatioSample {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for OpenInterestSample {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single open exchange position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub unrealized_pnl_pct: f64,
}

impl Position {
    /// Side-signed price move from entry, in percent.
    pub fn pnl_pct_at(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0 * self.side.sign()
    }

    /// Quote-currency PnL if closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size * self.side.sign()
    }

    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl_pct = self.pnl_pct_at(price);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    OiRsiCondition,
    TrendReversal,
    /// Closed on the venue without an engine order, e.g. the preset stop filled
    External,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::OiRsiCondition => "oi_rsi_condition",
            ExitReason::TrendReversal => "trend_reversal",
            ExitReason::External => "external",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

/// Append-only trade journal row. Written once at entry (exit fields zeroed)
/// and once at exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: i64,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub leverage: u32,
    pub trade_type: OrderType,
    pub entry_type: String,
    pub exit_reason: Option<ExitReason>,
}

impl TradeRecord {
    pub const ENTRY_TYPE: &'static str = "trend_follow";

    pub fn entry(
        timestamp: i64,
        symbol: &str,
        side: Side,
        size: f64,
        entry_price: f64,
        leverage: u32,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            exit_price: 0.0,
            pnl: 0.0,
            pnl_pct: 0.0,
            leverage,
            trade_type: OrderType::Limit,
            entry_type: Self::ENTRY_TYPE.to_string(),
            exit_reason: None,
        }
    }

    pub fn exit(timestamp: i64, position: &Position, exit_price: f64, reason: ExitReason) -> Self {
        Self {
            timestamp,
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            exit_price,
            pnl: position.pnl_at(exit_price),
            pnl_pct: position.pnl_pct_at(exit_price),
            leverage: position.leverage,
            trade_type: OrderType::Market,
            entry_type: Self::ENTRY_TYPE.to_string(),
            exit_reason: Some(reason),
        }
    }
}

/// Snapshot of the derived market indicators, persisted after each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndicatorsRecord {
    pub timestamp: i64,
    pub open_interest: f64,
    pub long_ratio: f64,
    pub short_ratio: f64,
    pub long_short_ratio: f64,
    pub oi_slope: f64,
    pub ls_ratio_slope: f64,
    pub ls_ratio_acceleration: f64,
}

/// Event delivered to registered market observers.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Candle(Candle),
    Ratio(RatioSample),
    OpenInterest(OpenInterestSample),
}

impl MarketEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::Candle(_) => "candle",
            MarketEvent::Ratio(_) => "ratio",
            MarketEvent::OpenInterest(_) => "open_interest",
        }
    }
}
