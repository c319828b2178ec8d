use crate::config::StrategyConfig;
use crate::indicators::open_interest::{OVERBOUGHT, OVERSOLD};
use crate::indicators::{IndicatorSnapshot, MarketIndicators};
use crate::models::{ExitReason, Position, Side};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// OI-RSI at or above which a short is closed.
pub const SHORT_EXIT_OI_RSI: f64 = 80.0;

/// Breakdown of one entry evaluation, kept for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCheck {
    pub side: Side,
    pub price: f64,
    pub ema200: f64,
    pub price_change: f64,
    pub ls_ratio_slope: f64,
    pub ls_ratio_acceleration: f64,
    pub oi_rsi: f64,
    pub ratio_trending: bool,
    pub price_vs_ema: bool,
    pub price_moving: bool,
    pub oi_confirms: bool,
    pub in_position: bool,
}

impl EntryCheck {
    pub fn passed(&self) -> bool {
        self.ratio_trending
            && self.price_vs_ema
            && self.price_moving
            && self.oi_confirms
            && !self.in_position
    }
}

/// Entry and exit thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendRules {
    pub min_slope: f64,
    pub acceleration_threshold: f64,
    pub stop_loss_pct: f64,
}

impl TrendRules {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            min_slope: config.min_slope,
            acceleration_threshold: config.acceleration_threshold,
            stop_loss_pct: config.stop_loss_pct,
        }
    }

    /// Ratio slope and acceleration both past their thresholds in the direction of `side`.
    pub fn ratio_trending(&self, market: &MarketIndicators, side: Side) -> bool {
        match side {
            Side::Long => {
                market.ls_ratio_slope > self.min_slope
                    && market.ls_ratio_acceleration > self.acceleration_threshold
            }
            Side::Short => {
                market.ls_ratio_slope < -self.min_slope
                    && market.ls_ratio_acceleration < -self.acceleration_threshold
            }
        }
    }

    /// Evaluate the entry conditions for `side`. `None` when price or EMA200 is unavailable.
    pub fn entry_check(
        &self,
        snapshot: &IndicatorSnapshot,
        side: Side,
        in_position: bool,
    ) -> Option<EntryCheck> {
        let t = &snapshot.technicals;
        let price = t.last_close?;
        let ema200 = t.ema200?;
        let price_change = t.price_change?;
        let oi_rsi = snapshot.oi_rsi();

        // OI overbought confirms longs and oversold confirms shorts
        let (price_vs_ema, price_moving, oi_confirms) = match side {
            Side::Long => (price > ema200, price_change > 0.0, oi_rsi > OVERBOUGHT),
            Side::Short => (price < ema200, price_change < 0.0, oi_rsi < OVERSOLD),
        };

        Some(EntryCheck {
            side,
            price,
            ema200,
            price_change,
            ls_ratio_slope: snapshot.market.ls_ratio_slope,
            ls_ratio_acceleration: snapshot.market.ls_ratio_acceleration,
            oi_rsi,
            ratio_trending: self.ratio_trending(&snapshot.market, side),
            price_vs_ema,
            price_moving,
            oi_confirms,
            in_position,
        })
    }

    pub fn should_open(&self, snapshot: &IndicatorSnapshot, side: Side, in_position: bool) -> bool {
        self.entry_check(snapshot, side, in_position)
            .map_or(false, |check| check.passed())
    }

    pub fn should_open_long(&self, snapshot: &IndicatorSnapshot, in_position: bool) -> bool {
        self.should_open(snapshot, Side::Long, in_position)
    }

    pub fn should_open_short(&self, snapshot: &IndicatorSnapshot, in_position: bool) -> bool {
        self.should_open(snapshot, Side::Short, in_position)
    }

    /// First matching exit rule for `position`, whose unrealized PnL must already be marked.
    pub fn should_close(
        &self,
        position: &Position,
        snapshot: &IndicatorSnapshot,
    ) -> Option<ExitReason> {
        if position.unrealized_pnl_pct <= -self.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }

        let oi_rsi = snapshot.oi_rsi();
        let oi_exit = match position.side {
            Side::Long => oi_rsi <= OVERSOLD,
            Side::Short => oi_rsi >= SHORT_EXIT_OI_RSI,
        };
        if oi_exit {
            return Some(ExitReason::OiRsiCondition);
        }

        let opposite = match position.side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        if self.ratio_trending(&snapshot.market, opposite) {
            return Some(ExitReason::TrendReversal);
        }

        None
    }
}

/// Lets a keyed log line through at most once per interval.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: HashMap<&'static str, Instant>,
}

impl LogThrottle {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    /// True if `key` may log now. Stamps the key when it returns true.
    pub fn allow(&mut self, key: &'static str) -> bool {
        let now = Instant::now();
        match self.last.get(key) {
            Some(at) if now.duration_since(*at) < self.interval => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
