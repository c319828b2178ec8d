use super::moving_average::trailing_mean;
use super::rsi::{rsi_from_changes, NEUTRAL_RSI};
use super::trend::{mean_std, pct_changes, trend_slope};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OI_RSI_PERIOD: usize = 14;
pub const OVERBOUGHT: f64 = 70.0;
pub const OVERSOLD: f64 = 30.0;

/// Statistics over the open-interest history.
///
/// Every field is finite: a division by zero yields 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OiIndicators {
    pub current_oi: f64,
    pub mean: f64,
    pub std: f64,
    /// Percent change of the newest sample against the previous one
    pub pct_change: f64,
    pub ma5: f64,
    pub ma20: f64,
    pub slope: f64,
    pub slope_strength: f64,
    pub volatility: f64,
    pub momentum5: f64,
    pub momentum20: f64,
    pub z_score: f64,
    pub is_anomaly: bool,
    pub oi_rsi: f64,
}

/// Compute OI indicators. Needs at least 2 samples.
pub fn calculate_oi_indicators(values: &[f64]) -> Option<OiIndicators> {
    if values.len() < 2 {
        return None;
    }

    let current_oi = *values.last()?;
    let (mean, std) = mean_std(values)?;
    let changes = pct_changes(values);

    // Short history falls back to the current value
    let ma5 = if values.len() >= 5 {
        trailing_mean(values, 5)?
    } else {
        current_oi
    };
    let ma20 = if values.len() >= 20 {
        trailing_mean(values, 20)?
    } else {
        current_oi
    };

    let slope = trend_slope(values);
    let z_score = ratio_or_zero(current_oi - mean, std);

    let indicators = OiIndicators {
        current_oi,
        mean,
        std,
        pct_change: changes.last().copied().unwrap_or(0.0),
        ma5,
        ma20,
        slope,
        slope_strength: ratio_or_zero(slope.abs(), std),
        volatility: ratio_or_zero(std, mean),
        momentum5: momentum(current_oi, ma5),
        momentum20: momentum(current_oi, ma20),
        z_score,
        is_anomaly: z_score.abs() > 2.0,
        oi_rsi: rsi_from_changes(&changes, OI_RSI_PERIOD).unwrap_or(NEUTRAL_RSI),
    };

    Some(indicators.sanitized())
}

impl OiIndicators {
    fn sanitized(mut self) -> Self {
        for field in [
            &mut self.current_oi,
            &mut self.mean,
            &mut self.std,
            &mut self.pct_change,
            &mut self.ma5,
            &mut self.ma20,
            &mut self.slope,
            &mut self.slope_strength,
            &mut self.volatility,
            &mut self.momentum5,
            &mut self.momentum20,
            &mut self.z_score,
            &mut self.oi_rsi,
        ] {
            if !field.is_finite() {
                *field = 0.0;
            }
        }
        self
    }

    pub fn trend_signal(&self) -> OiTrendSignal {
        OiTrendSignal::from_indicators(self)
    }
}

fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn momentum(current: f64, average: f64) -> f64 {
    if average == 0.0 {
        0.0
    } else {
        (current / average - 1.0) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::StrongBullish => "strong_bullish",
            TrendDirection::Bullish => "bullish",
            TrendDirection::Neutral => "neutral",
            TrendDirection::Bearish => "bearish",
            TrendDirection::StrongBearish => "strong_bearish",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    VeryHigh,
    High,
    Normal,
    Low,
    VeryLow,
}

impl VolatilityLevel {
    pub fn classify(volatility: f64) -> Self {
        if volatility > 0.15 {
            VolatilityLevel::VeryHigh
        } else if volatility > 0.1 {
            VolatilityLevel::High
        } else if volatility < 0.03 {
            VolatilityLevel::VeryLow
        } else if volatility < 0.05 {
            VolatilityLevel::Low
        } else {
            VolatilityLevel::Normal
        }
    }
}

/// Trend classification derived from [`OiIndicators`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OiTrendSignal {
    pub trend: TrendDirection,
    pub strength: f64,
    pub momentum: TrendDirection,
    pub volatility: VolatilityLevel,
    pub overbought: bool,
    pub oversold: bool,
    pub warning: bool,
    pub rsi: f64,
}

impl Default for OiTrendSignal {
    fn default() -> Self {
        Self {
            trend: TrendDirection::Neutral,
            strength: 0.0,
            momentum: TrendDirection::Neutral,
            volatility: VolatilityLevel::Normal,
            overbought: false,
            oversold: false,
            warning: false,
            rsi: NEUTRAL_RSI,
        }
    }
}

impl OiTrendSignal {
    pub fn from_indicators(ind: &OiIndicators) -> Self {
        let trend = if ind.slope > 0.0 {
            if ind.momentum5 > 0.5 && ind.momentum20 > 0.0 {
                TrendDirection::StrongBullish
            } else {
                TrendDirection::Bullish
            }
        } else if ind.slope < 0.0 {
            if ind.momentum5 < -0.5 && ind.momentum20 < 0.0 {
                TrendDirection::StrongBearish
            } else {
                TrendDirection::Bearish
            }
        } else {
            TrendDirection::Neutral
        };

        let momentum = if ind.momentum5 >= 0.5 {
            TrendDirection::StrongBullish
        } else if ind.momentum5 <= -0.5 {
            TrendDirection::StrongBearish
        } else if ind.momentum5 >= 0.2 {
            TrendDirection::Bullish
        } else if ind.momentum5 <= -0.2 {
            TrendDirection::Bearish
        } else {
            TrendDirection::Neutral
        };

        let overbought = ind.oi_rsi > OVERBOUGHT;
        let oversold = ind.oi_rsi < OVERSOLD;

        Self {
            trend,
            strength: ind.slope_strength,
            momentum,
            volatility: VolatilityLevel::classify(ind.volatility),
            overbought,
            oversold,
            warning: ind.is_anomaly
                || ind.volatility > 0.15
                || ind.z_score.abs() > 2.5
                || overbought
                || oversold,
            rsi: ind.oi_rsi,
        }
    }
}
