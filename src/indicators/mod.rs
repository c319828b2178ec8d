// Technical indicators module
// Rolling buffers plus EMA, RSI, Stoch RSI, ATR and open-interest analytics

pub mod atr;
pub mod cache;
pub mod moving_average;
pub mod open_interest;
pub mod rolling;
pub mod rsi;
pub mod trend;

pub use atr::calculate_atr;
pub use cache::{IndicatorCache, IndicatorSnapshot, MarketIndicators, Technicals};
pub use moving_average::{calculate_ema, calculate_sma};
pub use open_interest::{
    calculate_oi_indicators, OiIndicators, OiTrendSignal, TrendDirection, VolatilityLevel,
};
pub use rolling::{Admit, RejectReason, RollingWindow};
pub use rsi::{calculate_stoch_rsi, rsi_from_changes, StochRsi};
pub use trend::{second_difference, significant_change, trend_slope};
