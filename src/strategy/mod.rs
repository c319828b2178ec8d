// Trading strategy: entry/exit rules, sizing, and the evaluation loop
pub mod engine;
pub mod metrics;
pub mod rules;
pub mod sizing;

pub use engine::{EnginePhase, StrategyEngine, TickOutcome};
pub use metrics::TradingMetrics;
pub use rules::{EntryCheck, LogThrottle, TrendRules};
pub use sizing::{adjust_leverage, position_size};
