use super::metrics::TradingMetrics;
use super::rules::{EntryCheck, LogThrottle, TrendRules};
use super::sizing::{adjust_leverage, position_size};
use crate::config::StrategyConfig;
use crate::error::Result;
use crate::execution::{OpenOrder, OrderExecutor};
use crate::indicators::{IndicatorCache, IndicatorSnapshot};
use crate::models::{ExitReason, Position, Side, TradeRecord};
use crate::persistence::Storage;
use crate::shutdown::{self, ShutdownReceiver};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// Position lifecycle of the engine.
///
/// Entry rules run only in `Flat`, exit rules only in `InPosition`.
/// `Entering` and `Exiting` last while an order is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Flat,
    Entering,
    InPosition,
    Exiting,
}

/// What one evaluation tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another evaluation still holds the engine
    Busy,
    /// No candle data yet
    NoData,
    /// Flat, but the minimum interval since the last close has not passed
    Cooldown,
    NoSignal,
    Opened(Side),
    Held,
    Closed(ExitReason),
    /// The venue no longer reports the position we held
    ClosedExternally,
    /// A venue call failed. State is as it was before the tick.
    Failed,
}

struct EngineState {
    position: Option<Position>,
    last_close: Option<Instant>,
    leverage: u32,
    last_logged_leverage: Option<u32>,
    metrics: TradingMetrics,
    throttle: LogThrottle,
}

/// Single-instrument trend follower on the long/short ratio and OI.
pub struct StrategyEngine {
    symbol: String,
    config: StrategyConfig,
    rules: TrendRules,
    cache: IndicatorCache,
    executor: Arc<dyn OrderExecutor>,
    storage: Arc<dyn Storage>,
    phase: watch::Sender<EnginePhase>,
    state: Mutex<EngineState>,
}

impl StrategyEngine {
    pub fn new(
        symbol: &str,
        config: StrategyConfig,
        cache: IndicatorCache,
        executor: Arc<dyn OrderExecutor>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let (phase, _) = watch::channel(EnginePhase::Flat);
        Self {
            symbol: symbol.to_string(),
            rules: TrendRules::from_config(&config),
            state: Mutex::new(EngineState {
                position: None,
                last_close: None,
                leverage: config.leverage,
                last_logged_leverage: None,
                metrics: TradingMetrics::default(),
                throttle: LogThrottle::default(),
            }),
            config,
            cache,
            executor,
            storage,
            phase,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<EnginePhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: EnginePhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "Engine phase changed");
        }
    }

    pub async fn metrics(&self) -> TradingMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn position(&self) -> Option<Position> {
        self.state.lock().await.position.clone()
    }

    /// Leverage the next entry will use.
    pub async fn leverage(&self) -> u32 {
        self.state.lock().await.leverage
    }

    /// Adopt whatever position the venue already holds.
    pub async fn sync_position(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match self.executor.get_position(&self.symbol).await? {
            Some(position) => {
                tracing::info!(
                    symbol = %position.symbol,
                    side = %position.side,
                    size = position.size,
                    entry_price = position.entry_price,
                    "Found existing position"
                );
                state.position = Some(position);
                self.set_phase(EnginePhase::InPosition);
            }
            None => {
                tracing::info!(symbol = %self.symbol, "No existing position");
                state.position = None;
                self.set_phase(EnginePhase::Flat);
            }
        }
        Ok(())
    }

    /// Evaluate once. Overlapping calls return `Busy` instead of waiting.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(mut state) = self.state.try_lock() else {
            return TickOutcome::Busy;
        };

        let snapshot = match self.cache.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to read indicators: {}", e);
                return TickOutcome::Failed;
            }
        };
        let Some(price) = snapshot.price() else {
            return TickOutcome::NoData;
        };

        match self.phase() {
            EnginePhase::InPosition => self.manage_position(&mut state, &snapshot, price).await,
            EnginePhase::Flat => self.look_for_entry(&mut state, &snapshot, price).await,
            // Only reachable if a previous tick was cancelled mid-order
            EnginePhase::Entering | EnginePhase::Exiting => {
                tracing::warn!(phase = ?self.phase(), "Recovering from interrupted order");
                match self.sync_state(&mut state).await {
                    Ok(()) => TickOutcome::Held,
                    Err(e) => {
                        tracing::error!("Failed to resync position: {}", e);
                        TickOutcome::Failed
                    }
                }
            }
        }
    }

    async fn sync_state(&self, state: &mut EngineState) -> Result<()> {
        let position = self.executor.get_position(&self.symbol).await?;
        let phase = if position.is_some() {
            EnginePhase::InPosition
        } else {
            EnginePhase::Flat
        };
        state.position = position;
        self.set_phase(phase);
        Ok(())
    }

    async fn manage_position(
        &self,
        state: &mut EngineState,
        snapshot: &IndicatorSnapshot,
        price: f64,
    ) -> TickOutcome {
        let mut position = match self.executor.get_position(&self.symbol).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                tracing::info!(symbol = %self.symbol, "Position closed outside the engine");
                if let Err(e) = self.executor.cancel_all_orders(&self.symbol).await {
                    tracing::warn!("Failed to cancel leftover orders: {}", e);
                }
                if let Some(held) = state.position.take() {
                    self.record_external_exit(state, &held, price).await;
                }
                state.last_close = Some(Instant::now());
                self.set_phase(EnginePhase::Flat);
                return TickOutcome::ClosedExternally;
            }
            Err(e) => {
                tracing::error!("Failed to fetch position: {}", e);
                return TickOutcome::Failed;
            }
        };

        position.mark(price);
        state.position = Some(position.clone());

        let Some(reason) = self.rules.should_close(&position, snapshot) else {
            return TickOutcome::Held;
        };

        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            reason = %reason,
            pnl_pct = position.unrealized_pnl_pct,
            oi_rsi = snapshot.oi_rsi(),
            "Exit condition met"
        );

        self.set_phase(EnginePhase::Exiting);
        if let Err(e) = self.executor.close_position_at_market(&position).await {
            tracing::error!("Failed to close position: {}", e);
            self.set_phase(EnginePhase::InPosition);
            return TickOutcome::Failed;
        }

        let record = TradeRecord::exit(Utc::now().timestamp_millis(), &position, price, reason);
        self.store_trade(&record).await;
        state.metrics.update(record.pnl);

        tracing::info!(
            pnl = record.pnl,
            pnl_pct = record.pnl_pct,
            reason = %reason,
            total_pnl = state.metrics.total_pnl,
            win_rate = state.metrics.win_rate(),
            "Position closed"
        );

        state.position = None;
        state.last_close = Some(Instant::now());
        self.set_phase(EnginePhase::Flat);
        TickOutcome::Closed(reason)
    }

    /// Journal a position the venue closed on its own, priced at the latest close.
    async fn record_external_exit(&self, state: &mut EngineState, held: &Position, price: f64) {
        let reason = if held.pnl_pct_at(price) <= -self.config.stop_loss_pct {
            ExitReason::StopLoss
        } else {
            ExitReason::External
        };

        let record = TradeRecord::exit(Utc::now().timestamp_millis(), held, price, reason);
        self.store_trade(&record).await;
        state.metrics.update(record.pnl);

        tracing::info!(
            pnl = record.pnl,
            pnl_pct = record.pnl_pct,
            reason = %reason,
            total_pnl = state.metrics.total_pnl,
            "External close recorded"
        );
    }

    async fn look_for_entry(
        &self,
        state: &mut EngineState,
        snapshot: &IndicatorSnapshot,
        price: f64,
    ) -> TickOutcome {
        let min_interval = self.config.min_trade_interval();
        if let Some(closed_at) = state.last_close {
            if closed_at.elapsed() < min_interval {
                return TickOutcome::Cooldown;
            }
        }

        let volatility = snapshot.technicals.atr.unwrap_or(0.0);
        let leverage = adjust_leverage(
            volatility,
            self.config.base_volatility,
            self.config.max_leverage,
            self.config.min_leverage,
        );
        if state.last_logged_leverage != Some(leverage) {
            tracing::info!(leverage, volatility, "Adjusted leverage");
            state.last_logged_leverage = Some(leverage);
        }
        state.leverage = leverage;

        let long = self.rules.entry_check(snapshot, Side::Long, false);
        let short = self.rules.entry_check(snapshot, Side::Short, false);
        for check in [&long, &short].into_iter().flatten() {
            log_conditions(&mut state.throttle, check);
        }

        let side = if long.as_ref().is_some_and(EntryCheck::passed) {
            Side::Long
        } else if short.as_ref().is_some_and(EntryCheck::passed) {
            Side::Short
        } else {
            return TickOutcome::NoSignal;
        };

        self.enter(state, side, price).await
    }

    async fn enter(&self, state: &mut EngineState, side: Side, price: f64) -> TickOutcome {
        self.set_phase(EnginePhase::Entering);

        let balance = match self.executor.get_account_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!("Failed to fetch account balance: {}", e);
                self.set_phase(EnginePhase::Flat);
                return TickOutcome::Failed;
            }
        };

        let size = position_size(balance, self.config.position_size_pct, state.leverage, price);
        tracing::info!(size, available = balance, "Calculated position size");
        if size <= 0.0 {
            tracing::warn!(available = balance, price, "Position size rounds to zero, skipping entry");
            self.set_phase(EnginePhase::Flat);
            return TickOutcome::Failed;
        }

        let order = OpenOrder::limit_with_stop(
            &self.symbol,
            side,
            size,
            state.leverage,
            price,
            self.config.stop_loss_pct,
        );
        if let Err(e) = self.executor.open_position(&order).await {
            tracing::error!(side = %side, "Entry order failed: {}", e);
            self.set_phase(EnginePhase::Flat);
            return TickOutcome::Failed;
        }

        let record = TradeRecord::entry(
            Utc::now().timestamp_millis(),
            &self.symbol,
            side,
            size,
            price,
            state.leverage,
        );
        self.store_trade(&record).await;

        tracing::info!(
            side = %side,
            size,
            price,
            leverage = state.leverage,
            stop_loss = order.stop_loss_price,
            "Entered position"
        );

        state.position = Some(Position {
            symbol: self.symbol.clone(),
            side,
            size,
            entry_price: price,
            leverage: state.leverage,
            unrealized_pnl_pct: 0.0,
        });
        self.set_phase(EnginePhase::InPosition);
        TickOutcome::Opened(side)
    }

    async fn store_trade(&self, record: &TradeRecord) {
        if let Err(e) = self.storage.store_trade(record).await {
            tracing::error!("Failed to store trade record: {}", e);
        }
    }

    /// Sync with the venue, then evaluate every `evaluation_interval_ms` until shutdown.
    pub async fn run(&self, mut shutdown: ShutdownReceiver) {
        tracing::info!(symbol = %self.symbol, "Starting trading strategy");

        if let Err(e) = self.sync_position().await {
            tracing::error!("Initial position sync failed: {}", e);
        }

        let interval = Duration::from_millis(self.config.evaluation_interval_ms.max(1));
        while !shutdown::is_requested(&shutdown) {
            tokio::select! {
                outcome = self.tick() => {
                    tracing::trace!(?outcome, "Strategy tick");
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        tracing::info!("Trading strategy stopped");
    }
}

fn log_conditions(throttle: &mut LogThrottle, check: &EntryCheck) {
    let key = match check.side {
        Side::Long => "long_conditions",
        Side::Short => "short_conditions",
    };
    if !throttle.allow(key) {
        return;
    }
    tracing::info!(
        side = %check.side,
        price = check.price,
        ema200 = check.ema200,
        price_vs_ema = check.price_vs_ema,
        price_change = check.price_change,
        price_moving = check.price_moving,
        ls_ratio_slope = check.ls_ratio_slope,
        ls_ratio_acceleration = check.ls_ratio_acceleration,
        ratio_trending = check.ratio_trending,
        oi_rsi = check.oi_rsi,
        oi_confirms = check.oi_confirms,
        in_position = check.in_position,
        "Entry conditions"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorConfig;
    use crate::execution::PaperExecutor;
    use crate::models::{Candle, OpenInterestSample, RatioSample};
    use crate::persistence::MemoryStorage;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: None,
        }
    }

    /// Cache where every long condition holds at price 130.
    fn bullish_cache() -> IndicatorCache {
        let cache = IndicatorCache::new(&IndicatorConfig::default());
        for i in 0..31 {
            cache.update_candle(candle(i * 60_000, 100.0 + i as f64)).unwrap();
        }
        for (i, ratio) in [1.0, 1.2, 1.5].into_iter().enumerate() {
            cache
                .admit_ratio(RatioSample {
                    timestamp: i as i64,
                    long_ratio: 0.5,
                    short_ratio: 0.5,
                    long_short_ratio: ratio,
                })
                .unwrap();
        }
        for i in 0..20 {
            cache
                .admit_open_interest(OpenInterestSample {
                    timestamp: i,
                    value: 1_000.0 + i as f64 * 10.0,
                })
                .unwrap();
        }
        cache
    }

    struct Harness {
        engine: StrategyEngine,
        paper: Arc<PaperExecutor>,
        storage: Arc<MemoryStorage>,
        cache: IndicatorCache,
    }

    fn harness(cache: IndicatorCache, config: StrategyConfig) -> Harness {
        let paper = Arc::new(PaperExecutor::new(1_000.0));
        let storage = Arc::new(MemoryStorage::default());
        let engine = StrategyEngine::new(
            "BTCUSDT",
            config,
            cache.clone(),
            paper.clone(),
            storage.clone(),
        );
        Harness {
            engine,
            paper,
            storage,
            cache,
        }
    }

    #[tokio::test]
    async fn test_no_data_without_candles() {
        let h = harness(
            IndicatorCache::new(&IndicatorConfig::default()),
            StrategyConfig::default(),
        );
        assert_eq!(h.engine.tick().await, TickOutcome::NoData);
    }

    #[tokio::test]
    async fn test_opens_long_once() {
        let h = harness(bullish_cache(), StrategyConfig::default());

        assert_eq!(h.engine.tick().await, TickOutcome::Opened(Side::Long));
        assert_eq!(h.engine.phase(), EnginePhase::InPosition);

        // Still bullish, but holding: no second entry
        assert_eq!(h.engine.tick().await, TickOutcome::Held);
        assert_eq!(h.paper.orders_placed(), 1);

        let trades = h.storage.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Long);
        assert_eq!(trades[0].entry_price, 130.0);
        assert_eq!(trades[0].exit_reason, None);

        let position = h.engine.position().await.unwrap();
        assert_eq!(position.leverage, h.engine.leverage().await);
    }

    #[tokio::test]
    async fn test_stop_loss_closes_and_records() {
        let h = harness(bullish_cache(), StrategyConfig::default());
        assert_eq!(h.engine.tick().await, TickOutcome::Opened(Side::Long));

        // 130 -> 115 is an 11.5% adverse move
        h.cache.update_candle(candle(31 * 60_000, 115.0)).unwrap();
        h.paper.mark_price(115.0);

        assert_eq!(
            h.engine.tick().await,
            TickOutcome::Closed(ExitReason::StopLoss)
        );
        assert_eq!(h.engine.phase(), EnginePhase::Flat);

        let trades = h.storage.trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(trades[1].exit_price, 115.0);
        assert!(trades[1].pnl < 0.0);

        let metrics = h.engine.metrics().await;
        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_after_close() {
        let h = harness(bullish_cache(), StrategyConfig::default());
        assert_eq!(h.engine.tick().await, TickOutcome::Opened(Side::Long));

        h.paper.force_flat();
        assert_eq!(h.engine.tick().await, TickOutcome::ClosedExternally);
        assert_eq!(h.engine.tick().await, TickOutcome::Cooldown);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(h.engine.tick().await, TickOutcome::Opened(Side::Long));
    }

    #[tokio::test]
    async fn test_external_close_is_journalled() {
        let h = harness(bullish_cache(), StrategyConfig::default());
        assert_eq!(h.engine.tick().await, TickOutcome::Opened(Side::Long));

        h.paper.force_flat();
        assert_eq!(h.engine.tick().await, TickOutcome::ClosedExternally);

        let trades = h.storage.trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].exit_reason, Some(ExitReason::External));
        assert_eq!(trades[1].exit_price, 130.0);
        assert_eq!(h.engine.metrics().await.total_trades, 1);
        assert!(h.engine.position().await.is_none());
    }

    #[tokio::test]
    async fn test_external_stop_fill_counts_as_stop_loss() {
        let h = harness(bullish_cache(), StrategyConfig::default());
        assert_eq!(h.engine.tick().await, TickOutcome::Opened(Side::Long));

        // The venue filled the preset stop before the engine saw the drop
        h.cache.update_candle(candle(31 * 60_000, 116.0)).unwrap();
        h.paper.force_flat();
        assert_eq!(h.engine.tick().await, TickOutcome::ClosedExternally);

        let trades = h.storage.trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(trades[1].exit_price, 116.0);
        assert!(trades[1].pnl < 0.0);

        let metrics = h.engine.metrics().await;
        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
    }

    #[tokio::test]
    async fn test_sync_adopts_existing_position() {
        let h = harness(bullish_cache(), StrategyConfig::default());
        let order = OpenOrder::limit_with_stop("BTCUSDT", Side::Short, 1.0, 10, 130.0, 10.0);
        h.paper.open_position(&order).await.unwrap();

        h.engine.sync_position().await.unwrap();
        assert_eq!(h.engine.phase(), EnginePhase::InPosition);
        assert_eq!(h.engine.position().await.unwrap().side, Side::Short);
    }

    #[tokio::test]
    async fn test_rejected_entry_stays_flat() {
        // Margin needed exceeds the paper balance
        let config = StrategyConfig {
            position_size_pct: 500.0,
            ..Default::default()
        };
        let h = harness(bullish_cache(), config);

        assert_eq!(h.engine.tick().await, TickOutcome::Failed);
        assert_eq!(h.engine.phase(), EnginePhase::Flat);
        assert!(h.storage.trades().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_busy() {
        let h = harness(bullish_cache(), StrategyConfig::default());
        let _guard = h.engine.state.lock().await;
        assert_eq!(h.engine.tick().await, TickOutcome::Busy);
    }
}
