use crate::api::BitgetClient;
use crate::config::Settings;
use crate::error::Result;
use crate::execution::OrderExecutor;
use crate::indicators::IndicatorCache;
use crate::market::{MarketObserver, MarketRefresher, ObserverSet, StreamIngester, StreamState};
use crate::models::MarketEvent;
use crate::persistence::Storage;
use crate::shutdown::{self, ShutdownSender};
use crate::strategy::StrategyEngine;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Candles loaded from storage before the stream starts.
pub const WARM_UP_CANDLES: usize = 200;
/// Ratio samples loaded from storage before polling starts.
pub const WARM_UP_RATIOS: usize = 3;

/// How long `stop` waits for each loop before aborting it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Feeds streamed candles into the indicator cache and storage.
struct CacheObserver {
    cache: IndicatorCache,
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl MarketObserver for CacheObserver {
    fn name(&self) -> &str {
        "indicator_cache"
    }

    // Never fails, so the cache is never dropped from the observer set
    async fn on_event(&self, event: &MarketEvent) -> anyhow::Result<()> {
        let MarketEvent::Candle(candle) = event else {
            return Ok(());
        };

        match self.cache.update_candle(candle.clone()) {
            Ok(admit) if admit.is_admitted() => {
                if let Err(e) = self.storage.store_candle(candle).await {
                    tracing::error!("Failed to store candle: {}", e);
                }
            }
            Ok(admit) => {
                tracing::debug!(timestamp = candle.timestamp, ?admit, "Candle not admitted");
            }
            Err(e) => tracing::error!("Failed to update candle cache: {}", e),
        }
        Ok(())
    }
}

/// Composition root: owns the client, cache, storage and executor, and runs
/// the stream, refresh and strategy loops.
pub struct Pipeline {
    settings: Settings,
    client: Arc<BitgetClient>,
    cache: IndicatorCache,
    storage: Arc<dyn Storage>,
    observers: ObserverSet,
    cache_observer: Arc<dyn MarketObserver>,
    engine: Arc<StrategyEngine>,
    stream_state: Option<watch::Receiver<StreamState>>,
    shutdown: Option<ShutdownSender>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        client: Arc<BitgetClient>,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Self {
        let cache = IndicatorCache::new(&settings.indicators);
        let engine = Arc::new(StrategyEngine::new(
            &settings.exchange.symbol,
            settings.strategy.clone(),
            cache.clone(),
            executor,
            storage.clone(),
        ));
        let cache_observer: Arc<dyn MarketObserver> = Arc::new(CacheObserver {
            cache: cache.clone(),
            storage: storage.clone(),
        });

        Self {
            settings,
            client,
            cache,
            storage,
            observers: ObserverSet::new(),
            cache_observer,
            engine,
            stream_state: None,
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    /// Registry for external consumers of market events.
    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    pub fn register_observer(&self, observer: Arc<dyn MarketObserver>) {
        self.observers.register(observer);
    }

    pub fn cache(&self) -> &IndicatorCache {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<StrategyEngine> {
        &self.engine
    }

    /// Stream connection state while running.
    pub fn stream_state(&self) -> Option<watch::Receiver<StreamState>> {
        self.stream_state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Load recent candles and ratios from storage into the cache.
    pub async fn warm_up(&self) -> Result<usize> {
        let candles = self.storage.get_recent_candles(WARM_UP_CANDLES).await?;
        let ratios = self.storage.get_recent_ratios(WARM_UP_RATIOS).await?;
        self.cache.warm_up(candles, ratios)
    }

    /// Warm up the cache and spawn the three loops. Calling it while running is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::warn!("Pipeline already running");
            return Ok(());
        }

        let loaded = match self.warm_up().await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("Cache warm-up failed, starting cold: {}", e);
                0
            }
        };
        tracing::info!(loaded, "Indicator cache warmed up");

        // The stream clears its observers on exit, so register on every start
        self.observers.register(self.cache_observer.clone());

        let (tx, rx) = shutdown::channel();

        let ingester = StreamIngester::new(
            &self.settings.exchange,
            &self.settings.stream,
            self.observers.clone(),
        );
        self.stream_state = Some(ingester.state());
        let stream_rx = rx.clone();
        self.tasks.push((
            "stream",
            tokio::spawn(async move { ingester.run(stream_rx).await }),
        ));

        let refresher = MarketRefresher::new(
            self.client.clone(),
            self.cache.clone(),
            self.storage.clone(),
            self.observers.clone(),
            &self.settings.exchange,
            &self.settings.indicators,
            &self.settings.strategy,
        );
        let refresh_rx = rx.clone();
        self.tasks.push((
            "refresh",
            tokio::spawn(async move { refresher.run(refresh_rx).await }),
        ));

        let engine = self.engine.clone();
        self.tasks.push((
            "strategy",
            tokio::spawn(async move { engine.run(rx).await }),
        ));

        self.shutdown = Some(tx);
        tracing::info!(symbol = %self.settings.exchange.symbol, "Pipeline started");
        Ok(())
    }

    /// Signal every loop, wait a bounded time for each, then close the client.
    ///
    /// The closed client rejects further requests, so a stopped pipeline is not restartable.
    pub async fn stop(&mut self) {
        let Some(tx) = self.shutdown.take() else {
            return;
        };
        tracing::info!("Stopping pipeline");
        tx.send_replace(true);

        for (name, handle) in self.tasks.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Loop drained"),
                Ok(Err(e)) => tracing::error!(task = name, "Loop panicked: {}", e),
                Err(_) => {
                    tracing::warn!(task = name, "Loop did not drain in time, aborting");
                    abort.abort();
                }
            }
        }

        self.client.close();
        self.stream_state = None;
        tracing::info!("Pipeline stopped");
    }
}
