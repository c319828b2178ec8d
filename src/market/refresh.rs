use super::observers::ObserverSet;
use crate::api::BitgetClient;
use crate::config::{ExchangeConfig, IndicatorConfig, StrategyConfig};
use crate::indicators::IndicatorCache;
use crate::models::MarketEvent;
use crate::persistence::Storage;
use crate::shutdown::{self, ShutdownReceiver};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Minimum-interval gate driven by the last attempt, not a fixed-rate timer.
///
/// A slow tick therefore never produces a burst of catch-up polls.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_attempt
            .map_or(true, |at| now.duration_since(at) >= self.interval)
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    NotDue,
    Admitted,
    Unchanged,
    Failed,
}

/// Periodically polls open interest and the long/short ratio into the cache.
pub struct MarketRefresher {
    client: Arc<BitgetClient>,
    cache: IndicatorCache,
    storage: Arc<dyn Storage>,
    observers: ObserverSet,
    symbol: String,
    product_type: String,
    ratio_period: String,
    request_timeout: Duration,
    oi_schedule: PollSchedule,
    ratio_schedule: PollSchedule,
}

/// Tick of the refresh loop. Each series still honours its own interval.
const TICK: Duration = Duration::from_secs(1);

impl MarketRefresher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<BitgetClient>,
        cache: IndicatorCache,
        storage: Arc<dyn Storage>,
        observers: ObserverSet,
        exchange: &ExchangeConfig,
        indicators: &IndicatorConfig,
        strategy: &StrategyConfig,
    ) -> Self {
        Self {
            client,
            cache,
            storage,
            observers,
            symbol: exchange.symbol.clone(),
            product_type: exchange.product_type.clone(),
            ratio_period: indicators.ratio_period.clone(),
            request_timeout: exchange.request_timeout(),
            oi_schedule: PollSchedule::new(Duration::from_secs(strategy.oi_refresh_secs)),
            ratio_schedule: PollSchedule::new(Duration::from_secs(strategy.ratio_refresh_secs)),
        }
    }

    pub async fn run(mut self, mut shutdown: ShutdownReceiver) {
        tracing::info!(symbol = %self.symbol, "Starting market refresh loop");

        while !shutdown::is_requested(&shutdown) {
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(TICK) => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        tracing::info!("Market refresh loop stopped");
    }

    /// Poll whatever series are due.
    pub async fn tick(&mut self) -> (PollResult, PollResult) {
        let oi = self.refresh_open_interest().await;
        let ratio = self.refresh_ratio().await;
        (oi, ratio)
    }

    pub async fn refresh_open_interest(&mut self) -> PollResult {
        let now = Instant::now();
        if !self.oi_schedule.is_due(now) {
            return PollResult::NotDue;
        }
        self.oi_schedule.mark(now);

        let fetched = timeout(
            self.request_timeout,
            self.client.get_open_interest(&self.symbol, &self.product_type),
        )
        .await;

        let sample = match fetched {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                tracing::error!("Error updating OI data: {}", e);
                return PollResult::Failed;
            }
            Err(_) => {
                tracing::warn!("Open interest request timed out");
                return PollResult::Failed;
            }
        };

        match self.cache.admit_open_interest(sample.clone()) {
            Ok(admit) if admit.is_admitted() => {
                if let Ok(Some(indicators)) = self.cache.oi_indicators() {
                    tracing::debug!(?indicators, "OI indicators");
                }
                self.observers
                    .notify(&MarketEvent::OpenInterest(sample))
                    .await;
                self.store_market_indicators().await;
                PollResult::Admitted
            }
            Ok(_) => PollResult::Unchanged,
            Err(e) => {
                tracing::error!("Failed to admit open interest: {}", e);
                PollResult::Failed
            }
        }
    }

    pub async fn refresh_ratio(&mut self) -> PollResult {
        let now = Instant::now();
        if !self.ratio_schedule.is_due(now) {
            return PollResult::NotDue;
        }
        self.ratio_schedule.mark(now);

        let fetched = timeout(
            self.request_timeout,
            self.client.get_position_ratio(&self.symbol, &self.ratio_period),
        )
        .await;

        let sample = match fetched {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                tracing::error!("Error fetching ratio data: {}", e);
                return PollResult::Failed;
            }
            Err(_) => {
                tracing::warn!("Position ratio request timed out");
                return PollResult::Failed;
            }
        };

        match self.cache.admit_ratio(sample.clone()) {
            Ok(admit) if admit.is_admitted() => {
                if let Err(e) = self.storage.store_ratio(&sample).await {
                    tracing::error!("Failed to store ratio: {}", e);
                }
                self.observers.notify(&MarketEvent::Ratio(sample)).await;
                self.store_market_indicators().await;
                PollResult::Admitted
            }
            Ok(_) => PollResult::Unchanged,
            Err(e) => {
                tracing::error!("Failed to admit ratio: {}", e);
                PollResult::Failed
            }
        }
    }

    async fn store_market_indicators(&self) {
        let record = match self
            .cache
            .market_indicators_record(Utc::now().timestamp_millis())
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Failed to build market indicators: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.store_market_indicators(&record).await {
            tracing::error!("Failed to store market indicators: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_poll_schedule_gates_on_last_attempt() {
        let mut schedule = PollSchedule::new(Duration::from_secs(60));
        let start = Instant::now();

        assert!(schedule.is_due(start));
        schedule.mark(start);
        assert!(!schedule.is_due(start + Duration::from_secs(59)));
        assert!(schedule.is_due(start + Duration::from_secs(60)));

        // A late tick does not owe a second poll
        let late = start + Duration::from_secs(185);
        schedule.mark(late);
        assert!(!schedule.is_due(late + Duration::from_secs(1)));
    }

    async fn refresher(server: &mockito::Server, storage: Arc<MemoryStorage>) -> MarketRefresher {
        let exchange = ExchangeConfig {
            base_url: server.url(),
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            passphrase: "pass".to_string(),
            max_retries: 0,
            ..Default::default()
        };
        let indicators = IndicatorConfig::default();
        MarketRefresher::new(
            Arc::new(BitgetClient::new(&exchange)),
            IndicatorCache::new(&indicators),
            storage,
            ObserverSet::new(),
            &exchange,
            &indicators,
            &StrategyConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_refresh_admits_then_waits_for_interval() {
        let mut server = mockito::Server::new_async().await;
        let oi_mock = server
            .mock("GET", "/api/v2/mix/market/open-interest")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":"00000","msg":"success","data":{"openInterestList":[{"symbol":"BTCUSDT","size":"1000.5"}]}}"#)
            .expect(1)
            .create_async()
            .await;
        let ratio_mock = server
            .mock("GET", "/api/v2/mix/market/account-long-short")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":"00000","msg":"success","data":[{"longAccountRatio":"0.6","shortAccountRatio":"0.4","longShortAccountRatio":"1.5"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::default());
        let mut refresher = refresher(&server, storage.clone()).await;

        assert_eq!(
            refresher.tick().await,
            (PollResult::Admitted, PollResult::Admitted)
        );
        assert_eq!(
            refresher.tick().await,
            (PollResult::NotDue, PollResult::NotDue)
        );

        oi_mock.assert_async().await;
        ratio_mock.assert_async().await;
        assert_eq!(storage.get_recent_ratios(3).await.unwrap().len(), 1);
        assert!(!storage.market_indicators().is_empty());
        assert_eq!(refresher.cache.lens().unwrap(), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_poll_still_counts_as_attempt() {
        let mut server = mockito::Server::new_async().await;
        let _oi = server
            .mock("GET", "/api/v2/mix/market/open-interest")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":"40034","msg":"Parameter verification failed"}"#)
            .expect(1)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStorage::default());
        let mut refresher = refresher(&server, storage).await;

        assert_eq!(refresher.refresh_open_interest().await, PollResult::Failed);
        assert_eq!(refresher.refresh_open_interest().await, PollResult::NotDue);
    }
}
