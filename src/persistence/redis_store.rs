use super::Storage;
use crate::error::StorageError;
use crate::models::{Candle, MarketIndicatorsRecord, RatioSample, TradeRecord};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{timeout, Duration};

/// Redis persistence for one instrument.
///
/// Time series live in sorted sets scored by timestamp (ms); the trade
/// journal is a list. Keys are `{prefix}:{symbol}:{series}`.
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStorage {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `symbol` - instrument the keys are scoped to
    pub async fn connect(redis_url: &str, symbol: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| StorageError::Timeout)??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            prefix: format!("ratiobot:{}", symbol),
        })
    }

    fn key(&self, series: &str) -> String {
        format!("{}:{}", self.prefix, series)
    }

    /// Replace whatever is stored at `score` with `value`, atomically.
    async fn upsert<T: Serialize>(
        &self,
        series: &str,
        score: i64,
        value: &T,
    ) -> Result<(), StorageError> {
        let key = self.key(series);
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .zrembyscore(&key, score, score)
            .ignore()
            .zadd(&key, json, score)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    /// The `limit` highest-scored rows, oldest first.
    async fn newest<T: DeserializeOwned>(
        &self,
        series: &str,
        limit: usize,
    ) -> Result<Vec<T>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.key(series);
        let mut conn = self.conn.clone();

        let start = -(limit.min(isize::MAX as usize) as isize);
        let rows: Vec<String> = conn.zrange(&key, start, -1).await?;

        rows.iter()
            .map(|row| serde_json::from_str(row).map_err(StorageError::from))
            .collect()
    }

    /// Drop rows older than `before` (ms) from a series.
    #[cfg(test)]
    async fn trim_before(&self, series: &str, before: i64) -> Result<usize, StorageError> {
        let key = self.key(series);
        let mut conn = self.conn.clone();
        let removed: usize = conn.zrembyscore(&key, "-inf", before - 1).await?;

        if removed > 0 {
            tracing::debug!(series, removed, "Trimmed old rows");
        }
        Ok(removed)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn store_candle(&self, candle: &Candle) -> Result<(), StorageError> {
        self.upsert("candles", candle.timestamp, candle).await
    }

    async fn get_recent_candles(&self, limit: usize) -> Result<Vec<Candle>, StorageError> {
        self.newest("candles", limit).await
    }

    async fn store_ratio(&self, sample: &RatioSample) -> Result<(), StorageError> {
        self.upsert("ratios", sample.timestamp, sample).await
    }

    async fn get_recent_ratios(&self, limit: usize) -> Result<Vec<RatioSample>, StorageError> {
        self.newest("ratios", limit).await
    }

    async fn store_trade(&self, trade: &TradeRecord) -> Result<(), StorageError> {
        let key = self.key("trades");
        let json = serde_json::to_string(trade)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&key, json).await?;
        Ok(())
    }

    async fn store_market_indicators(
        &self,
        record: &MarketIndicatorsRecord,
    ) -> Result<(), StorageError> {
        self.upsert("indicators", record.timestamp, record).await
    }
}
