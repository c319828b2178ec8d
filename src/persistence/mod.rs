pub mod redis_store;

use crate::error::StorageError;
use crate::models::{Candle, MarketIndicatorsRecord, RatioSample, TradeRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub use redis_store::RedisStorage;

/// Durable store for market history and the trade journal.
///
/// Range reads return rows oldest to newest.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upsert a candle keyed by its timestamp.
    async fn store_candle(&self, candle: &Candle) -> Result<(), StorageError>;

    async fn get_recent_candles(&self, limit: usize) -> Result<Vec<Candle>, StorageError>;

    async fn store_ratio(&self, sample: &RatioSample) -> Result<(), StorageError>;

    async fn get_recent_ratios(&self, limit: usize) -> Result<Vec<RatioSample>, StorageError>;

    /// Append a trade journal row.
    async fn store_trade(&self, trade: &TradeRecord) -> Result<(), StorageError>;

    async fn store_market_indicators(
        &self,
        record: &MarketIndicatorsRecord,
    ) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryTables {
    candles: BTreeMap<i64, Candle>,
    ratios: BTreeMap<i64, RatioSample>,
    indicators: BTreeMap<i64, MarketIndicatorsRecord>,
    trades: Vec<TradeRecord>,
}

/// In-process storage for paper trading and tests.
///
/// Keyed series keep at most `capacity` newest rows. Trades are never dropped.
pub struct MemoryStorage {
    tables: Mutex<MemoryTables>,
    capacity: usize,
}

impl MemoryStorage {
    pub const DEFAULT_CAPACITY: usize = 1440;

    pub fn new(capacity: usize) -> Self {
        Self {
            tables: Mutex::new(MemoryTables::default()),
            capacity: capacity.max(1),
        }
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.tables().trades.clone()
    }

    pub fn market_indicators(&self) -> Vec<MarketIndicatorsRecord> {
        self.tables().indicators.values().cloned().collect()
    }

    pub fn candle_count(&self) -> usize {
        self.tables().candles.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn bounded_insert<T>(map: &mut BTreeMap<i64, T>, key: i64, value: T, capacity: usize) {
    map.insert(key, value);
    while map.len() > capacity {
        map.pop_first();
    }
}

fn newest<T: Clone>(map: &BTreeMap<i64, T>, limit: usize) -> Vec<T> {
    let mut rows: Vec<T> = map.values().rev().take(limit).cloned().collect();
    rows.reverse();
    rows
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store_candle(&self, candle: &Candle) -> Result<(), StorageError> {
        let capacity = self.capacity;
        bounded_insert(
            &mut self.tables().candles,
            candle.timestamp,
            candle.clone(),
            capacity,
        );
        Ok(())
    }

    async fn get_recent_candles(&self, limit: usize) -> Result<Vec<Candle>, StorageError> {
        Ok(newest(&self.tables().candles, limit))
    }

    async fn store_ratio(&self, sample: &RatioSample) -> Result<(), StorageError> {
        let capacity = self.capacity;
        bounded_insert(
            &mut self.tables().ratios,
            sample.timestamp,
            sample.clone(),
            capacity,
        );
        Ok(())
    }

    async fn get_recent_ratios(&self, limit: usize) -> Result<Vec<RatioSample>, StorageError> {
        Ok(newest(&self.tables().ratios, limit))
    }

    async fn store_trade(&self, trade: &TradeRecord) -> Result<(), StorageError> {
        self.tables().trades.push(trade.clone());
        Ok(())
    }

    async fn store_market_indicators(
        &self,
        record: &MarketIndicatorsRecord,
    ) -> Result<(), StorageError> {
        let capacity = self.capacity;
        bounded_insert(
            &mut self.tables().indicators,
            record.timestamp,
            record.clone(),
            capacity,
        );
        Ok(())
    }
}
