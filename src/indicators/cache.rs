use super::atr::calculate_atr;
use super::moving_average::calculate_ema;
use super::open_interest::{calculate_oi_indicators, OiIndicators, OiTrendSignal};
use super::rolling::{Admit, RollingWindow};
use super::rsi::{calculate_stoch_rsi, NEUTRAL_RSI};
use super::trend::{second_difference, significant_change, trend_slope};
use crate::config::IndicatorConfig;
use crate::error::{Error, Result};
use crate::models::{Candle, MarketIndicatorsRecord, OpenInterestSample, RatioSample};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const EMA_FAST: usize = 7;
pub const EMA_MID: usize = 25;
pub const EMA_SLOW: usize = 200;
pub const STOCH_PERIOD: usize = 42;
pub const STOCH_SMOOTH_K: usize = 3;
pub const STOCH_SMOOTH_D: usize = 3;
pub const ATR_PERIOD: usize = 14;

/// Candle-derived indicators. A `None` field could not be computed or was not finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Technicals {
    pub last_close: Option<f64>,
    pub last_volume: Option<f64>,
    /// Close-to-close change of the newest candle
    pub price_change: Option<f64>,
    pub ema7: Option<f64>,
    pub ema25: Option<f64>,
    pub ema200: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub atr: Option<f64>,
}

/// Ratio and OI trend inputs for the strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketIndicators {
    pub oi_slope: f64,
    pub ls_ratio_slope: f64,
    pub ls_ratio_acceleration: f64,
    pub open_interest: Option<f64>,
    pub long_ratio: Option<f64>,
    pub short_ratio: Option<f64>,
    pub long_short_ratio: Option<f64>,
}

/// Consistent view of every indicator, taken under one read lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    /// Timestamp of the newest candle
    pub timestamp: Option<i64>,
    pub technicals: Technicals,
    pub market: MarketIndicators,
    pub oi: Option<OiIndicators>,
    pub oi_signal: OiTrendSignal,
}

impl IndicatorSnapshot {
    pub fn price(&self) -> Option<f64> {
        self.technicals.last_close
    }

    /// OI-RSI, neutral when there is not enough OI history.
    pub fn oi_rsi(&self) -> f64 {
        self.oi.map(|oi| oi.oi_rsi).unwrap_or(NEUTRAL_RSI)
    }

    /// Flat key/value view. Missing or non-finite values are omitted.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        let t = &self.technicals;
        let m = &self.market;
        let mut entries: Vec<(&'static str, Option<f64>)> = vec![
            ("last_close", t.last_close),
            ("last_volume", t.last_volume),
            ("price_change", t.price_change),
            ("ema7", t.ema7),
            ("ema25", t.ema25),
            ("ema200", t.ema200),
            ("stoch_k", t.stoch_k),
            ("stoch_d", t.stoch_d),
            ("atr", t.atr),
            ("oi_slope", Some(m.oi_slope)),
            ("ls_ratio_slope", Some(m.ls_ratio_slope)),
            ("ls_ratio_acceleration", Some(m.ls_ratio_acceleration)),
            ("open_interest", m.open_interest),
            ("long_ratio", m.long_ratio),
            ("short_ratio", m.short_ratio),
            ("long_short_ratio", m.long_short_ratio),
            ("oi_rsi", Some(self.oi_rsi())),
        ];
        if let Some(oi) = &self.oi {
            entries.extend([
                ("oi_mean", Some(oi.mean)),
                ("oi_std", Some(oi.std)),
                ("oi_pct_change", Some(oi.pct_change)),
                ("oi_momentum5", Some(oi.momentum5)),
                ("oi_momentum20", Some(oi.momentum20)),
                ("oi_z_score", Some(oi.z_score)),
                ("oi_volatility", Some(oi.volatility)),
            ]);
        }

        entries
            .into_iter()
            .filter_map(|(key, value)| value.and_then(finite).map(|v| (key, v)))
            .collect()
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

struct Buffers {
    candles: RollingWindow<Candle>,
    open_interest: RollingWindow<OpenInterestSample>,
    ratios: RollingWindow<RatioSample>,
}

/// Thread-safe rolling buffers for candles, open interest and position ratios.
///
/// Clones share the same buffers. Writers take the lock only for the push.
#[derive(Clone)]
pub struct IndicatorCache {
    inner: Arc<RwLock<Buffers>>,
}

impl IndicatorCache {
    pub fn new(config: &IndicatorConfig) -> Self {
        let oi_threshold = config.change_threshold;
        let ratio_threshold = config.change_threshold;

        let buffers = Buffers {
            candles: RollingWindow::new(config.candle_capacity),
            open_interest: RollingWindow::with_admission(
                config.oi_capacity,
                Box::new(move |last: Option<&OpenInterestSample>, new: &OpenInterestSample| {
                    significant_change(new.value, last.map(|l| l.value), oi_threshold)
                }),
            ),
            ratios: RollingWindow::with_admission(
                config.ratio_capacity,
                Box::new(move |last: Option<&RatioSample>, new: &RatioSample| {
                    significant_change(
                        new.long_short_ratio,
                        last.map(|l| l.long_short_ratio),
                        ratio_threshold,
                    )
                }),
            ),
        };

        Self {
            inner: Arc::new(RwLock::new(buffers)),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Buffers>> {
        self.inner.read().map_err(|e| Error::Lock(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Buffers>> {
        self.inner.write().map_err(|e| Error::Lock(e.to_string()))
    }

    /// Upsert the newest candle.
    pub fn update_candle(&self, candle: Candle) -> Result<Admit> {
        let ts = candle.timestamp;
        let admit = self.write()?.candles.push(candle);
        if !admit.is_admitted() {
            tracing::debug!(timestamp = ts, ?admit, "Candle rejected");
        }
        Ok(admit)
    }

    /// Admit an open-interest sample if it changed significantly.
    pub fn admit_open_interest(&self, sample: OpenInterestSample) -> Result<Admit> {
        let value = sample.value;
        let mut buffers = self.write()?;
        let admit = buffers.open_interest.push(sample);
        if admit.is_admitted() {
            tracing::info!(
                open_interest = value,
                cache_size = buffers.open_interest.len(),
                "OI update"
            );
        }
        Ok(admit)
    }

    /// Admit a position-ratio sample if its long/short ratio changed significantly.
    pub fn admit_ratio(&self, sample: RatioSample) -> Result<Admit> {
        let ratio = sample.long_short_ratio;
        let admit = self.write()?.ratios.push(sample);
        if admit.is_admitted() {
            tracing::info!(long_short_ratio = ratio, "New L/S ratio stored");
        }
        Ok(admit)
    }

    /// Seed the buffers from stored history (oldest to newest).
    pub fn warm_up(&self, candles: Vec<Candle>, ratios: Vec<RatioSample>) -> Result<usize> {
        let mut buffers = self.write()?;
        let mut loaded = 0;
        for candle in candles {
            if buffers.candles.push(candle).is_admitted() {
                loaded += 1;
            }
        }
        for ratio in ratios {
            if buffers.ratios.push(ratio).is_admitted() {
                loaded += 1;
            }
        }

        tracing::info!(
            candles = buffers.candles.len(),
            ratios = buffers.ratios.len(),
            "Initialized indicator cache from storage"
        );
        Ok(loaded)
    }

    pub fn latest_candle(&self) -> Result<Option<Candle>> {
        Ok(self.read()?.candles.latest().cloned())
    }

    pub fn latest_price(&self) -> Result<Option<f64>> {
        Ok(self.read()?.candles.latest().map(|c| c.close))
    }

    /// The `n` newest candles, oldest first.
    pub fn recent_candles(&self, n: usize) -> Result<Vec<Candle>> {
        Ok(self.read()?.candles.recent(n))
    }

    pub fn ratio_history(&self) -> Result<Vec<RatioSample>> {
        Ok(self.read()?.ratios.iter().cloned().collect())
    }

    pub fn open_interest_history(&self) -> Result<Vec<OpenInterestSample>> {
        Ok(self.read()?.open_interest.iter().cloned().collect())
    }

    /// Second difference of the last three long/short ratios.
    pub fn ratio_acceleration(&self) -> Result<f64> {
        let buffers = self.read()?;
        Ok(second_difference(&last_ratios(&buffers, 3)))
    }

    pub fn oi_indicators(&self) -> Result<Option<OiIndicators>> {
        let buffers = self.read()?;
        Ok(calculate_oi_indicators(
            &buffers.open_interest.values(|s| s.value),
        ))
    }

    pub fn oi_trend_signal(&self) -> Result<OiTrendSignal> {
        Ok(self
            .oi_indicators()?
            .map(|ind| ind.trend_signal())
            .unwrap_or_default())
    }

    pub fn snapshot(&self) -> Result<IndicatorSnapshot> {
        let buffers = self.read()?;
        let oi = calculate_oi_indicators(&buffers.open_interest.values(|s| s.value));

        Ok(IndicatorSnapshot {
            timestamp: buffers.candles.latest().map(|c| c.timestamp),
            technicals: technicals(&buffers.candles),
            market: market_indicators(&buffers),
            oi,
            oi_signal: oi.map(|ind| ind.trend_signal()).unwrap_or_default(),
        })
    }

    /// Row persisted after every admitted OI or ratio sample.
    pub fn market_indicators_record(&self, timestamp: i64) -> Result<MarketIndicatorsRecord> {
        let buffers = self.read()?;
        let market = market_indicators(&buffers);

        Ok(MarketIndicatorsRecord {
            timestamp,
            open_interest: market.open_interest.unwrap_or(0.0),
            long_ratio: market.long_ratio.unwrap_or(50.0),
            short_ratio: market.short_ratio.unwrap_or(50.0),
            long_short_ratio: market.long_short_ratio.unwrap_or(1.0),
            oi_slope: market.oi_slope,
            ls_ratio_slope: market.ls_ratio_slope,
            ls_ratio_acceleration: market.ls_ratio_acceleration,
        })
    }

    pub fn lens(&self) -> Result<(usize, usize, usize)> {
        let buffers = self.read()?;
        Ok((
            buffers.candles.len(),
            buffers.open_interest.len(),
            buffers.ratios.len(),
        ))
    }
}

fn last_ratios(buffers: &Buffers, n: usize) -> Vec<f64> {
    buffers
        .ratios
        .recent(n)
        .iter()
        .map(|r| r.long_short_ratio)
        .collect()
}

fn technicals(candles: &RollingWindow<Candle>) -> Technicals {
    if candles.len() < 2 {
        return Technicals::default();
    }

    let closes = candles.values(|c| c.close);
    let last = candles.latest();
    let prev_close = closes[closes.len() - 2];
    let last_close = closes[closes.len() - 1];

    let stoch = calculate_stoch_rsi(&closes, STOCH_PERIOD, STOCH_SMOOTH_K, STOCH_SMOOTH_D);

    Technicals {
        last_close: finite(last_close),
        last_volume: last.map(|c| c.volume).and_then(finite),
        price_change: finite(last_close - prev_close),
        ema7: calculate_ema(&closes, EMA_FAST).and_then(finite),
        ema25: calculate_ema(&closes, EMA_MID).and_then(finite),
        ema200: calculate_ema(&closes, EMA_SLOW).and_then(finite),
        stoch_k: finite(stoch.k),
        stoch_d: finite(stoch.d),
        atr: calculate_atr(&candles.recent(ATR_PERIOD * 2), ATR_PERIOD).and_then(finite),
    }
}

fn market_indicators(buffers: &Buffers) -> MarketIndicators {
    let oi_values = buffers.open_interest.values(|s| s.value);
    let ls_values = buffers.ratios.values(|r| r.long_short_ratio);
    let latest_ratio = buffers.ratios.latest();

    MarketIndicators {
        oi_slope: trend_slope(&oi_values),
        ls_ratio_slope: trend_slope(&ls_values),
        ls_ratio_acceleration: second_difference(&last_ratios(buffers, 3)),
        open_interest: oi_values.last().copied(),
        long_ratio: latest_ratio.map(|r| r.long_ratio),
        short_ratio: latest_ratio.map(|r| r.short_ratio),
        long_short_ratio: latest_ratio.map(|r| r.long_short_ratio),
    }
}
