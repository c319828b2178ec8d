//! Average True Range (ATR) indicator
//!
//! Measures market volatility by averaging true ranges over a period.
//! True Range is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! The first candle of a series has no previous close, so its true range is
//! its high-low range.

use crate::models::Candle;

/// True range per candle, aligned with the input.
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let range = candle.high - candle.low;
            match i.checked_sub(1).map(|p| candles[p].close) {
                Some(prev_close) => range
                    .max((candle.high - prev_close).abs())
                    .max((candle.low - prev_close).abs()),
                None => range,
            }
        })
        .collect()
}

/// Simple rolling mean of the last `period` true ranges.
///
/// Returns None if there are fewer than `period` candles.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let ranges = true_ranges(candles);
    let atr = ranges.iter().rev().take(period).sum::<f64>() / period as f64;

    atr.is_finite().then_some(atr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: 1_700_000_000_000 + i as i64 * 60_000,
                open,
                high,
                low,
                close,
                volume: 1000.0,
                quote_volume: None,
            })
            .collect()
    }

    #[test]
    fn test_calculate_atr() {
        // Low volatility market
        let candles = create_test_candles(&vec![(100.0, 101.0, 99.0, 100.0); 15]);
        let atr = calculate_atr(&candles, 14);

        // ATR equals the constant high-low range
        assert_eq!(atr, Some(2.0));
    }

    #[test]
    fn test_calculate_atr_high_volatility() {
        // High volatility market with gaps
        let high_vol_prices = vec![
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 110.0, 98.0, 105.0),
            (105.0, 108.0, 92.0, 95.0),
            (95.0, 103.0, 88.0, 100.0),
            (100.0, 115.0, 97.0, 110.0),
            (110.0, 112.0, 95.0, 98.0),
            (98.0, 108.0, 90.0, 105.0),
            (105.0, 120.0, 100.0, 115.0),
            (115.0, 118.0, 105.0, 110.0),
            (110.0, 125.0, 108.0, 120.0),
            (120.0, 130.0, 115.0, 125.0),
            (125.0, 128.0, 110.0, 115.0),
            (115.0, 122.0, 105.0, 118.0),
            (118.0, 130.0, 115.0, 125.0),
            (125.0, 135.0, 120.0, 130.0),
        ];

        let candles = create_test_candles(&high_vol_prices);
        let atr = calculate_atr(&candles, 14);

        assert!(atr.unwrap() > 10.0);
    }

    #[test]
    fn test_true_range_uses_previous_close_gap() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0), (110.0, 112.0, 109.0, 111.0)]);
        let ranges = true_ranges(&candles);

        assert_eq!(ranges, vec![2.0, 12.0]);
    }

    #[test]
    fn test_insufficient_data() {
        let candles = create_test_candles(&vec![(100.0, 101.0, 99.0, 100.0); 13]);
        assert!(calculate_atr(&candles, 14).is_none());
    }
}
