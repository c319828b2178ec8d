/// Neutral RSI reading used whenever there is not enough data.
pub const NEUTRAL_RSI: f64 = 50.0;

/// Relative Strength Index over an already-differenced series (absolute or
/// percentage changes). Above 70 reads overbought, below 30 oversold.
///
/// Uses the simple average of the last `period` gains and losses.
/// Only gains reads 100, a completely flat window reads 50.
pub fn rsi_from_changes(changes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || changes.len() < period {
        return None;
    }

    let window = &changes[changes.len() - period..];
    let avg_gain = window.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let avg_loss = window
        .iter()
        .filter(|c| **c < 0.0)
        .map(|c| c.abs())
        .sum::<f64>()
        / period as f64;

    if avg_loss == 0.0 {
        return Some(if avg_gain > 0.0 { 100.0 } else { NEUTRAL_RSI });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Stochastic RSI %K and %D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochRsi {
    pub k: f64,
    pub d: f64,
}

impl StochRsi {
    pub const NEUTRAL: StochRsi = StochRsi {
        k: NEUTRAL_RSI,
        d: NEUTRAL_RSI,
    };
}

/// Stochastic RSI with `%K = SMA(stoch, smooth_k)` and `%D = SMA(%K, smooth_d)`.
///
/// The RSI series uses rolling-mean gains and losses over `period`, and the
/// stochastic normalizes each RSI against the min/max of the last `period`
/// RSI values. Fewer than `2 * period` prices, or any undefined value in the
/// final window (flat RSI range), yields [`StochRsi::NEUTRAL`].
pub fn calculate_stoch_rsi(
    prices: &[f64],
    period: usize,
    smooth_k: usize,
    smooth_d: usize,
) -> StochRsi {
    if period == 0 || smooth_k == 0 || smooth_d == 0 || prices.len() < period * 2 {
        return StochRsi::NEUTRAL;
    }

    let rsi = rolling_rsi_series(prices, period);
    let stoch = rolling_stochastic(&rsi, period);
    let k = rolling_mean(&stoch, smooth_k);
    let d = rolling_mean(&k, smooth_d);

    match (k.last(), d.last()) {
        (Some(k), Some(d)) if k.is_finite() && d.is_finite() => StochRsi { k: *k, d: *d },
        _ => StochRsi::NEUTRAL,
    }
}

/// RSI per price index. Undefined entries are NaN.
fn rolling_rsi_series(prices: &[f64], period: usize) -> Vec<f64> {
    let mut series = vec![f64::NAN; prices.len()];
    let mut gains = vec![0.0; prices.len()];
    let mut losses = vec![0.0; prices.len()];

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    for i in period..prices.len() {
        let start = i + 1 - period;
        let avg_gain = gains[start..=i].iter().sum::<f64>() / period as f64;
        let avg_loss = losses[start..=i].iter().sum::<f64>() / period as f64;

        series[i] = if avg_loss == 0.0 {
            if avg_gain > 0.0 {
                100.0
            } else {
                f64::NAN
            }
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
    }

    series
}

fn rolling_stochastic(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in period.saturating_sub(1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max > min {
            out[i] = (values[i] - min) / (max - min) * 100.0;
        }
    }
    out
}

fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in period.saturating_sub(1)..values.len() {
        // NaN propagates through the sum
        out[i] = values[i + 1 - period..=i].iter().sum::<f64>() / period as f64;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
        let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        rsi_from_changes(&changes, period)
    }

    #[test]
    fn test_rsi_calculation() {
        // Test with known values
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.is_some());

        let rsi_value = rsi.unwrap();
        assert!(rsi_value > 0.0 && rsi_value < 100.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = calculate_rsi(&prices, 5);
        assert_eq!(rsi, Some(100.0)); // All gains = RSI 100
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let changes = vec![0.0; 14];
        assert_eq!(rsi_from_changes(&changes, 14), Some(NEUTRAL_RSI));
    }

    #[test]
    fn test_rsi_from_pct_changes_uses_last_window() {
        // Older losses fall outside the window
        let mut changes = vec![-5.0; 10];
        changes.extend(vec![1.0; 14]);
        assert_eq!(rsi_from_changes(&changes, 14), Some(100.0));

        let mixed: Vec<f64> = (0..14).map(|i| if i % 2 == 0 { 2.0 } else { -1.0 }).collect();
        let rsi = rsi_from_changes(&mixed, 14).unwrap();
        assert!((rsi - 66.666_666).abs() < 1e-3);
    }

    #[test]
    fn test_stoch_rsi_insufficient_data_is_neutral() {
        let prices: Vec<f64> = (0..83).map(|i| 100.0 + i as f64).collect();
        assert_eq!(calculate_stoch_rsi(&prices, 42, 3, 3), StochRsi::NEUTRAL);
    }

    #[test]
    fn test_stoch_rsi_flat_market_is_neutral() {
        let prices = vec![100.0; 150];
        assert_eq!(calculate_stoch_rsi(&prices, 42, 3, 3), StochRsi::NEUTRAL);
    }

    #[test]
    fn test_stoch_rsi_bounded() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05)
            .collect();

        let stoch = calculate_stoch_rsi(&prices, 42, 3, 3);
        assert!((0.0..=100.0).contains(&stoch.k));
        assert!((0.0..=100.0).contains(&stoch.d));
    }
}
