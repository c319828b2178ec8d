/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Mean of the last `period` values, or of all of them when shorter.
pub fn trailing_mean(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let take = period.min(values.len());
    Some(values.iter().rev().take(take).sum::<f64>() / take as f64)
}

/// Calculate Exponential Moving Average (EMA)
///
/// Recursive smoothing with `alpha = 2 / (period + 1)`, seeded with the first
/// price, so a value exists as soon as there is one price.
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    let (first, rest) = prices.split_first()?;
    let alpha = 2.0 / (period as f64 + 1.0);

    let mut ema = *first;
    for price in rest {
        ema = (price - ema) * alpha + ema;
    }

    Some(ema)
}
