/// True when `new` differs from `old` by more than `threshold` (relative).
///
/// Always true when there is no previous value.
pub fn significant_change(new: f64, old: Option<f64>, threshold: f64) -> bool {
    match old {
        None => true,
        Some(old) if old == 0.0 => new != 0.0,
        Some(old) => ((new - old) / old).abs() > threshold,
    }
}

/// Ordinary least-squares slope of value against index.
///
/// Returns 0 for fewer than 2 points.
pub fn trend_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }

    let slope = cov / var;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

/// Second difference `(c - b) - (b - a)` of exactly three values, else 0.
pub fn second_difference(values: &[f64]) -> f64 {
    match values {
        [a, b, c] => {
            let accel = (c - b) - (b - a);
            if accel.is_finite() {
                accel
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Percentage change between consecutive values. Pairs starting at zero are skipped.
pub fn pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect()
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some((mean, var.sqrt()))
}
