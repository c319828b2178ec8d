/// Contracts to open, floored to 3 decimals.
///
/// Returns 0 when the price is not positive or the balance is empty.
pub fn position_size(available_balance: f64, position_size_pct: f64, leverage: u32, price: f64) -> f64 {
    if price <= 0.0 || available_balance <= 0.0 || !price.is_finite() {
        return 0.0;
    }
    let trade_amount = available_balance * (position_size_pct / 100.0);
    let size = trade_amount * leverage as f64 / price;
    (size * 1000.0).floor() / 1000.0
}

/// Leverage scaled down as volatility rises above `base_volatility`.
///
/// Zero or non-finite volatility keeps `max_leverage`.
pub fn adjust_leverage(volatility: f64, base_volatility: f64, max_leverage: u32, min_leverage: u32) -> u32 {
    let ratio = if volatility > 0.0 && volatility.is_finite() {
        base_volatility / volatility
    } else {
        1.0
    };

    let scaled = (max_leverage as f64 * ratio).floor();
    let floor = min_leverage.min(max_leverage) as f64;
    scaled.clamp(floor, max_leverage as f64) as u32
}
