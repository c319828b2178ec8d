use crate::error::Result;
use crate::models::{OrderType, Position, Side};
use async_trait::async_trait;

/// Entry order with a preset stop-loss.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub leverage: u32,
    pub stop_loss_price: f64,
    /// 0 disables the take-profit leg
    pub take_profit_price: f64,
    pub order_type: OrderType,
    pub price: f64,
}

impl OpenOrder {
    /// Limit entry at `price` with the stop `stop_loss_pct` percent against the side.
    pub fn limit_with_stop(
        symbol: &str,
        side: Side,
        size: f64,
        leverage: u32,
        price: f64,
        stop_loss_pct: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            size,
            leverage,
            stop_loss_price: stop_loss_price(side, price, stop_loss_pct),
            take_profit_price: 0.0,
            order_type: OrderType::Limit,
            price,
        }
    }
}

/// Stop price `stop_loss_pct` percent against the position.
pub fn stop_loss_price(side: Side, entry_price: f64, stop_loss_pct: f64) -> f64 {
    match side {
        Side::Long => entry_price * (1.0 - stop_loss_pct / 100.0),
        Side::Short => entry_price * (1.0 + stop_loss_pct / 100.0),
    }
}

/// Order placement and position queries against a venue.
///
/// `Err` from `open_position` / `close_position_at_market` means the order
/// was not accepted and nothing changed on the venue.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Available margin balance in the quote currency.
    async fn get_account_balance(&self) -> Result<f64>;

    /// The open position for `symbol`, if any.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>>;

    async fn open_position(&self, order: &OpenOrder) -> Result<()>;

    /// Flatten the whole position at market.
    async fn close_position_at_market(&self, position: &Position) -> Result<()>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;
}
