use super::executor::{OpenOrder, OrderExecutor};
use crate::error::{Error, Result};
use crate::market::MarketObserver;
use crate::models::{MarketEvent, Position};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct PaperBook {
    balance: f64,
    position: Option<Position>,
    /// Price used to fill market closes
    last_price: Option<f64>,
    orders_placed: u32,
}

/// Simulated venue holding a cash balance and at most one position.
///
/// Entries fill immediately at the order price. Closes fill at the last
/// marked price, falling back to entry.
pub struct PaperExecutor {
    book: Mutex<PaperBook>,
}

impl PaperExecutor {
    pub fn new(initial_balance: f64) -> Self {
        tracing::info!(initial_balance, "Paper trading executor ready");
        Self {
            book: Mutex::new(PaperBook {
                balance: initial_balance,
                position: None,
                last_price: None,
                orders_placed: 0,
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        match self.book.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the latest traded price and update unrealized PnL.
    pub fn mark_price(&self, price: f64) {
        let mut book = self.book();
        book.last_price = Some(price);
        if let Some(position) = book.position.as_mut() {
            position.mark(price);
        }
    }

    /// Drop the position without settling, as a venue-side stop would.
    pub fn force_flat(&self) -> Option<Position> {
        self.book().position.take()
    }

    pub fn balance(&self) -> f64 {
        self.book().balance
    }

    pub fn orders_placed(&self) -> u32 {
        self.book().orders_placed
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn get_account_balance(&self) -> Result<f64> {
        Ok(self.book().balance)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .book()
            .position
            .clone()
            .filter(|p| p.symbol == symbol))
    }

    async fn open_position(&self, order: &OpenOrder) -> Result<()> {
        let mut book = self.book();
        if book.position.is_some() {
            return Err(Error::Order("paper book already holds a position".to_string()));
        }
        if order.size <= 0.0 || order.price <= 0.0 {
            return Err(Error::Order(format!(
                "invalid paper order size={} price={}",
                order.size, order.price
            )));
        }

        let margin = order.size * order.price / order.leverage.max(1) as f64;
        if margin > book.balance {
            return Err(Error::Order(format!(
                "insufficient paper balance: need {:.2}, have {:.2}",
                margin, book.balance
            )));
        }

        book.position = Some(Position {
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.size,
            entry_price: order.price,
            leverage: order.leverage,
            unrealized_pnl_pct: 0.0,
        });
        book.last_price = Some(order.price);
        book.orders_placed += 1;

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            size = order.size,
            price = order.price,
            "[PAPER] Position opened"
        );
        Ok(())
    }

    async fn close_position_at_market(&self, position: &Position) -> Result<()> {
        let mut book = self.book();
        let held = match book.position.take() {
            Some(held) if held.symbol == position.symbol => held,
            other => {
                book.position = other;
                return Err(Error::Order(format!(
                    "no paper position for {}",
                    position.symbol
                )));
            }
        };

        let exit_price = book.last_price.unwrap_or(held.entry_price);
        let pnl = held.pnl_at(exit_price);
        book.balance += pnl;
        book.orders_placed += 1;

        tracing::info!(
            symbol = %held.symbol,
            side = %held.side,
            exit_price,
            pnl,
            balance = book.balance,
            "[PAPER] Position closed"
        );
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<()> {
        Ok(())
    }
}

/// Marks the paper book on every streamed candle close.
#[async_trait]
impl MarketObserver for PaperExecutor {
    fn name(&self) -> &str {
        "paper_executor"
    }

    async fn on_event(&self, event: &MarketEvent) -> anyhow::Result<()> {
        if let MarketEvent::Candle(candle) = event {
            self.mark_price(candle.close);
        }
        Ok(())
    }
}
