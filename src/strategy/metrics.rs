use serde::Serialize;

/// Running statistics over closed trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradingMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

impl TradingMetrics {
    /// Record one closed trade. A zero PnL counts as a loss.
    pub fn update(&mut self, pnl: f64) {
        self.total_trades += 1;
        self.total_pnl += pnl;

        if pnl > 0.0 {
            self.winning_trades += 1;
            self.largest_win = self.largest_win.max(pnl);
        } else {
            self.losing_trades += 1;
            self.largest_loss = self.largest_loss.min(pnl);
        }
    }

    /// Percentage of winning trades, 0 before the first trade.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_update() {
        let mut metrics = TradingMetrics::default();
        assert_eq!(metrics.win_rate(), 0.0);

        metrics.update(12.5);
        metrics.update(-4.0);
        metrics.update(3.0);
        metrics.update(-9.0);

        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 2);
        assert!((metrics.total_pnl - 2.5).abs() < 1e-9);
        assert_eq!(metrics.largest_win, 12.5);
        assert_eq!(metrics.largest_loss, -9.0);
        assert_eq!(metrics.win_rate(), 50.0);
    }
}
