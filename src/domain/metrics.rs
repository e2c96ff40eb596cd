//! Performance summary of one run's realised profits.
//!
//! Every ratio falls back to 0 when its denominator is 0.

use serde::{Deserialize, Serialize};

/// Half-Kelly cap.
pub const MAX_KELLY_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KellyParams {
    pub win_rate: f64,
    pub odds: f64,
    /// Applied (half-Kelly, clamped) fraction.
    pub kelly_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub avg_win: f64,
    /// Magnitude of the mean losing trade.
    pub avg_loss: f64,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub trade_count: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub profit_rate_percent: f64,
    pub kelly: KellyParams,
    pub stats: TradeStats,
}

/// Largest peak-to-trough decline of the running sum of `profits`, as a
/// fraction of the peak. Non-positive peaks contribute nothing.
pub fn max_drawdown(profits: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak: Option<f64> = None;
    let mut max_dd = 0.0_f64;

    for p in profits {
        cumulative += p;
        let top = match peak {
            Some(prev) if prev >= cumulative => prev,
            _ => cumulative,
        };
        peak = Some(top);
        if top > 0.0 {
            max_dd = max_dd.max((top - cumulative) / top);
        }
    }
    max_dd
}

/// Raw Kelly fraction, floored at 0 for degenerate inputs.
pub fn raw_kelly(win_rate: f64, odds: f64) -> f64 {
    if odds.is_nan() || win_rate.is_nan() || odds <= 0.0 || win_rate <= 0.0 {
        return 0.0;
    }
    (odds * win_rate - (1.0 - win_rate)) / odds
}

/// Half of the raw Kelly fraction, clamped to `[0, 0.5]`.
pub fn kelly_fraction(win_rate: f64, odds: f64) -> f64 {
    let half = raw_kelly(win_rate, odds) / 2.0;
    if half.is_nan() {
        return 0.0;
    }
    half.clamp(0.0, MAX_KELLY_FRACTION)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Reduce the realised-profit sequence of one run.
pub fn summarize(profits: &[f64], initial_capital: f64) -> PerformanceSummary {
    let trade_count = profits.len();
    if trade_count == 0 {
        return PerformanceSummary::default();
    }

    let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = wins.len() as f64 / trade_count as f64;
    let total_profit: f64 = profits.iter().sum();
    let profit_rate_percent = if initial_capital > 0.0 {
        total_profit / initial_capital * 100.0
    } else {
        0.0
    };

    let avg_win = mean(&wins);
    let avg_loss = mean(&losses).abs();
    let odds = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };

    PerformanceSummary {
        trade_count,
        win_rate,
        total_profit,
        profit_rate_percent,
        kelly: KellyParams {
            win_rate,
            odds,
            kelly_fraction: kelly_fraction(win_rate, odds),
        },
        stats: TradeStats {
            avg_win,
            avg_loss,
            max_drawdown: max_drawdown(profits),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_profits_zeroed() {
        let s = summarize(&[], 10_000.0);
        assert_eq!(s, PerformanceSummary::default());
    }

    #[test]
    fn summary_of_mixed_trades() {
        let s = summarize(&[300.0, -100.0, 500.0, -200.0], 10_000.0);
        assert_eq!(s.trade_count, 4);
        assert_relative_eq!(s.win_rate, 0.5);
        assert_relative_eq!(s.total_profit, 500.0);
        assert_relative_eq!(s.profit_rate_percent, 5.0);
        assert_relative_eq!(s.stats.avg_win, 400.0);
        assert_relative_eq!(s.stats.avg_loss, 150.0);
        assert_relative_eq!(s.kelly.odds, 400.0 / 150.0, epsilon = 1e-12);
        // raw = (8/3 * 0.5 - 0.5) / (8/3) = 0.3125, half = 0.15625
        assert_relative_eq!(s.kelly.kelly_fraction, 0.15625, epsilon = 1e-12);
    }

    #[test]
    fn no_losers_means_zero_odds() {
        let s = summarize(&[100.0, 50.0], 10_000.0);
        assert_relative_eq!(s.win_rate, 1.0);
        assert_relative_eq!(s.kelly.odds, 0.0);
        assert_relative_eq!(s.kelly.kelly_fraction, 0.0);
    }

    #[test]
    fn break_even_trade_is_not_a_win() {
        let s = summarize(&[0.0, 10.0], 10_000.0);
        assert_relative_eq!(s.win_rate, 0.5);
    }

    #[test]
    fn kelly_clamped_to_half() {
        assert_relative_eq!(kelly_fraction(1.0, 3.0), 0.5);
        assert_relative_eq!(kelly_fraction(0.1, 0.5), 0.0);
        assert_relative_eq!(kelly_fraction(0.0, 2.0), 0.0);
        assert_relative_eq!(kelly_fraction(f64::NAN, 2.0), 0.0);
    }

    #[test]
    fn drawdown_short_sequences() {
        assert_relative_eq!(max_drawdown(&[]), 0.0);
        assert_relative_eq!(max_drawdown(&[-500.0]), 0.0);
        assert_relative_eq!(max_drawdown(&[500.0]), 0.0);
    }

    #[test]
    fn drawdown_from_cumulative_peak() {
        // cumulative: 100, 300, 150, 250
        assert_relative_eq!(max_drawdown(&[100.0, 200.0, -150.0, 100.0]), 0.5);
    }

    #[test]
    fn drawdown_ignores_non_positive_peak() {
        // cumulative: -100, -300
        assert_relative_eq!(max_drawdown(&[-100.0, -200.0]), 0.0);
    }
}
