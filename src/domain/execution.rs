//! Trade executor: a single forward pass over one security's series.
//!
//! Signals on row `i` fill at row `i + 1`'s open. The last row has no next
//! open, so a signal there never fills. An open position at the end of the
//! series stays open and is valued at the last close.

use crate::domain::indicator_row::IndicatorRow;
use crate::domain::ledger::{LedgerEntry, TradeRecord};
use crate::domain::position::{step, AccountState, DayContext};
use crate::domain::signal::Signal;
use crate::domain::strategy_config::StrategyConfig;

#[derive(Debug, Clone)]
pub struct Execution {
    pub ledger: Vec<LedgerEntry>,
    pub trades: Vec<TradeRecord>,
    pub final_state: AccountState,
    /// Cash plus any open position at the last close.
    pub final_value: f64,
}

impl Execution {
    /// Realised profit of every completed round trip, in exit order.
    pub fn realized_profits(&self) -> Vec<f64> {
        self.trades
            .iter()
            .filter(|t| t.is_sell())
            .filter_map(|t| t.profit)
            .collect()
    }

    pub fn open_position(&self) -> bool {
        self.final_state.is_long()
    }
}

/// Walk `rows` once, applying `signals` under `config`.
///
/// `signals` must be the output of `generate_signals` for the same rows.
pub fn execute_trades(
    rows: &[IndicatorRow],
    signals: &[Signal],
    config: &StrategyConfig,
) -> Execution {
    let mut state = AccountState::new(config.initial_capital);
    let mut ledger = Vec::with_capacity(rows.len());
    let mut trades = Vec::new();

    for (i, (row, signal)) in rows.iter().zip(signals).enumerate() {
        let next = rows.get(i + 1);
        let ctx = DayContext {
            index: i,
            row,
            prev_close: i.checked_sub(1).map(|p| rows[p].close),
            next_open: next.map(|n| n.open),
            next_date: next.map(|n| n.trade_date),
            signal: *signal,
            min_hold_days: config.min_hold_days,
        };

        let outcome = step(&state, &ctx);
        state = outcome.state;
        ledger.push(outcome.entry);
        trades.extend(outcome.trade);
    }

    let final_value = rows
        .last()
        .map_or(state.cash(), |last| state.market_value(last.close));

    Execution {
        ledger,
        trades,
        final_state: state,
        final_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Side;
    use crate::domain::signal::{BuyReason, SellReason};
    use chrono::NaiveDate;

    fn row(day: u32, open: f64, close: f64) -> IndicatorRow {
        IndicatorRow {
            trade_date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1000.0,
            pct_chg: 0.0,
            main_net_rate: 0.0,
            ma: close,
            ma_std: 0.1,
            upper_band: close + 0.2,
            lower_band: close - 0.2,
            rsd: 1.0,
            rsd_chg: 0.0,
            prev_rsd: 1.0,
            band_price_position: 0.5,
            prev_band_price_position: 0.5,
            ma_slope: 0.0,
            close_slope: 0.0,
        }
    }

    fn buy() -> Signal {
        Signal {
            buy: Some(BuyReason::MainNetRate),
            sell: None,
        }
    }

    fn sell() -> Signal {
        Signal {
            buy: None,
            sell: Some(SellReason::ProfitTake),
        }
    }

    #[test]
    fn no_signals_keeps_capital() {
        let rows = vec![row(1, 10.0, 10.0), row(2, 10.0, 11.0)];
        let exec = execute_trades(&rows, &[Signal::default(); 2], &StrategyConfig::default());
        assert!(exec.trades.is_empty());
        assert_eq!(exec.ledger.len(), 2);
        assert!((exec.final_value - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn round_trip_with_min_hold() {
        let rows = vec![
            row(1, 9.0, 9.5),
            row(2, 10.0, 10.5),
            row(5, 10.5, 11.0),
            row(6, 11.0, 11.5),
            row(7, 12.0, 12.0),
        ];
        let signals = [buy(), sell(), Signal::default(), sell(), Signal::default()];
        let exec = execute_trades(&rows, &signals, &StrategyConfig::default());

        assert_eq!(exec.trades.len(), 2);
        assert_eq!(exec.trades[0].side, Side::Buy);
        assert_eq!(exec.trades[0].fill_date, rows[1].trade_date);
        let exit = &exec.trades[1];
        assert_eq!(exit.signal_date, rows[3].trade_date);
        assert!((exit.price - 12.0).abs() < f64::EPSILON);
        assert_eq!(exec.realized_profits(), vec![2000.0]);
        assert!(!exec.open_position());
        assert!((exec.final_value - 12_000.0).abs() < 1e-9);
    }

    #[test]
    fn last_row_signal_never_fills() {
        let rows = vec![row(1, 10.0, 10.0), row(2, 10.0, 10.0)];
        let exec = execute_trades(
            &rows,
            &[Signal::default(), buy()],
            &StrategyConfig::default(),
        );
        assert!(exec.trades.is_empty());
        assert!(exec.ledger[1].buy_eligible);
    }

    #[test]
    fn open_position_valued_at_last_close() {
        let rows = vec![row(1, 10.0, 10.0), row(2, 10.0, 11.0)];
        let exec = execute_trades(
            &rows,
            &[buy(), Signal::default()],
            &StrategyConfig::default(),
        );
        assert!(exec.open_position());
        assert!(exec.realized_profits().is_empty());
        assert!((exec.final_value - 11_000.0).abs() < 1e-9);
    }

    #[test]
    fn sell_on_last_row_leaves_position_open() {
        let rows = vec![
            row(1, 10.0, 10.0),
            row(2, 10.0, 10.5),
            row(3, 10.5, 11.0),
            row(4, 11.0, 12.0),
        ];
        let signals = [buy(), Signal::default(), Signal::default(), sell()];
        let exec = execute_trades(&rows, &signals, &StrategyConfig::default());

        assert_eq!(exec.trades.len(), 1);
        assert_eq!(exec.trades[0].side, Side::Buy);
        assert!(exec.ledger[3].sell_eligible);
        assert!(exec.open_position());
        assert!(exec.realized_profits().is_empty());
        assert!((exec.final_value - 12_000.0).abs() < 1e-9);
    }

    #[test]
    fn wiped_out_account_does_not_reenter() {
        let rows = vec![
            row(1, 10.0, 10.0),
            row(2, 10.0, 10.0),
            row(3, 10.0, 10.0),
            row(4, 0.0, 0.0),
            row(5, 5.0, 5.0),
            row(6, 6.0, 6.0),
        ];
        let signals = [
            buy(),
            Signal::default(),
            sell(),
            buy(),
            Signal::default(),
            sell(),
        ];
        let exec = execute_trades(&rows, &signals, &StrategyConfig::default());

        assert_eq!(exec.trades.len(), 2);
        assert_eq!(exec.realized_profits(), vec![-10_000.0]);
        assert!(exec.ledger[3].buy_eligible);
        assert!(!exec.open_position());
        assert!(exec.final_value.abs() < f64::EPSILON);
    }
}
