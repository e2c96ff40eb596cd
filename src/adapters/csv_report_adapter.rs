//! CSV batch report: summary, trade tape and per-day ledger.

use crate::domain::backtest::{BacktestResult, BatchReport};
use crate::domain::error::BandtraderError;
use crate::domain::ledger::{LedgerEntry, Side, TradeRecord};
use crate::domain::strategy_config::StrategyConfig;
use crate::ports::report_port::ReportPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

pub const SUMMARY_FILE: &str = "summary_results.csv";
pub const TRADES_FILE: &str = "trades.csv";
pub const DETAILS_FILE: &str = "backtest_details.csv";

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    code: &'a str,
    status: &'a str,
    trade_count: usize,
    win_rate: f64,
    total_profit: f64,
    profit_rate_percent: f64,
    kelly_win_rate: f64,
    kelly_odds: f64,
    kelly_fraction: f64,
    avg_win: f64,
    avg_loss: f64,
    max_drawdown: f64,
    final_value: f64,
    open_position: bool,
    error: &'a str,
}

impl<'a> SummaryRow<'a> {
    fn from_result(r: &'a BacktestResult, status: &'a str, error: &'a str) -> Self {
        let s = &r.summary;
        SummaryRow {
            code: &r.code,
            status,
            trade_count: s.trade_count,
            win_rate: s.win_rate,
            total_profit: s.total_profit,
            profit_rate_percent: s.profit_rate_percent,
            kelly_win_rate: s.kelly.win_rate,
            kelly_odds: s.kelly.odds,
            kelly_fraction: s.kelly.kelly_fraction,
            avg_win: s.stats.avg_win,
            avg_loss: s.stats.avg_loss,
            max_drawdown: s.stats.max_drawdown,
            final_value: r.final_value,
            open_position: r.open_position,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    code: &'a str,
    signal_date: NaiveDate,
    fill_date: NaiveDate,
    side: Side,
    price: f64,
    quantity: f64,
    profit: Option<f64>,
    return_rate: Option<f64>,
    reason: &'a str,
}

impl<'a> TradeRow<'a> {
    fn new(code: &'a str, t: &'a TradeRecord) -> Self {
        TradeRow {
            code,
            signal_date: t.signal_date,
            fill_date: t.fill_date,
            side: t.side,
            price: t.price,
            quantity: t.quantity,
            profit: t.profit,
            return_rate: t.return_rate,
            reason: &t.reason,
        }
    }
}

#[derive(Debug, Serialize)]
struct DetailRow<'a> {
    code: &'a str,
    date: NaiveDate,
    close: f64,
    signal: Option<Side>,
    execution_price: Option<f64>,
    bought: f64,
    sold: f64,
    trade_profit: Option<f64>,
    trade_return: Option<f64>,
    cumulative_profit: f64,
    cash: f64,
    position: f64,
    position_value: f64,
    portfolio_value: f64,
    reason: &'a str,
    unrealized_return: Option<f64>,
    max_profit: Option<f64>,
    high_water_updated: Option<bool>,
    buy_eligible: bool,
    sell_eligible: bool,
}

impl<'a> DetailRow<'a> {
    fn new(code: &'a str, e: &'a LedgerEntry) -> Self {
        DetailRow {
            code,
            date: e.date,
            close: e.close,
            signal: e.signal,
            execution_price: e.execution_price,
            bought: e.bought,
            sold: e.sold,
            trade_profit: e.trade_profit,
            trade_return: e.trade_return,
            cumulative_profit: e.cumulative_profit,
            cash: e.cash,
            position: e.position,
            position_value: e.position_value,
            portfolio_value: e.portfolio_value,
            reason: &e.reason,
            unrealized_return: e.unrealized_return,
            max_profit: e.max_profit,
            high_water_updated: e.high_water_updated,
            buy_eligible: e.buy_eligible,
            sell_eligible: e.sell_eligible,
        }
    }
}

/// Writes the three report files into the output directory, creating it
/// when needed. Failed securities appear in the summary as zeroed rows.
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    fn write_summary(
        path: &Path,
        report: &BatchReport,
        config: &StrategyConfig,
    ) -> Result<(), BandtraderError> {
        let mut wtr = csv::Writer::from_path(path)?;
        for r in &report.results {
            wtr.serialize(SummaryRow::from_result(r, "ok", ""))?;
        }
        let zeroed: Vec<BacktestResult> = report
            .failures
            .iter()
            .map(|f| BacktestResult::zeroed(&f.code, config.initial_capital))
            .collect();
        for (r, f) in zeroed.iter().zip(&report.failures) {
            let status = if f.rejected { "rejected" } else { "failed" };
            wtr.serialize(SummaryRow::from_result(r, status, &f.reason))?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_trades(path: &Path, report: &BatchReport) -> Result<(), BandtraderError> {
        let mut wtr = csv::Writer::from_path(path)?;
        for r in &report.results {
            for t in &r.trades {
                wtr.serialize(TradeRow::new(&r.code, t))?;
            }
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_details(path: &Path, report: &BatchReport) -> Result<(), BandtraderError> {
        let mut wtr = csv::Writer::from_path(path)?;
        for r in &report.results {
            for e in &r.ledger {
                wtr.serialize(DetailRow::new(&r.code, e))?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        report: &BatchReport,
        config: &StrategyConfig,
        output_dir: &str,
    ) -> Result<(), BandtraderError> {
        let dir = Path::new(output_dir);
        fs::create_dir_all(dir).map_err(|e| BandtraderError::Report {
            reason: format!("cannot create {}: {}", dir.display(), e),
        })?;

        Self::write_summary(&dir.join(SUMMARY_FILE), report, config)?;
        Self::write_trades(&dir.join(TRADES_FILE), report)?;
        Self::write_details(&dir.join(DETAILS_FILE), report)?;

        info!(
            dir = %dir.display(),
            securities = report.results.len(),
            failures = report.failures.len(),
            "reports written"
        );
        Ok(())
    }
}
