//! Per-security backtest and the parallel batch driver.
//!
//! Securities share no state, so the batch fans out with rayon and merges
//! the collected results afterwards. A security that breaks the input
//! contract is reported and skipped; the batch carries on.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::error::BandtraderError;
use crate::domain::execution::execute_trades;
use crate::domain::indicator_row::{validate_series, IndicatorRow};
use crate::domain::ledger::{LedgerEntry, TradeRecord};
use crate::domain::metrics::{kelly_fraction, summarize, PerformanceSummary};
use crate::domain::signal::generate_signals;
use crate::domain::strategy_config::StrategyConfig;
use crate::ports::data_port::DataPort;

/// One security's series, loaded once and reused across runs.
#[derive(Debug, Clone)]
pub struct SecuritySeries {
    pub code: String,
    pub rows: Vec<IndicatorRow>,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub code: String,
    pub summary: PerformanceSummary,
    pub trades: Vec<TradeRecord>,
    pub ledger: Vec<LedgerEntry>,
    pub final_value: f64,
    pub open_position: bool,
}

impl BacktestResult {
    /// Result reported for a security whose run could not happen.
    pub fn zeroed(code: &str, initial_capital: f64) -> Self {
        BacktestResult {
            code: code.to_string(),
            summary: PerformanceSummary::default(),
            trades: Vec::new(),
            ledger: Vec::new(),
            final_value: initial_capital,
            open_position: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedSecurity {
    pub code: String,
    pub reason: String,
    /// The data broke the input contract rather than failing to load or run.
    pub rejected: bool,
}

impl FailedSecurity {
    fn from_error(code: &str, err: &BandtraderError) -> Self {
        let rejected = err.is_input_contract();
        if rejected {
            warn!(code, error = %err, "series rejected");
        } else {
            error!(code, error = %err, "security failed");
        }
        FailedSecurity {
            code: code.to_string(),
            reason: err.to_string(),
            rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BatchAggregate {
    pub securities: usize,
    pub total_trades: usize,
    pub total_profit: f64,
    /// Against initial capital times the number of securities.
    pub total_return_percent: f64,
    pub avg_win_rate: f64,
    pub avg_kelly_win_rate: f64,
    pub avg_kelly_odds: f64,
    /// Kelly fraction computed from the averaged win rate and odds.
    pub kelly_of_averages: f64,
    /// Per-security fractions weighted by trade count.
    pub weighted_kelly_fraction: f64,
    pub best: Option<(String, f64)>,
    pub worst: Option<(String, f64)>,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<BacktestResult>,
    pub failures: Vec<FailedSecurity>,
    pub aggregate: BatchAggregate,
}

/// Run the full pipeline for one security.
pub fn backtest_security(
    code: &str,
    rows: &[IndicatorRow],
    config: &StrategyConfig,
) -> Result<BacktestResult, BandtraderError> {
    validate_series(code, rows)?;

    let signals = generate_signals(rows, config);
    let execution = execute_trades(rows, &signals, config);
    let summary = summarize(&execution.realized_profits(), config.initial_capital);
    let open_position = execution.open_position();

    Ok(BacktestResult {
        code: code.to_string(),
        summary,
        trades: execution.trades,
        ledger: execution.ledger,
        final_value: execution.final_value,
        open_position,
    })
}

/// Load every code through `data`, separating the ones that failed to load.
pub fn load_series<D: DataPort + ?Sized>(
    data: &D,
    codes: &[String],
) -> (Vec<SecuritySeries>, Vec<FailedSecurity>) {
    let mut loaded = Vec::with_capacity(codes.len());
    let mut failures = Vec::new();

    for code in codes {
        match data.fetch_series(code) {
            Ok(rows) => loaded.push(SecuritySeries {
                code: code.clone(),
                rows,
            }),
            Err(e) => failures.push(FailedSecurity::from_error(code, &e)),
        }
    }
    (loaded, failures)
}

/// Backtest every series in parallel and aggregate the successes.
///
/// With `verbose`, each security's summary is logged at INFO; otherwise at
/// DEBUG, which keeps optimizer trials quiet.
pub fn run_batch(series: &[SecuritySeries], config: &StrategyConfig, verbose: bool) -> BatchReport {
    let outcomes: Vec<Result<BacktestResult, FailedSecurity>> = series
        .par_iter()
        .map(|s| {
            backtest_security(&s.code, &s.rows, config)
                .map_err(|e| FailedSecurity::from_error(&s.code, &e))
        })
        .collect();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(r) => {
                log_summary(&r, verbose);
                results.push(r);
            }
            Err(f) => failures.push(f),
        }
    }

    let aggregate = aggregate(&results, config.initial_capital);
    BatchReport {
        results,
        failures,
        aggregate,
    }
}

fn log_summary(r: &BacktestResult, verbose: bool) {
    let s = &r.summary;
    if verbose {
        info!(
            code = %r.code,
            trades = s.trade_count,
            win_rate = s.win_rate,
            profit = s.total_profit,
            profit_rate = s.profit_rate_percent,
            kelly = s.kelly.kelly_fraction,
            open_position = r.open_position,
            "security backtested"
        );
    } else {
        debug!(
            code = %r.code,
            trades = s.trade_count,
            profit = s.total_profit,
            "security backtested"
        );
    }
}

/// Combine per-security results.
pub fn aggregate(results: &[BacktestResult], initial_capital: f64) -> BatchAggregate {
    let n = results.len();
    if n == 0 {
        return BatchAggregate::default();
    }
    let nf = n as f64;

    let total_trades: usize = results.iter().map(|r| r.summary.trade_count).sum();
    let total_profit: f64 = results.iter().map(|r| r.summary.total_profit).sum();
    let invested = initial_capital * nf;
    let total_return_percent = if invested > 0.0 {
        total_profit / invested * 100.0
    } else {
        0.0
    };

    let avg_win_rate = results.iter().map(|r| r.summary.win_rate).sum::<f64>() / nf;
    let avg_kelly_win_rate = results.iter().map(|r| r.summary.kelly.win_rate).sum::<f64>() / nf;
    let avg_kelly_odds = results.iter().map(|r| r.summary.kelly.odds).sum::<f64>() / nf;

    let weighted_kelly_fraction = if total_trades > 0 {
        results
            .iter()
            .map(|r| r.summary.kelly.kelly_fraction * r.summary.trade_count as f64)
            .sum::<f64>()
            / total_trades as f64
    } else {
        0.0
    };

    let by_profit = |r: &&BacktestResult| (r.code.clone(), r.summary.total_profit);
    let best = results
        .iter()
        .max_by(|a, b| a.summary.total_profit.total_cmp(&b.summary.total_profit))
        .map(|r| by_profit(&r));
    let worst = results
        .iter()
        .min_by(|a, b| a.summary.total_profit.total_cmp(&b.summary.total_profit))
        .map(|r| by_profit(&r));

    BatchAggregate {
        securities: n,
        total_trades,
        total_profit,
        total_return_percent,
        avg_win_rate,
        avg_kelly_win_rate,
        avg_kelly_odds,
        kelly_of_averages: kelly_fraction(avg_kelly_win_rate, avg_kelly_odds),
        weighted_kelly_fraction,
        best,
        worst,
    }
}
