//! CLI definition and dispatch.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::keep_awake::{CommandKeepAwake, NoopKeepAwake};
use crate::adapters::results_sink::FileResultsSink;
use crate::domain::backtest::{load_series, run_batch, BatchReport};
use crate::domain::config_validation::{
    build_data_settings, build_optimizer_settings, build_param_space, build_strategy_config,
    output_dir, parse_list, DataSettings,
};
use crate::domain::error::BandtraderError;
use crate::domain::optimizer::{BatchEvaluator, OptimizerSession, SearchMethod, SearchOutcome};
use crate::domain::strategy_config::StrategyConfig;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::session_port::KeepAwake;

#[derive(Parser, Debug)]
#[command(name = "bandtrader", about = "Bollinger-band signal backtester and parameter optimizer")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct IoArgs {
    /// Directory of <CODE>.csv indicator files (overrides [data] dir)
    #[arg(long)]
    pub data: Option<PathBuf>,
    /// Comma-separated security codes (overrides [data] codes)
    #[arg(long)]
    pub codes: Option<String>,
    /// Output directory (overrides [output] dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest every configured security and write the reports
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        io: IoArgs,
    },
    /// Search the parameter space, then backtest the best combination
    Optimize {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        io: IoArgs,
        /// grid, bayesian or genetic (overrides [optimizer] method)
        #[arg(long)]
        method: Option<SearchMethod>,
        /// Continue from the saved trial history of the same method
        #[arg(long)]
        resume: bool,
    },
    /// Check the configuration and print the effective parameters
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest { config, io } => run_backtest(&config, &io),
        Command::Optimize {
            config,
            io,
            method,
            resume,
        } => run_optimize(&config, &io, method, resume),
        Command::Validate { config } => run_validate(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, BandtraderError> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

/// Data directory from the command line, else from `[data] dir`.
pub fn resolve_data_dir(io: &IoArgs, settings: &DataSettings) -> Result<PathBuf, BandtraderError> {
    io.data
        .clone()
        .or_else(|| settings.dir.as_ref().map(PathBuf::from))
        .ok_or_else(|| BandtraderError::ConfigMissing {
            section: "data".into(),
            key: "dir".into(),
        })
}

/// Codes from the command line, else `[data] codes`, else everything the
/// data source lists.
pub fn resolve_codes(
    override_codes: Option<&str>,
    settings: &DataSettings,
    data: &dyn DataPort,
) -> Result<Vec<String>, BandtraderError> {
    let codes = match override_codes {
        Some(raw) => parse_list(raw),
        None if !settings.codes.is_empty() => settings.codes.clone(),
        None => data.list_codes()?,
    };
    if codes.is_empty() {
        return Err(BandtraderError::ConfigMissing {
            section: "data".into(),
            key: "codes".into(),
        });
    }
    Ok(codes)
}

fn resolve_output_dir(io: &IoArgs, config: &dyn ConfigPort) -> String {
    io.output
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| output_dir(config))
}

fn log_aggregate(report: &BatchReport) {
    let a = &report.aggregate;
    info!(
        securities = a.securities,
        failures = report.failures.len(),
        total_trades = a.total_trades,
        total_profit = a.total_profit,
        total_return_percent = a.total_return_percent,
        avg_win_rate = a.avg_win_rate,
        kelly_of_averages = a.kelly_of_averages,
        weighted_kelly_fraction = a.weighted_kelly_fraction,
        best = ?a.best,
        worst = ?a.worst,
        "batch summary"
    );
}

/// Load, backtest and report one batch. Load failures are reported
/// alongside backtest failures; the batch fails only when nothing ran.
pub fn run_backtest_pipeline(
    strategy: &StrategyConfig,
    data: &dyn DataPort,
    codes: &[String],
    report_port: &dyn ReportPort,
    output_dir: &str,
) -> Result<BatchReport, BandtraderError> {
    let (series, load_failures) = load_series(data, codes);
    let mut report = run_batch(&series, strategy, true);
    let mut failures = load_failures;
    failures.append(&mut report.failures);
    report.failures = failures;

    log_aggregate(&report);
    report_port.write(&report, strategy, output_dir)?;

    if report.results.is_empty() {
        return Err(BandtraderError::DataSource {
            reason: format!("none of {} securities could be backtested", codes.len()),
        });
    }
    Ok(report)
}

fn run_backtest(config_path: &Path, io: &IoArgs) -> Result<(), BandtraderError> {
    let adapter = load_config(config_path)?;
    let strategy = build_strategy_config(&adapter)?;
    let data_settings = build_data_settings(&adapter);

    let data = CsvAdapter::new(resolve_data_dir(io, &data_settings)?);
    let codes = resolve_codes(io.codes.as_deref(), &data_settings, &data)?;
    let output = resolve_output_dir(io, &adapter);
    info!(securities = codes.len(), output = %output, "backtest started");

    run_backtest_pipeline(&strategy, &data, &codes, &CsvReportAdapter, &output)?;
    Ok(())
}

/// Run the search, then backtest the best combination into
/// `<output>/<method>_best`.
pub fn run_optimize_pipeline(
    config: &dyn ConfigPort,
    data: &dyn DataPort,
    codes: &[String],
    output_dir: &str,
    method_override: Option<SearchMethod>,
    resume: bool,
) -> Result<SearchOutcome, BandtraderError> {
    let strategy = build_strategy_config(config)?;
    let settings = build_optimizer_settings(config)?;
    let space = build_param_space(config, &strategy)?;
    let method = method_override.unwrap_or(settings.method);

    let (series, load_failures) = load_series(data, codes);
    if series.is_empty() {
        return Err(BandtraderError::DataSource {
            reason: format!("none of {} securities could be loaded", codes.len()),
        });
    }
    if !load_failures.is_empty() {
        warn!(failed = load_failures.len(), "optimizing without the securities that failed to load");
    }

    let evaluator = BatchEvaluator::new(strategy, series);
    let keep_awake: Box<dyn KeepAwake> = match &settings.keep_awake_command {
        Some(cmd) => Box::new(CommandKeepAwake::new(cmd.clone())),
        None => Box::new(NoopKeepAwake),
    };
    let sink = FileResultsSink::new(PathBuf::from(output_dir));

    let session = OptimizerSession {
        evaluator: &evaluator,
        space: &space,
        settings: &settings,
        keep_awake: keep_awake.as_ref(),
        sink: &sink,
    };
    let outcome = session.run(method, resume)?;

    if let Some(best) = &outcome.best {
        info!(params = ?best.params, "re-running batch with best parameters");
        let report = evaluator.run_backtest_with_params(&best.params, true)?;
        log_aggregate(&report);

        let best_config = evaluator.base().with_params(&best.params).config;
        let best_dir = Path::new(output_dir).join(format!("{}_best", method));
        CsvReportAdapter.write(&report, &best_config, &best_dir.display().to_string())?;
    }
    Ok(outcome)
}

fn run_optimize(
    config_path: &Path,
    io: &IoArgs,
    method: Option<SearchMethod>,
    resume: bool,
) -> Result<(), BandtraderError> {
    let adapter = load_config(config_path)?;
    let data_settings = build_data_settings(&adapter);

    let data = CsvAdapter::new(resolve_data_dir(io, &data_settings)?);
    let codes = resolve_codes(io.codes.as_deref(), &data_settings, &data)?;
    let output = resolve_output_dir(io, &adapter);

    run_optimize_pipeline(&adapter, &data, &codes, &output, method, resume)?;
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), BandtraderError> {
    let adapter = load_config(config_path)?;
    let strategy = build_strategy_config(&adapter)?;
    let settings = build_optimizer_settings(&adapter)?;
    let space = build_param_space(&adapter, &strategy)?;
    let data = build_data_settings(&adapter);

    println!("Strategy parameters:");
    for (name, value) in strategy.to_params() {
        println!("  {name} = {value}");
    }

    println!("\nData:");
    println!("  dir    = {}", data.dir.as_deref().unwrap_or("(not set)"));
    if data.codes.is_empty() {
        println!("  codes  = (all files in dir)");
    } else {
        println!("  codes  = {}", data.codes.join(","));
    }
    println!("  output = {}", output_dir(&adapter));

    println!("\nOptimizer:");
    println!("  method = {}", settings.method);
    println!("  seed   = {}", settings.seed);
    match space.combination_count() {
        Some(n) => println!("  space  = {} axes, {} combinations", space.axes().len(), n),
        None => println!("  space  = {} axes, too many combinations to count", space.axes().len()),
    }

    println!("\nConfiguration is valid.");
    Ok(())
}
