//! Batch report port trait.

use crate::domain::backtest::BatchReport;
use crate::domain::error::BandtraderError;
use crate::domain::strategy_config::StrategyConfig;

/// Port for writing the outcome of a backtest batch.
pub trait ReportPort {
    fn write(
        &self,
        report: &BatchReport,
        config: &StrategyConfig,
        output_dir: &str,
    ) -> Result<(), BandtraderError>;
}
