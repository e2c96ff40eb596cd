//! Core domain types and logic: signal rules, trade execution, metrics and
//! the parameter optimizer.

pub mod error;
pub mod indicator_row;
pub mod strategy_config;
pub mod config_validation;
pub mod signal;
pub mod position;
pub mod ledger;
pub mod execution;
pub mod metrics;
pub mod backtest;
pub mod optimizer;
