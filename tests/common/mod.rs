#![allow(dead_code)]

use bandtrader::domain::error::BandtraderError;
use bandtrader::domain::indicator_row::IndicatorRow;
use bandtrader::domain::strategy_config::{ParamSet, StrategyConfig};
use bandtrader::ports::data_port::DataPort;
use chrono::{Days, NaiveDate};
use std::collections::HashMap;

pub fn date(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .checked_add_days(Days::new(offset))
        .unwrap()
}

/// A row that triggers no rule under the default configuration.
pub fn row(offset: u64, open: f64, close: f64) -> IndicatorRow {
    IndicatorRow {
        trade_date: date(offset),
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 10_000.0,
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

/// Buy-eligible through the main-net-rate clause.
pub fn buy_row(offset: u64, open: f64, close: f64) -> IndicatorRow {
    IndicatorRow {
        main_net_rate: 0.2,
        ..row(offset, open, close)
    }
}

/// Sell-eligible through the profit-take predicate.
pub fn sell_row(offset: u64, open: f64, close: f64) -> IndicatorRow {
    IndicatorRow {
        pct_chg: 6.0,
        rsd: 11.0,
        ..row(offset, open, close)
    }
}

/// `cycles` round trips: buy at 10, sell at `exit`, two days held.
pub fn round_trips(cycles: u64, exit: f64) -> Vec<IndicatorRow> {
    let mut rows = Vec::new();
    for c in 0..cycles {
        let b = c * 4;
        rows.push(buy_row(b, 10.0, 10.0));
        rows.push(row(b + 1, 10.0, 10.0));
        rows.push(sell_row(b + 2, 10.0, 10.0));
        rows.push(row(b + 3, exit, exit));
    }
    rows.push(row(cycles * 4, 10.0, 10.0));
    rows
}

pub fn config_with(params: &[(&str, f64)]) -> StrategyConfig {
    let params: ParamSet = params.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    StrategyConfig::default().with_params(&params).config
}

pub struct MockDataPort {
    pub data: HashMap<String, Vec<IndicatorRow>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_rows(mut self, code: &str, rows: Vec<IndicatorRow>) -> Self {
        self.data.insert(code.to_string(), rows);
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.errors.insert(code.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(&self, code: &str) -> Result<Vec<IndicatorRow>, BandtraderError> {
        if let Some(reason) = self.errors.get(code) {
            return Err(BandtraderError::DataSource {
                reason: reason.clone(),
            });
        }
        self.data
            .get(code)
            .cloned()
            .ok_or_else(|| BandtraderError::DataSource {
                reason: format!("no data for {code}"),
            })
    }

    fn list_codes(&self) -> Result<Vec<String>, BandtraderError> {
        let mut codes: Vec<String> = self.data.keys().cloned().collect();
        codes.sort();
        Ok(codes)
    }
}
