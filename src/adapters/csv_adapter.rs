//! CSV indicator-series adapter: one `<CODE>.csv` per security.
//!
//! Columns are matched by header name, so their order in the file is free.

use crate::domain::error::BandtraderError;
use crate::domain::indicator_row::{canonical_column, IndicatorRow, REQUIRED_COLUMNS};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, code: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", code))
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

/// Parse CSV text into rows, sorted by date.
pub fn parse_series(code: &str, content: &str) -> Result<Vec<IndicatorRow>, BandtraderError> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let headers = rdr.headers()?.clone();
    let positions: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (canonical_column(h), i))
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !positions.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(BandtraderError::MissingColumns {
            code: code.to_string(),
            columns: missing,
        });
    }

    let invalid = |reason: String| BandtraderError::InvalidSeries {
        code: code.to_string(),
        reason,
    };

    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let field = |name: &str| {
            positions
                .get(name)
                .and_then(|&i| record.get(i))
                .unwrap_or("")
                .trim()
        };
        let num = |name: &str| -> Result<f64, BandtraderError> {
            let raw = field(name);
            raw.parse::<f64>()
                .map_err(|_| invalid(format!("row {}: {} is not a number: {:?}", line + 1, name, raw)))
        };

        let trade_date = parse_date(field("trade_date")).ok_or_else(|| {
            invalid(format!("row {}: invalid trade_date {:?}", line + 1, field("trade_date")))
        })?;

        rows.push(IndicatorRow {
            trade_date,
            open: num("open")?,
            high: num("high")?,
            low: num("low")?,
            close: num("close")?,
            volume: num("volume")?,
            pct_chg: num("pct_chg")?,
            main_net_rate: num("main_net_rate")?,
            ma: num("ma")?,
            ma_std: num("ma_std")?,
            upper_band: num("upper_band")?,
            lower_band: num("lower_band")?,
            rsd: num("rsd")?,
            rsd_chg: num("rsd_chg")?,
            prev_rsd: num("prev_rsd")?,
            band_price_position: num("band_price_position")?,
            prev_band_price_position: num("prev_band_price_position")?,
            ma_slope: num("ma_slope")?,
            close_slope: num("close_slope")?,
        });
    }

    rows.sort_by_key(|r| r.trade_date);
    Ok(rows)
}

impl DataPort for CsvAdapter {
    fn fetch_series(&self, code: &str) -> Result<Vec<IndicatorRow>, BandtraderError> {
        let path = self.csv_path(code);
        let content = fs::read_to_string(&path).map_err(|e| BandtraderError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        parse_series(code, &content)
    }

    fn list_codes(&self) -> Result<Vec<String>, BandtraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| BandtraderError::DataSource {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut codes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    codes.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        codes.sort();
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "trade_date,open,high,low,close,vol,pct_chg,main_net_rate,ma,std,upper_band,lower_band,rsd,rsd_chg,prev_rsd,band_price_position,prev_band_price_position,ma_slope,close_slope";

    fn line(date: &str, close: f64) -> String {
        format!("{date},{close},{close},{close},{close},1000,0.5,0.05,{close},0.2,11,9,4,0.1,3.9,0.5,0.4,0.01,0.02")
    }

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        // Out of order on purpose.
        let content = format!(
            "{HEADER}\n{}\n{}\n{}\n",
            line("2024-01-17", 10.2),
            line("2024-01-15", 10.0),
            line("20240116", 10.1)
        );
        fs::write(path.join("600000.csv"), content).unwrap();
        fs::write(path.join("000001.csv"), format!("{HEADER}\n")).unwrap();
        fs::write(path.join("notes.txt"), "ignored").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_series_maps_headers_and_sorts() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let rows = adapter.fetch_series("600000").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].trade_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(rows[1].trade_date, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(rows[0].close, 10.0);
        assert_eq!(rows[0].volume, 1000.0);
        assert_eq!(rows[0].ma_std, 0.2);
    }

    #[test]
    fn missing_columns_are_listed() {
        let err = parse_series("X", "trade_date,open,high,low,close\n").unwrap_err();
        match err {
            BandtraderError::MissingColumns { code, columns } => {
                assert_eq!(code, "X");
                assert!(columns.contains(&"volume".to_string()));
                assert!(columns.contains(&"close_slope".to_string()));
                assert!(!columns.contains(&"close".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_value_is_invalid_series() {
        let mut bad = line("2024-01-15", 10.0);
        bad = bad.replacen(",4,", ",,", 1);
        let err = parse_series("X", &format!("{HEADER}\n{bad}\n")).unwrap_err();
        assert!(err.is_input_contract());
    }

    #[test]
    fn missing_file_is_data_source_error() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_series("999999").unwrap_err();
        assert!(matches!(err, BandtraderError::DataSource { .. }));
    }

    #[test]
    fn list_codes_returns_csv_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(adapter.list_codes().unwrap(), vec!["000001", "600000"]);
    }
}
