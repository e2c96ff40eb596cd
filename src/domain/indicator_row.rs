//! Indicator-annotated daily row: the input contract of the backtest core.
//!
//! Rows arrive fully populated from the indicator pipeline. The core never
//! repairs gaps; a series that breaks the contract is rejected as a whole.

use crate::domain::error::BandtraderError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical CSV header names, in file order.
pub const REQUIRED_COLUMNS: [&str; 19] = [
    "trade_date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "pct_chg",
    "main_net_rate",
    "ma",
    "ma_std",
    "upper_band",
    "lower_band",
    "rsd",
    "rsd_chg",
    "prev_rsd",
    "band_price_position",
    "prev_band_price_position",
    "ma_slope",
    "close_slope",
];

/// Map a header as written by the indicator pipeline to its canonical name.
///
/// Matching is case-insensitive; a handful of legacy spellings are accepted.
pub fn canonical_column(header: &str) -> String {
    let lowered = header.trim().to_lowercase();
    let canonical = match lowered.as_str() {
        "vol" => "volume",
        "std" => "ma_std",
        "主力净量率" | "main_net_volume_ratio" => "main_net_rate",
        other => other,
    };
    canonical.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Same-day return, in percent.
    pub pct_chg: f64,
    pub main_net_rate: f64,
    pub ma: f64,
    pub ma_std: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub rsd: f64,
    pub rsd_chg: f64,
    pub prev_rsd: f64,
    pub band_price_position: f64,
    pub prev_band_price_position: f64,
    pub ma_slope: f64,
    pub close_slope: f64,
}

impl IndicatorRow {
    /// Intraday high, lifted to the open when the day gapped above the
    /// previous close.
    pub fn true_high(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(prev) if self.open > prev => self.high.max(self.open),
            _ => self.high,
        }
    }

    fn numeric_fields(&self) -> [(&'static str, f64); 18] {
        [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
            ("pct_chg", self.pct_chg),
            ("main_net_rate", self.main_net_rate),
            ("ma", self.ma),
            ("ma_std", self.ma_std),
            ("upper_band", self.upper_band),
            ("lower_band", self.lower_band),
            ("rsd", self.rsd),
            ("rsd_chg", self.rsd_chg),
            ("prev_rsd", self.prev_rsd),
            ("band_price_position", self.band_price_position),
            ("prev_band_price_position", self.prev_band_price_position),
            ("ma_slope", self.ma_slope),
            ("close_slope", self.close_slope),
        ]
    }
}

/// Check the series invariants: non-empty, strictly increasing dates, and
/// every numeric field finite.
pub fn validate_series(code: &str, rows: &[IndicatorRow]) -> Result<(), BandtraderError> {
    if rows.is_empty() {
        return Err(BandtraderError::InvalidSeries {
            code: code.to_string(),
            reason: "series is empty".into(),
        });
    }

    for (i, row) in rows.iter().enumerate() {
        if let Some((name, _)) = row.numeric_fields().iter().find(|(_, v)| !v.is_finite()) {
            return Err(BandtraderError::InvalidSeries {
                code: code.to_string(),
                reason: format!("{} is not populated on {}", name, row.trade_date),
            });
        }
        if i > 0 && rows[i - 1].trade_date >= row.trade_date {
            return Err(BandtraderError::InvalidSeries {
                code: code.to_string(),
                reason: format!(
                    "dates not strictly increasing at {} (after {})",
                    row.trade_date,
                    rows[i - 1].trade_date
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(date: &str) -> IndicatorRow {
        IndicatorRow {
            trade_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            volume: 120_000.0,
            pct_chg: 1.2,
            main_net_rate: 0.02,
            ma: 10.0,
            ma_std: 0.3,
            upper_band: 10.6,
            lower_band: 9.4,
            rsd: 3.0,
            rsd_chg: 0.01,
            prev_rsd: 2.97,
            band_price_position: 0.67,
            prev_band_price_position: 0.6,
            ma_slope: 0.01,
            close_slope: 0.02,
        }
    }

    #[test]
    fn true_high_without_gap() {
        let row = sample_row("2024-03-01");
        assert_eq!(row.true_high(Some(10.1)), 10.5);
        assert_eq!(row.true_high(None), 10.5);
    }

    #[test]
    fn true_high_gap_up_above_intraday_high() {
        let mut row = sample_row("2024-03-01");
        // Open printed above the recorded high after a gap.
        row.open = 11.0;
        assert_eq!(row.true_high(Some(10.0)), 11.0);
    }

    #[test]
    fn true_high_gap_up_below_intraday_high() {
        let mut row = sample_row("2024-03-01");
        row.open = 10.3;
        assert_eq!(row.true_high(Some(10.0)), 10.5);
    }

    #[test]
    fn canonical_column_aliases() {
        assert_eq!(canonical_column("vol"), "volume");
        assert_eq!(canonical_column(" RSD "), "rsd");
        assert_eq!(canonical_column("CLOSE_slope"), "close_slope");
        assert_eq!(canonical_column("主力净量率"), "main_net_rate");
        assert_eq!(canonical_column("STD"), "ma_std");
    }

    #[test]
    fn validate_accepts_ordered_series() {
        let rows = vec![sample_row("2024-03-01"), sample_row("2024-03-04")];
        assert!(validate_series("600000", &rows).is_ok());
    }

    #[test]
    fn validate_rejects_empty() {
        let err = validate_series("600000", &[]).unwrap_err();
        assert!(matches!(err, BandtraderError::InvalidSeries { .. }));
    }

    #[test]
    fn validate_rejects_duplicate_dates() {
        let rows = vec![sample_row("2024-03-01"), sample_row("2024-03-01")];
        let err = validate_series("600000", &rows).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn validate_rejects_unpopulated_field() {
        let mut row = sample_row("2024-03-01");
        row.rsd = f64::NAN;
        let err = validate_series("600000", &[row]).unwrap_err();
        assert!(err.to_string().contains("rsd"));
    }
}
