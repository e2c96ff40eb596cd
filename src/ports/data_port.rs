//! Indicator series source port trait.

use crate::domain::error::BandtraderError;
use crate::domain::indicator_row::IndicatorRow;

pub trait DataPort {
    /// Full indicator series for one security, oldest row first.
    fn fetch_series(&self, code: &str) -> Result<Vec<IndicatorRow>, BandtraderError>;

    /// Every security code the source can serve.
    fn list_codes(&self) -> Result<Vec<String>, BandtraderError>;
}
