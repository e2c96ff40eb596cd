//! Executor output records: the per-day ledger and the trade list.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// One executed fill. Immutable once appended.
///
/// `signal_date` is the row whose signal triggered the fill; the fill itself
/// happens at the next row's open, on `fill_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub signal_date: NaiveDate,
    pub fill_date: NaiveDate,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    /// Realised on sells only.
    pub profit: Option<f64>,
    pub return_rate: Option<f64>,
    pub reason: String,
}

impl TradeRecord {
    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }
}

/// State of the account at the end of one simulated day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub close: f64,
    pub signal: Option<Side>,
    pub execution_price: Option<f64>,
    pub bought: f64,
    pub sold: f64,
    pub trade_profit: Option<f64>,
    pub trade_return: Option<f64>,
    pub cumulative_profit: f64,
    pub cash: f64,
    pub position: f64,
    /// Position carried into the day, marked at this day's close.
    pub position_value: f64,
    pub portfolio_value: f64,
    pub reason: String,
    pub unrealized_return: Option<f64>,
    pub max_profit: Option<f64>,
    pub high_water_updated: Option<bool>,
    pub buy_eligible: bool,
    pub sell_eligible: bool,
}
