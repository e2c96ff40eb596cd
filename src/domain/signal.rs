//! Row-wise buy/sell eligibility.
//!
//! Signals are computed for every row up front and never depend on whether
//! a position is held; the executor decides what to do with them.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::indicator_row::IndicatorRow;
use crate::domain::strategy_config::{SellPrecedence, SellRules, StrategyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyReason {
    MainNetRate,
    Breakout,
    Momentum,
}

impl BuyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyReason::MainNetRate => "main_net_rate",
            BuyReason::Breakout => "breakout",
            BuyReason::Momentum => "momentum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
    Exhaustion,
    ProfitTake,
    RiseFromLow,
}

impl SellReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellReason::Exhaustion => "exhaustion",
            SellReason::ProfitTake => "profit_take",
            SellReason::RiseFromLow => "rise_from_low",
        }
    }
}

impl fmt::Display for BuyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SellReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Eligibility of one row. The reason is present exactly when the flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Signal {
    pub buy: Option<BuyReason>,
    pub sell: Option<SellReason>,
}

impl Signal {
    pub fn is_buy(&self) -> bool {
        self.buy.is_some()
    }

    pub fn is_sell(&self) -> bool {
        self.sell.is_some()
    }
}

/// First enabled buy clause matching the row, in clause order.
pub fn evaluate_buy(row: &IndicatorRow, config: &StrategyConfig) -> Option<BuyReason> {
    let rules = &config.buy;

    let mnr = &rules.main_net_rate;
    if mnr.enabled
        && row.main_net_rate >= mnr.min
        && row.prev_band_price_position <= mnr.prev_position_max
    {
        return Some(BuyReason::MainNetRate);
    }

    let brk = &rules.breakout;
    if brk.enabled
        && row.close_slope > brk.close_slope_min
        && row.prev_rsd <= brk.prev_rsd_max
        && row.rsd_chg >= brk.rsd_chg_min
    {
        return Some(BuyReason::Breakout);
    }

    let mom = &rules.momentum;
    if mom.enabled
        && row.pct_chg > mom.pct_chg_min
        && row.main_net_rate > mom.main_net_rate_min
        && row.rsd > mom.rsd_min
        && row.prev_band_price_position < mom.prev_position_max
    {
        return Some(BuyReason::Momentum);
    }

    None
}

fn exhaustion(row: &IndicatorRow, rules: &SellRules) -> bool {
    let r = &rules.exhaustion;
    r.enabled
        && row.rsd > r.rsd_min
        && row.band_price_position > r.position_min
        && row.pct_chg < r.pct_chg_max
}

fn profit_take(row: &IndicatorRow, rules: &SellRules) -> bool {
    let r = &rules.profit_take;
    r.enabled && row.pct_chg > r.pct_chg_min && row.rsd > r.rsd_min
}

fn rise_from_low(row: &IndicatorRow, trailing_low: f64, rules: &SellRules) -> bool {
    let r = &rules.rise_from_low;
    if !r.enabled || trailing_low <= 0.0 || row.band_price_position < r.position_min {
        return false;
    }
    match r.bucket_for(row.rsd) {
        Some(bucket) => row.close / trailing_low >= bucket.price_to_low_min,
        None => false,
    }
}

/// Sell reason for a row given the minimum low over its trailing window.
pub fn evaluate_sell(
    row: &IndicatorRow,
    trailing_low: f64,
    config: &StrategyConfig,
) -> Option<SellReason> {
    let rules = &config.sell;
    let ordered = match rules.precedence {
        SellPrecedence::ExhaustionFirst => [SellReason::Exhaustion, SellReason::ProfitTake],
        SellPrecedence::ProfitTakeFirst => [SellReason::ProfitTake, SellReason::Exhaustion],
    };

    for reason in ordered {
        let hit = match reason {
            SellReason::Exhaustion => exhaustion(row, rules),
            SellReason::ProfitTake => profit_take(row, rules),
            SellReason::RiseFromLow => false,
        };
        if hit {
            return Some(reason);
        }
    }

    rise_from_low(row, trailing_low, rules).then_some(SellReason::RiseFromLow)
}

/// Minimum `low` over the trailing `window` rows, current row included.
/// Shorter prefixes use whatever rows exist.
pub fn trailing_lows(rows: &[IndicatorRow], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(rows.len());
    // Indices whose lows are increasing front to back.
    let mut deque: VecDeque<usize> = VecDeque::new();

    for (i, row) in rows.iter().enumerate() {
        while deque.back().is_some_and(|&j| rows[j].low >= row.low) {
            deque.pop_back();
        }
        deque.push_back(i);
        while deque.front().is_some_and(|&j| j + window <= i) {
            deque.pop_front();
        }
        out.push(deque.front().map_or(row.low, |&j| rows[j].low));
    }
    out
}

/// Annotate every row with its buy and sell eligibility.
pub fn generate_signals(rows: &[IndicatorRow], config: &StrategyConfig) -> Vec<Signal> {
    let lows = if config.sell.rise_from_low.enabled {
        trailing_lows(rows, config.sell.rise_from_low.low_window)
    } else {
        vec![0.0; rows.len()]
    };

    rows.iter()
        .zip(lows)
        .map(|(row, low)| Signal {
            buy: evaluate_buy(row, config),
            sell: evaluate_sell(row, low, config),
        })
        .collect()
}
