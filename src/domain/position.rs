//! Account state for one security's run and its daily transition.
//!
//! The executor folds [`step`] over the series: each day's state is
//! produced from the previous day's state plus the current row, never by
//! mutating a shared table.

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::indicator_row::IndicatorRow;
use crate::domain::ledger::{LedgerEntry, Side, TradeRecord};
use crate::domain::signal::Signal;

#[derive(Debug, Clone, PartialEq)]
pub enum AccountState {
    Flat {
        cash: f64,
        realized: f64,
    },
    Long {
        cash: f64,
        quantity: f64,
        entry_price: f64,
        /// Row index of the buy signal; holding days count from here.
        entry_index: usize,
        entry_date: NaiveDate,
        high_water: f64,
        realized: f64,
    },
}

impl AccountState {
    pub fn new(initial_capital: f64) -> Self {
        AccountState::Flat {
            cash: initial_capital,
            realized: 0.0,
        }
    }

    pub fn cash(&self) -> f64 {
        match *self {
            AccountState::Flat { cash, .. } | AccountState::Long { cash, .. } => cash,
        }
    }

    pub fn quantity(&self) -> f64 {
        match *self {
            AccountState::Flat { .. } => 0.0,
            AccountState::Long { quantity, .. } => quantity,
        }
    }

    pub fn realized(&self) -> f64 {
        match *self {
            AccountState::Flat { realized, .. } | AccountState::Long { realized, .. } => realized,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, AccountState::Long { .. })
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.cash() + self.quantity() * price
    }
}

/// Everything `step` needs to know about one day.
#[derive(Debug, Clone, Copy)]
pub struct DayContext<'a> {
    pub index: usize,
    pub row: &'a IndicatorRow,
    pub prev_close: Option<f64>,
    /// Next row's open and date; absent on the last row.
    pub next_open: Option<f64>,
    pub next_date: Option<NaiveDate>,
    pub signal: Signal,
    pub min_hold_days: usize,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: AccountState,
    pub entry: LedgerEntry,
    pub trade: Option<TradeRecord>,
}

fn valid_buy_fill(ctx: &DayContext<'_>) -> Option<(f64, NaiveDate)> {
    let price = ctx.next_open.filter(|p| p.is_finite() && *p > 0.0)?;
    Some((price, ctx.next_date?))
}

fn valid_sell_fill(ctx: &DayContext<'_>) -> Option<(f64, NaiveDate)> {
    let price = ctx.next_open.filter(|p| p.is_finite() && *p >= 0.0)?;
    Some((price, ctx.next_date?))
}

/// Advance the account by one day.
pub fn step(state: &AccountState, ctx: &DayContext<'_>) -> StepOutcome {
    let row = ctx.row;
    let position_value = state.quantity() * row.close;

    let mut entry = LedgerEntry {
        date: row.trade_date,
        close: row.close,
        signal: None,
        execution_price: None,
        bought: 0.0,
        sold: 0.0,
        trade_profit: None,
        trade_return: None,
        cumulative_profit: state.realized(),
        cash: state.cash(),
        position: state.quantity(),
        position_value,
        portfolio_value: state.cash() + position_value,
        reason: String::new(),
        unrealized_return: None,
        max_profit: None,
        high_water_updated: None,
        buy_eligible: ctx.signal.is_buy(),
        sell_eligible: ctx.signal.is_sell(),
    };

    match *state {
        AccountState::Flat { cash, realized } => {
            let Some(reason) = ctx.signal.buy else {
                return StepOutcome {
                    state: state.clone(),
                    entry,
                    trade: None,
                };
            };
            let Some((price, fill_date)) = valid_buy_fill(ctx) else {
                debug!(date = %row.trade_date, "buy signal skipped: no valid next open");
                return StepOutcome {
                    state: state.clone(),
                    entry,
                    trade: None,
                };
            };
            if cash <= 0.0 || !cash.is_finite() {
                debug!(date = %row.trade_date, cash, "buy signal skipped: no cash");
                return StepOutcome {
                    state: state.clone(),
                    entry,
                    trade: None,
                };
            }

            let quantity = cash / price;
            entry.signal = Some(Side::Buy);
            entry.execution_price = Some(price);
            entry.bought = quantity;
            entry.cash = 0.0;
            entry.position = quantity;
            entry.reason = reason.to_string();

            StepOutcome {
                state: AccountState::Long {
                    cash: 0.0,
                    quantity,
                    entry_price: price,
                    entry_index: ctx.index,
                    entry_date: row.trade_date,
                    high_water: price,
                    realized,
                },
                entry,
                trade: Some(TradeRecord {
                    signal_date: row.trade_date,
                    fill_date,
                    side: Side::Buy,
                    price,
                    quantity,
                    profit: None,
                    return_rate: None,
                    reason: reason.to_string(),
                }),
            }
        }

        AccountState::Long {
            cash,
            quantity,
            entry_price,
            entry_index,
            entry_date,
            high_water,
            realized,
        } => {
            let days_held = ctx.index - entry_index;
            let true_high = row.true_high(ctx.prev_close);
            let updated = true_high > high_water;
            let high_water = high_water.max(true_high);

            entry.high_water_updated = Some(updated);
            entry.unrealized_return = Some((row.close - entry_price) / entry_price);
            entry.max_profit = Some((high_water - entry_price) / entry_price);

            let holding = AccountState::Long {
                cash,
                quantity,
                entry_price,
                entry_index,
                entry_date,
                high_water,
                realized,
            };

            let reason = match ctx.signal.sell {
                Some(reason) if days_held >= ctx.min_hold_days => reason,
                _ => {
                    return StepOutcome {
                        state: holding,
                        entry,
                        trade: None,
                    };
                }
            };
            let Some((price, fill_date)) = valid_sell_fill(ctx) else {
                debug!(date = %row.trade_date, "sell signal skipped: no valid next open");
                return StepOutcome {
                    state: holding,
                    entry,
                    trade: None,
                };
            };

            let profit = quantity * (price - entry_price);
            let return_rate = (price - entry_price) / entry_price;
            let cash = cash + quantity * price;
            let realized = realized + profit;

            entry.signal = Some(Side::Sell);
            entry.execution_price = Some(price);
            entry.sold = quantity;
            entry.trade_profit = Some(profit);
            entry.trade_return = Some(return_rate);
            entry.cumulative_profit = realized;
            entry.cash = cash;
            entry.position = 0.0;
            entry.reason = reason.to_string();

            StepOutcome {
                state: AccountState::Flat { cash, realized },
                entry,
                trade: Some(TradeRecord {
                    signal_date: row.trade_date,
                    fill_date,
                    side: Side::Sell,
                    price,
                    quantity,
                    profit: Some(profit),
                    return_rate: Some(return_rate),
                    reason: reason.to_string(),
                }),
            }
        }
    }
}
