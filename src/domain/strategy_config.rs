//! Strategy configuration: the immutable rule thresholds for one run.
//!
//! A config is never mutated during a backtest. Parameter sweeps derive a
//! fresh value per trial through [`StrategyConfig::with_params`], which
//! accepts the flat `name -> value` mapping used by the INI `[strategy]`
//! section and the optimizer.

use std::collections::BTreeMap;

use crate::domain::error::BandtraderError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Flat parameter mapping, keyed by parameter name.
pub type ParamSet = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainNetRateClause {
    pub enabled: bool,
    pub min: f64,
    pub prev_position_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutClause {
    pub enabled: bool,
    pub close_slope_min: f64,
    pub prev_rsd_max: f64,
    pub rsd_chg_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumClause {
    pub enabled: bool,
    pub pct_chg_min: f64,
    pub main_net_rate_min: f64,
    pub rsd_min: f64,
    pub prev_position_max: f64,
}

/// Buy clauses, evaluated in field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyRules {
    pub main_net_rate: MainNetRateClause,
    pub breakout: BreakoutClause,
    pub momentum: MomentumClause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhaustionRule {
    pub enabled: bool,
    pub rsd_min: f64,
    pub position_min: f64,
    pub pct_chg_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitTakeRule {
    pub enabled: bool,
    pub pct_chg_min: f64,
    pub rsd_min: f64,
}

/// Upper RSD bound of a bucket and the rise-from-low multiple it requires.
///
/// A bucket covers `[previous bucket's rsd_max, rsd_max)`; the first one
/// starts at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SellBucket {
    pub rsd_max: f64,
    pub price_to_low_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiseFromLowRule {
    pub enabled: bool,
    /// Rows in the trailing low window, current row included.
    pub low_window: usize,
    pub position_min: f64,
    pub buckets: Vec<SellBucket>,
}

impl RiseFromLowRule {
    /// Bucket covering `rsd`. Non-positive or non-finite RSD has none.
    pub fn bucket_for(&self, rsd: f64) -> Option<&SellBucket> {
        if !rsd.is_finite() || rsd <= 0.0 {
            return None;
        }
        self.buckets.iter().find(|b| rsd < b.rsd_max)
    }
}

/// Which sell reason wins when both simple predicates match a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SellPrecedence {
    #[default]
    ExhaustionFirst,
    ProfitTakeFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellRules {
    pub exhaustion: ExhaustionRule,
    pub profit_take: ProfitTakeRule,
    pub rise_from_low: RiseFromLowRule,
    pub precedence: SellPrecedence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub initial_capital: f64,
    pub min_hold_days: usize,
    pub buy: BuyRules,
    pub sell: SellRules,
}

/// A parameter that `with_params` refused to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedParam {
    pub name: String,
    pub value: f64,
    pub reason: String,
}

/// Result of applying a parameter mapping.
#[derive(Debug, Clone)]
pub struct ParamUpdate {
    pub config: StrategyConfig,
    pub rejected: Vec<RejectedParam>,
}

fn default_buckets() -> Vec<SellBucket> {
    [
        (6.5, 1.3),
        (11.5, 1.5),
        (15.5, 1.8),
        (20.0, 2.0),
        (25.0, 2.2),
        (30.0, 2.3),
        (f64::INFINITY, 2.5),
    ]
    .into_iter()
    .map(|(rsd_max, price_to_low_min)| SellBucket {
        rsd_max,
        price_to_low_min,
    })
    .collect()
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            initial_capital: 10_000.0,
            min_hold_days: 2,
            buy: BuyRules {
                main_net_rate: MainNetRateClause {
                    enabled: true,
                    min: 0.1,
                    prev_position_max: 1.0,
                },
                breakout: BreakoutClause {
                    enabled: true,
                    close_slope_min: 0.05,
                    prev_rsd_max: 8.0,
                    rsd_chg_min: 0.10,
                },
                momentum: MomentumClause {
                    enabled: true,
                    pct_chg_min: 2.0,
                    main_net_rate_min: 0.05,
                    rsd_min: 5.0,
                    prev_position_max: 0.8,
                },
            },
            sell: SellRules {
                exhaustion: ExhaustionRule {
                    enabled: true,
                    rsd_min: 8.0,
                    position_min: 0.7,
                    pct_chg_max: -1.0,
                },
                profit_take: ProfitTakeRule {
                    enabled: true,
                    pct_chg_min: 5.0,
                    rsd_min: 10.0,
                },
                rise_from_low: RiseFromLowRule {
                    enabled: false,
                    low_window: 90,
                    position_min: 0.80,
                    buckets: default_buckets(),
                },
                precedence: SellPrecedence::ExhaustionFirst,
            },
        }
    }
}

fn parse_flag(value: f64) -> Result<bool, String> {
    if value == 0.0 {
        Ok(false)
    } else if value == 1.0 {
        Ok(true)
    } else {
        Err("flag must be 0 or 1".into())
    }
}

fn parse_count(value: f64) -> Result<usize, String> {
    if value < 0.0 || value.fract() != 0.0 {
        Err("must be a non-negative whole number".into())
    } else {
        Ok(value as usize)
    }
}

fn finite(value: f64) -> Result<f64, String> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err("must be finite".into())
    }
}

fn flag_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

impl StrategyConfig {
    /// Derive a new config with every known parameter in `params` applied.
    ///
    /// Unknown names and ill-typed values are collected in
    /// [`ParamUpdate::rejected`] and logged; they never abort the update.
    pub fn with_params(&self, params: &ParamSet) -> ParamUpdate {
        let mut config = self.clone();
        let mut rejected = Vec::new();

        for (name, &value) in params {
            if let Err(reason) = config.apply(name, value) {
                warn!(param = %name, value, %reason, "strategy parameter rejected");
                rejected.push(RejectedParam {
                    name: name.clone(),
                    value,
                    reason,
                });
            }
        }

        ParamUpdate { config, rejected }
    }

    fn apply(&mut self, name: &str, value: f64) -> Result<(), String> {
        if value.is_nan() {
            return Err("value is NaN".into());
        }

        if let Some(rest) = name.strip_prefix("sell_bucket_") {
            return self.apply_bucket(rest, value);
        }

        let buy = &mut self.buy;
        let sell = &mut self.sell;
        match name {
            "initial_capital" => self.initial_capital = finite(value)?,
            "min_hold_days" => self.min_hold_days = parse_count(value)?,

            "buy_main_net_rate_enabled" => buy.main_net_rate.enabled = parse_flag(value)?,
            "buy_main_net_rate_min" => buy.main_net_rate.min = finite(value)?,
            "buy_main_net_rate_prev_position_max" => {
                buy.main_net_rate.prev_position_max = finite(value)?
            }

            "buy_breakout_enabled" => buy.breakout.enabled = parse_flag(value)?,
            "buy_breakout_close_slope_min" => buy.breakout.close_slope_min = finite(value)?,
            "buy_breakout_prev_rsd_max" => buy.breakout.prev_rsd_max = finite(value)?,
            "buy_breakout_rsd_chg_min" => buy.breakout.rsd_chg_min = finite(value)?,

            "buy_momentum_enabled" => buy.momentum.enabled = parse_flag(value)?,
            "buy_momentum_pct_chg_min" => buy.momentum.pct_chg_min = finite(value)?,
            "buy_momentum_main_net_rate_min" => buy.momentum.main_net_rate_min = finite(value)?,
            "buy_momentum_rsd_min" => buy.momentum.rsd_min = finite(value)?,
            "buy_momentum_prev_position_max" => buy.momentum.prev_position_max = finite(value)?,

            "sell_exhaustion_enabled" => sell.exhaustion.enabled = parse_flag(value)?,
            "sell_exhaustion_rsd_min" => sell.exhaustion.rsd_min = finite(value)?,
            "sell_exhaustion_position_min" => sell.exhaustion.position_min = finite(value)?,
            "sell_exhaustion_pct_chg_max" => sell.exhaustion.pct_chg_max = finite(value)?,

            "sell_profit_take_enabled" => sell.profit_take.enabled = parse_flag(value)?,
            "sell_profit_take_pct_chg_min" => sell.profit_take.pct_chg_min = finite(value)?,
            "sell_profit_take_rsd_min" => sell.profit_take.rsd_min = finite(value)?,

            "sell_rise_from_low_enabled" => sell.rise_from_low.enabled = parse_flag(value)?,
            "sell_low_window" => sell.rise_from_low.low_window = parse_count(value)?,
            "sell_common_position_min" => sell.rise_from_low.position_min = finite(value)?,
            "sell_precedence" => {
                sell.precedence = if parse_flag(value)? {
                    SellPrecedence::ProfitTakeFirst
                } else {
                    SellPrecedence::ExhaustionFirst
                }
            }

            _ => return Err("unknown parameter".into()),
        }
        Ok(())
    }

    fn apply_bucket(&mut self, rest: &str, value: f64) -> Result<(), String> {
        let (index, field) = rest
            .split_once('_')
            .ok_or_else(|| String::from("unknown parameter"))?;
        let n: usize = index
            .parse()
            .map_err(|_| String::from("unknown parameter"))?;
        let buckets = &mut self.sell.rise_from_low.buckets;
        if n == 0 || n > buckets.len() {
            return Err(format!("no sell bucket {n}"));
        }
        let bucket = &mut buckets[n - 1];
        match field {
            // An infinite bound is how the last bucket stays open-ended.
            "rsd_max" => bucket.rsd_max = value,
            "price_to_low_min" => bucket.price_to_low_min = finite(value)?,
            _ => return Err("unknown parameter".into()),
        }
        Ok(())
    }

    /// The config flattened to its parameter names.
    pub fn to_params(&self) -> ParamSet {
        let buy = &self.buy;
        let sell = &self.sell;
        let mut params: ParamSet = [
            ("initial_capital", self.initial_capital),
            ("min_hold_days", self.min_hold_days as f64),
            ("buy_main_net_rate_enabled", flag_value(buy.main_net_rate.enabled)),
            ("buy_main_net_rate_min", buy.main_net_rate.min),
            (
                "buy_main_net_rate_prev_position_max",
                buy.main_net_rate.prev_position_max,
            ),
            ("buy_breakout_enabled", flag_value(buy.breakout.enabled)),
            ("buy_breakout_close_slope_min", buy.breakout.close_slope_min),
            ("buy_breakout_prev_rsd_max", buy.breakout.prev_rsd_max),
            ("buy_breakout_rsd_chg_min", buy.breakout.rsd_chg_min),
            ("buy_momentum_enabled", flag_value(buy.momentum.enabled)),
            ("buy_momentum_pct_chg_min", buy.momentum.pct_chg_min),
            ("buy_momentum_main_net_rate_min", buy.momentum.main_net_rate_min),
            ("buy_momentum_rsd_min", buy.momentum.rsd_min),
            ("buy_momentum_prev_position_max", buy.momentum.prev_position_max),
            ("sell_exhaustion_enabled", flag_value(sell.exhaustion.enabled)),
            ("sell_exhaustion_rsd_min", sell.exhaustion.rsd_min),
            ("sell_exhaustion_position_min", sell.exhaustion.position_min),
            ("sell_exhaustion_pct_chg_max", sell.exhaustion.pct_chg_max),
            ("sell_profit_take_enabled", flag_value(sell.profit_take.enabled)),
            ("sell_profit_take_pct_chg_min", sell.profit_take.pct_chg_min),
            ("sell_profit_take_rsd_min", sell.profit_take.rsd_min),
            (
                "sell_rise_from_low_enabled",
                flag_value(sell.rise_from_low.enabled),
            ),
            ("sell_low_window", sell.rise_from_low.low_window as f64),
            ("sell_common_position_min", sell.rise_from_low.position_min),
            (
                "sell_precedence",
                flag_value(sell.precedence == SellPrecedence::ProfitTakeFirst),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        for (i, bucket) in sell.rise_from_low.buckets.iter().enumerate() {
            params.insert(format!("sell_bucket_{}_rsd_max", i + 1), bucket.rsd_max);
            params.insert(
                format!("sell_bucket_{}_price_to_low_min", i + 1),
                bucket.price_to_low_min,
            );
        }
        params
    }

    /// Check the structural invariants a run relies on.
    pub fn validate(&self) -> Result<(), BandtraderError> {
        let invalid = |name: &str, reason: &str| BandtraderError::InvalidParam {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(invalid("initial_capital", "must be positive"));
        }

        let rule = &self.sell.rise_from_low;
        if rule.low_window == 0 {
            return Err(invalid("sell_low_window", "must be at least 1"));
        }

        if rule.buckets.is_empty() {
            return Err(invalid("sell_bucket_1_rsd_max", "at least one bucket required"));
        }
        let mut lower = 0.0;
        for (i, bucket) in rule.buckets.iter().enumerate() {
            let n = i + 1;
            if bucket.rsd_max.is_nan() || bucket.rsd_max <= lower {
                return Err(invalid(
                    &format!("sell_bucket_{n}_rsd_max"),
                    "bounds must be positive and strictly increasing",
                ));
            }
            if !(bucket.price_to_low_min.is_finite() && bucket.price_to_low_min > 0.0) {
                return Err(invalid(
                    &format!("sell_bucket_{n}_price_to_low_min"),
                    "must be positive",
                ));
            }
            lower = bucket.rsd_max;
        }
        if lower != f64::INFINITY {
            return Err(invalid(
                &format!("sell_bucket_{}_rsd_max", rule.buckets.len()),
                "last bucket must be unbounded",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> ParamSet {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn defaults_validate() {
        let config = StrategyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_hold_days, 2);
        assert!((config.initial_capital - 10_000.0).abs() < f64::EPSILON);
        assert!(!config.sell.rise_from_low.enabled);
    }

    #[test]
    fn with_params_applies_known_names() {
        let base = StrategyConfig::default();
        let update = base.with_params(&params(&[
            ("buy_main_net_rate_min", 0.2),
            ("min_hold_days", 3.0),
            ("sell_precedence", 1.0),
        ]));
        assert!(update.rejected.is_empty());
        assert!((update.config.buy.main_net_rate.min - 0.2).abs() < f64::EPSILON);
        assert_eq!(update.config.min_hold_days, 3);
        assert_eq!(
            update.config.sell.precedence,
            SellPrecedence::ProfitTakeFirst
        );
        // Source config untouched.
        assert!((base.buy.main_net_rate.min - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_param_leaves_everything_else_unchanged() {
        let base = StrategyConfig::default();
        let update = base.with_params(&params(&[("buy_magic_threshold", 4.0)]));
        assert_eq!(update.config, base);
        assert_eq!(update.rejected.len(), 1);
        assert_eq!(update.rejected[0].name, "buy_magic_threshold");
    }

    #[test]
    fn ill_typed_values_rejected() {
        let base = StrategyConfig::default();
        let update = base.with_params(&params(&[
            ("min_hold_days", -1.0),
            ("buy_breakout_enabled", 0.5),
            ("sell_exhaustion_rsd_min", f64::NAN),
            ("sell_low_window", 2.5),
        ]));
        assert_eq!(update.rejected.len(), 4);
        assert_eq!(update.config, base);
    }

    #[test]
    fn bucket_params_address_existing_buckets_only() {
        let base = StrategyConfig::default();
        let update = base.with_params(&params(&[
            ("sell_bucket_2_price_to_low_min", 1.6),
            ("sell_bucket_9_rsd_max", 40.0),
            ("sell_bucket_0_rsd_max", 1.0),
        ]));
        assert_eq!(update.rejected.len(), 2);
        let buckets = &update.config.sell.rise_from_low.buckets;
        assert!((buckets[1].price_to_low_min - 1.6).abs() < f64::EPSILON);
    }

    #[test]
    fn to_params_round_trips_through_with_params() {
        let mut tuned = StrategyConfig::default();
        tuned.buy.momentum.rsd_min = 6.0;
        tuned.sell.rise_from_low.enabled = true;
        let update = StrategyConfig::default().with_params(&tuned.to_params());
        assert!(update.rejected.is_empty());
        assert_eq!(update.config, tuned);
    }

    #[test]
    fn bucket_lookup_partitions_rsd_axis() {
        let rule = StrategyConfig::default().sell.rise_from_low;
        assert!(rule.bucket_for(0.0).is_none());
        assert!(rule.bucket_for(-3.0).is_none());
        assert!((rule.bucket_for(0.1).unwrap().price_to_low_min - 1.3).abs() < f64::EPSILON);
        // Upper bound is exclusive.
        assert!((rule.bucket_for(6.5).unwrap().price_to_low_min - 1.5).abs() < f64::EPSILON);
        assert!((rule.bucket_for(1e6).unwrap().price_to_low_min - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_overlapping_buckets() {
        let update = StrategyConfig::default()
            .with_params(&params(&[("sell_bucket_2_rsd_max", 5.0)]));
        let err = update.config.validate().unwrap_err();
        assert!(err.to_string().contains("sell_bucket_2_rsd_max"));
    }

    #[test]
    fn validate_rejects_bounded_last_bucket() {
        let update = StrategyConfig::default()
            .with_params(&params(&[("sell_bucket_7_rsd_max", 35.0)]));
        let err = update.config.validate().unwrap_err();
        assert!(err.to_string().contains("unbounded"));
    }

    #[test]
    fn validate_rejects_non_positive_capital() {
        let update = StrategyConfig::default().with_params(&params(&[("initial_capital", 0.0)]));
        assert!(matches!(
            update.config.validate(),
            Err(BandtraderError::InvalidParam { .. })
        ));
    }
}
