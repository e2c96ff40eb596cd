//! Discretised strategy parameter space.
//!
//! Each axis is a named strategy parameter with a finite list of candidate
//! values. A point in the space is an index vector, one index per axis.

use rand::Rng;

use crate::domain::error::BandtraderError;
use crate::domain::strategy_config::{ParamSet, StrategyConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ParamAxis {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpace {
    axes: Vec<ParamAxis>,
}

/// Parameters swept by the built-in space, each over three values centred
/// on the config's current setting.
const DEFAULT_AXES: [&str; 9] = [
    "buy_main_net_rate_min",
    "buy_breakout_close_slope_min",
    "buy_breakout_prev_rsd_max",
    "buy_breakout_rsd_chg_min",
    "buy_momentum_pct_chg_min",
    "sell_exhaustion_rsd_min",
    "sell_exhaustion_position_min",
    "sell_profit_take_pct_chg_min",
    "sell_profit_take_rsd_min",
];

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

impl ParamSpace {
    pub fn new(axes: Vec<ParamAxis>) -> Result<Self, BandtraderError> {
        if axes.is_empty() {
            return Err(BandtraderError::InvalidParam {
                name: "param_space".into(),
                reason: "no axes defined".into(),
            });
        }
        for (i, axis) in axes.iter().enumerate() {
            if axis.values.is_empty() {
                return Err(BandtraderError::InvalidParam {
                    name: axis.name.clone(),
                    reason: "axis has no values".into(),
                });
            }
            if axis.values.iter().any(|v| !v.is_finite()) {
                return Err(BandtraderError::InvalidParam {
                    name: axis.name.clone(),
                    reason: "axis values must be finite".into(),
                });
            }
            if axes[..i].iter().any(|a| a.name == axis.name) {
                return Err(BandtraderError::InvalidParam {
                    name: axis.name.clone(),
                    reason: "axis defined twice".into(),
                });
            }
        }
        Ok(ParamSpace { axes })
    }

    /// Built-in space around `config`: ±10% on the main thresholds plus one
    /// day either side of the minimum hold.
    pub fn default_for(config: &StrategyConfig) -> Self {
        let current = config.to_params();
        let mut axes: Vec<ParamAxis> = DEFAULT_AXES
            .iter()
            .filter_map(|name| {
                let centre = *current.get(*name)?;
                Some(ParamAxis {
                    name: name.to_string(),
                    values: vec![round4(centre * 0.9), centre, round4(centre * 1.1)],
                })
            })
            .collect();

        let hold = config.min_hold_days as f64;
        axes.push(ParamAxis {
            name: "min_hold_days".into(),
            values: vec![(hold - 1.0).max(0.0), hold, hold + 1.0],
        });
        for axis in &mut axes {
            axis.values.dedup();
        }
        ParamSpace { axes }
    }

    pub fn axes(&self) -> &[ParamAxis] {
        &self.axes
    }

    /// Size of the Cartesian product, or `None` when it overflows `usize`.
    pub fn combination_count(&self) -> Option<usize> {
        self.axes
            .iter()
            .try_fold(1usize, |acc, a| acc.checked_mul(a.values.len()))
    }

    /// Index vector of the `n`th combination, last axis varying fastest.
    pub fn decode(&self, mut n: usize) -> Vec<usize> {
        let mut indices = vec![0; self.axes.len()];
        for (slot, axis) in indices.iter_mut().zip(&self.axes).rev() {
            let radix = axis.values.len();
            *slot = n % radix;
            n /= radix;
        }
        indices
    }

    pub fn params_at(&self, indices: &[usize]) -> ParamSet {
        self.axes
            .iter()
            .zip(indices)
            .map(|(axis, &i)| (axis.name.clone(), axis.values[i]))
            .collect()
    }

    /// Index vector reproducing `params`, if every axis value is present.
    pub fn indices_of(&self, params: &ParamSet) -> Option<Vec<usize>> {
        self.axes
            .iter()
            .map(|axis| {
                let value = params.get(&axis.name)?;
                axis.values.iter().position(|v| v == value)
            })
            .collect()
    }

    pub fn random_indices<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        self.axes
            .iter()
            .map(|a| rng.gen_range(0..a.values.len()))
            .collect()
    }
}
