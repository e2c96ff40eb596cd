//! Builds validated run settings from a [`ConfigPort`].
//!
//! Every value is checked before any backtest runs. Strategy parameters go
//! through the same update path the optimizer uses, so an unknown key under
//! `[strategy]` only warns.

use crate::domain::error::BandtraderError;
use crate::domain::optimizer::{
    BayesianSettings, GeneticSettings, GridSettings, OptimizerSettings, ParamAxis, ParamSpace,
    ScoringPolicy, SearchMethod,
};
use crate::domain::strategy_config::{ParamSet, StrategyConfig};
use crate::ports::config_port::ConfigPort;

/// Where the indicator series live and which codes to run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSettings {
    pub dir: Option<String>,
    /// Empty means every code the source lists.
    pub codes: Vec<String>,
}

pub const DEFAULT_OUTPUT_DIR: &str = "output";

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> BandtraderError {
    BandtraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Numeric strategy value; boolean words are accepted for flags.
fn parse_param_value(raw: &str) -> Option<f64> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" => Some(1.0),
        "false" | "no" | "off" => Some(0.0),
        other => other.parse().ok(),
    }
}

/// Comma-separated list, blanks dropped.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn build_strategy_config(config: &dyn ConfigPort) -> Result<StrategyConfig, BandtraderError> {
    let mut params = ParamSet::new();
    for key in config.keys("strategy") {
        let raw = config.get_string("strategy", &key).unwrap_or_default();
        let value =
            parse_param_value(&raw).ok_or_else(|| invalid("strategy", &key, "not a number"))?;
        params.insert(key, value);
    }

    let strategy = StrategyConfig::default().with_params(&params).config;
    strategy.validate()?;
    Ok(strategy)
}

pub fn build_data_settings(config: &dyn ConfigPort) -> DataSettings {
    DataSettings {
        dir: config
            .get_string("data", "dir")
            .filter(|d| !d.trim().is_empty()),
        codes: config
            .get_string("data", "codes")
            .map(|c| parse_list(&c))
            .unwrap_or_default(),
    }
}

pub fn output_dir(config: &dyn ConfigPort) -> String {
    config
        .get_string("output", "dir")
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())
}

fn get_count(config: &dyn ConfigPort, key: &str, default: usize, min: usize) -> Result<usize, BandtraderError> {
    let value = config.get_int("optimizer", key, default as i64);
    if value < min as i64 {
        return Err(invalid("optimizer", key, format!("must be at least {min}")));
    }
    Ok(value as usize)
}

fn get_probability(config: &dyn ConfigPort, key: &str, default: f64) -> Result<f64, BandtraderError> {
    let value = config.get_double("optimizer", key, default);
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid("optimizer", key, "must be between 0 and 1"));
    }
    Ok(value)
}

fn get_finite(config: &dyn ConfigPort, key: &str, default: f64) -> Result<f64, BandtraderError> {
    let value = config.get_double("optimizer", key, default);
    if !value.is_finite() {
        return Err(invalid("optimizer", key, "must be finite"));
    }
    Ok(value)
}

pub fn build_optimizer_settings(config: &dyn ConfigPort) -> Result<OptimizerSettings, BandtraderError> {
    let defaults = OptimizerSettings::default();

    let method = match config.get_string("optimizer", "method") {
        Some(m) => m.parse::<SearchMethod>()?,
        None => defaults.method,
    };

    let seed = config.get_int("optimizer", "seed", defaults.seed as i64);
    if seed < 0 {
        return Err(invalid("optimizer", "seed", "must be non-negative"));
    }

    let s = &defaults.scoring;
    let scoring = ScoringPolicy {
        return_weight: get_finite(config, "return_weight", s.return_weight)?,
        win_rate_weight: get_finite(config, "win_rate_weight", s.win_rate_weight)?,
        min_trades: get_count(config, "min_trades", s.min_trades, 0)?,
        disqualified_score: get_finite(config, "disqualified_score", s.disqualified_score)?,
    };

    let grid = GridSettings {
        max_combinations: get_count(config, "max_combinations", defaults.grid.max_combinations, 1)?,
    };

    let b = &defaults.bayesian;
    let gamma = get_probability(config, "gamma", b.gamma)?;
    if gamma == 0.0 {
        return Err(invalid("optimizer", "gamma", "must be greater than 0"));
    }
    let bayesian = BayesianSettings {
        n_trials: get_count(config, "n_trials", b.n_trials, 1)?,
        n_startup_trials: get_count(config, "n_startup_trials", b.n_startup_trials, 0)?,
        n_candidates: get_count(config, "n_candidates", b.n_candidates, 1)?,
        gamma,
        prune_threshold: get_finite(config, "prune_threshold", b.prune_threshold)?,
        patience: get_count(config, "patience", b.patience, 0)?,
        check_interval: get_count(config, "check_interval", b.check_interval, 1)?,
    };

    let g = &defaults.genetic;
    let genetic = GeneticSettings {
        population: get_count(config, "population", g.population, 2)?,
        generations: get_count(config, "generations", g.generations, 0)?,
        crossover_prob: get_probability(config, "crossover_prob", g.crossover_prob)?,
        mutation_prob: get_probability(config, "mutation_prob", g.mutation_prob)?,
        gene_mutation_prob: get_probability(config, "gene_mutation_prob", g.gene_mutation_prob)?,
        tournament_size: get_count(config, "tournament_size", g.tournament_size, 1)?,
        hall_of_fame: get_count(config, "hall_of_fame", g.hall_of_fame, 1)?,
    };

    Ok(OptimizerSettings {
        method,
        seed: seed as u64,
        scoring,
        grid,
        bayesian,
        genetic,
        keep_awake_command: config
            .get_string("optimizer", "keep_awake_command")
            .filter(|c| !c.trim().is_empty()),
    })
}

/// `[param_space]` axes, or the built-in space around `base` when the
/// section is absent or empty.
pub fn build_param_space(
    config: &dyn ConfigPort,
    base: &StrategyConfig,
) -> Result<ParamSpace, BandtraderError> {
    let keys = config.keys("param_space");
    if keys.is_empty() {
        return Ok(ParamSpace::default_for(base));
    }

    let mut axes = Vec::with_capacity(keys.len());
    for key in keys {
        let raw = config.get_string("param_space", &key).unwrap_or_default();
        let values = parse_list(&raw)
            .iter()
            .map(|v| parse_param_value(v))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| invalid("param_space", &key, "values must be numbers"))?;

        // Check each value so a typo fails here rather than in every trial.
        for &v in &values {
            let single: ParamSet = [(key.clone(), v)].into_iter().collect();
            if let Some(r) = base.with_params(&single).rejected.first() {
                return Err(invalid("param_space", &key, r.reason.clone()));
            }
        }
        axes.push(ParamAxis { name: key, values });
    }

    ParamSpace::new(axes).map_err(|e| match e {
        BandtraderError::InvalidParam { name, reason } => invalid("param_space", &name, reason),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn empty_config_gives_defaults() {
        let config = make_config("");
        assert_eq!(build_strategy_config(&config).unwrap(), StrategyConfig::default());
        assert_eq!(build_optimizer_settings(&config).unwrap(), OptimizerSettings::default());
        assert_eq!(output_dir(&config), "output");
        assert_eq!(build_data_settings(&config), DataSettings::default());
    }

    #[test]
    fn strategy_section_overrides_defaults() {
        let config = make_config(
            "[strategy]\nmin_hold_days = 3\nbuy_momentum_enabled = false\nsell_bucket_1_price_to_low_min = 1.25\n",
        );
        let strategy = build_strategy_config(&config).unwrap();
        assert_eq!(strategy.min_hold_days, 3);
        assert!(!strategy.buy.momentum.enabled);
        assert!((strategy.sell.rise_from_low.buckets[0].price_to_low_min - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_strategy_key_only_warns() {
        let config = make_config("[strategy]\nvshape_pct_chg_min = 3\n");
        assert_eq!(build_strategy_config(&config).unwrap(), StrategyConfig::default());
    }

    #[test]
    fn non_numeric_strategy_value_fails() {
        let config = make_config("[strategy]\nmin_hold_days = two\n");
        let err = build_strategy_config(&config).unwrap_err();
        assert!(matches!(err, BandtraderError::ConfigInvalid { key, .. } if key == "min_hold_days"));
    }

    #[test]
    fn invalid_strategy_fails_validation() {
        let config = make_config("[strategy]\ninitial_capital = -5\n");
        let err = build_strategy_config(&config).unwrap_err();
        assert!(matches!(err, BandtraderError::InvalidParam { name, .. } if name == "initial_capital"));
    }

    #[test]
    fn data_and_output_sections() {
        let config = make_config("[data]\ndir = /srv/indicators\ncodes = 600000, 000001,,\n[output]\ndir = results\n");
        let data = build_data_settings(&config);
        assert_eq!(data.dir.as_deref(), Some("/srv/indicators"));
        assert_eq!(data.codes, vec!["600000", "000001"]);
        assert_eq!(output_dir(&config), "results");
    }

    #[test]
    fn optimizer_section_parsed() {
        let config = make_config(
            "[optimizer]\nmethod = genetic\nseed = 7\nmin_trades = 8\npopulation = 20\ngamma = 0.3\n",
        );
        let s = build_optimizer_settings(&config).unwrap();
        assert_eq!(s.method, SearchMethod::Genetic);
        assert_eq!(s.seed, 7);
        assert_eq!(s.scoring.min_trades, 8);
        assert_eq!(s.genetic.population, 20);
        assert!((s.bayesian.gamma - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn optimizer_probability_out_of_range_fails() {
        let config = make_config("[optimizer]\ncrossover_prob = 1.5\n");
        let err = build_optimizer_settings(&config).unwrap_err();
        assert!(matches!(err, BandtraderError::ConfigInvalid { key, .. } if key == "crossover_prob"));
    }

    #[test]
    fn optimizer_unknown_method_fails() {
        let config = make_config("[optimizer]\nmethod = annealing\n");
        let err = build_optimizer_settings(&config).unwrap_err();
        assert!(matches!(err, BandtraderError::ConfigInvalid { key, .. } if key == "method"));
    }

    #[test]
    fn optimizer_population_too_small_fails() {
        let config = make_config("[optimizer]\npopulation = 1\n");
        assert!(build_optimizer_settings(&config).is_err());
    }

    #[test]
    fn param_space_section_parsed() {
        let config = make_config("[param_space]\nbuy_main_net_rate_min = 0.08, 0.1, 0.12\nmin_hold_days = 1,2\n");
        let space = build_param_space(&config, &StrategyConfig::default()).unwrap();
        assert_eq!(space.axes().len(), 2);
        assert_eq!(space.combination_count(), Some(6));
    }

    #[test]
    fn param_space_rejects_unknown_axis() {
        let config = make_config("[param_space]\nbuy_magic = 1, 2\n");
        let err = build_param_space(&config, &StrategyConfig::default()).unwrap_err();
        assert!(matches!(err, BandtraderError::ConfigInvalid { key, .. } if key == "buy_magic"));
    }

    #[test]
    fn param_space_rejects_ill_typed_value() {
        let config = make_config("[param_space]\nmin_hold_days = 1, 2.5\n");
        assert!(build_param_space(&config, &StrategyConfig::default()).is_err());
    }

    #[test]
    fn param_space_defaults_when_absent() {
        let config = make_config("");
        let base = StrategyConfig::default();
        let space = build_param_space(&config, &base).unwrap();
        assert_eq!(space, ParamSpace::default_for(&base));
    }
}
