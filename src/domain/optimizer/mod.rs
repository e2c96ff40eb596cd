//! Parameter optimizer: scoring, trial bookkeeping and the search session.
//!
//! Three interchangeable searches ([`grid`], [`bayesian`], [`genetic`])
//! explore a [`ParamSpace`] against the same objective. Each trial derives a
//! fresh [`StrategyConfig`] from the base config, so no state leaks between
//! trials. A trial that errors is scored with the disqualification sentinel
//! and the search carries on.

pub mod bayesian;
pub mod genetic;
pub mod grid;
pub mod param_space;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::backtest::{run_batch, BatchReport, SecuritySeries};
use crate::domain::error::BandtraderError;
use crate::domain::strategy_config::{ParamSet, StrategyConfig};
use crate::ports::session_port::{KeepAwake, ResultsSink};

pub use bayesian::{BayesianRun, BayesianSettings};
pub use genetic::{GenerationStats, GeneticRun, GeneticSettings};
pub use grid::GridSettings;
pub use param_space::{ParamAxis, ParamSpace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Grid,
    Bayesian,
    Genetic,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Grid => "grid",
            SearchMethod::Bayesian => "bayesian",
            SearchMethod::Genetic => "genetic",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMethod {
    type Err = BandtraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grid" => Ok(SearchMethod::Grid),
            "bayesian" | "tpe" => Ok(SearchMethod::Bayesian),
            "genetic" | "ga" => Ok(SearchMethod::Genetic),
            other => Err(BandtraderError::ConfigInvalid {
                section: "optimizer".into(),
                key: "method".into(),
                reason: format!("unknown search method '{other}'"),
            }),
        }
    }
}

/// Composite objective and its trade-count floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub return_weight: f64,
    pub win_rate_weight: f64,
    pub min_trades: usize,
    pub disqualified_score: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        ScoringPolicy {
            return_weight: 0.6,
            win_rate_weight: 0.4,
            min_trades: 5,
            disqualified_score: -999.0,
        }
    }
}

impl ScoringPolicy {
    pub fn score(&self, m: &TrialMetrics) -> f64 {
        if m.trades < self.min_trades {
            return self.disqualified_score;
        }
        self.return_weight * m.profit_rate + self.win_rate_weight * 100.0 * m.win_rate
    }
}

/// What one evaluation of a parameter set measured across the batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrialMetrics {
    /// Percent return over the capital of the securities that traded.
    pub profit_rate: f64,
    /// Trade-weighted win rate.
    pub win_rate: f64,
    pub trades: usize,
}

/// Evaluates one parameter set. Shared across rayon workers.
pub trait TrialEvaluator: Sync {
    fn evaluate(&self, params: &ParamSet) -> Result<TrialMetrics, BandtraderError>;
}

/// Backtests the loaded batch under the base config plus the trial params.
pub struct BatchEvaluator {
    base: StrategyConfig,
    series: Vec<SecuritySeries>,
}

impl BatchEvaluator {
    pub fn new(base: StrategyConfig, series: Vec<SecuritySeries>) -> Self {
        BatchEvaluator { base, series }
    }

    pub fn base(&self) -> &StrategyConfig {
        &self.base
    }

    fn config_for(&self, params: &ParamSet) -> Result<StrategyConfig, BandtraderError> {
        let config = self.base.with_params(params).config;
        config.validate()?;
        Ok(config)
    }

    /// Full batch report for `params` applied on top of the base config.
    pub fn run_backtest_with_params(
        &self,
        params: &ParamSet,
        verbose: bool,
    ) -> Result<BatchReport, BandtraderError> {
        let config = self.config_for(params)?;
        Ok(run_batch(&self.series, &config, verbose))
    }
}

impl TrialEvaluator for BatchEvaluator {
    fn evaluate(&self, params: &ParamSet) -> Result<TrialMetrics, BandtraderError> {
        let config = self.config_for(params)?;
        let report = run_batch(&self.series, &config, false);
        let traded: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.summary.trade_count > 0)
            .collect();

        let trades: usize = traded.iter().map(|r| r.summary.trade_count).sum();
        let total_profit: f64 = traded.iter().map(|r| r.summary.total_profit).sum();
        let wins: f64 = traded
            .iter()
            .map(|r| r.summary.win_rate * r.summary.trade_count as f64)
            .sum();

        let capital = config.initial_capital * traded.len() as f64;
        Ok(TrialMetrics {
            profit_rate: if capital > 0.0 {
                total_profit / capital * 100.0
            } else {
                0.0
            },
            win_rate: if trades > 0 {
                wins / trades as f64
            } else {
                0.0
            },
            trades,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialState {
    Complete,
    /// Below the trade-count floor.
    Disqualified,
    /// The evaluation returned an error.
    Failed,
    /// Stopped as clearly bad by the sequential search.
    Pruned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub params: ParamSet,
    pub profit_rate: f64,
    pub win_rate: f64,
    pub trades: usize,
    pub score: f64,
    pub state: TrialState,
}

/// Evaluate `params` and turn the outcome into a trial. Never fails.
pub fn run_trial<E: TrialEvaluator + ?Sized>(
    evaluator: &E,
    policy: &ScoringPolicy,
    number: usize,
    params: ParamSet,
) -> Trial {
    match evaluator.evaluate(&params) {
        Ok(m) => {
            let score = policy.score(&m);
            let state = if m.trades < policy.min_trades {
                TrialState::Disqualified
            } else {
                TrialState::Complete
            };
            debug!(
                trial = number,
                score,
                profit_rate = m.profit_rate,
                win_rate = m.win_rate,
                trades = m.trades,
                "trial evaluated"
            );
            Trial {
                number,
                params,
                profit_rate: m.profit_rate,
                win_rate: m.win_rate,
                trades: m.trades,
                score,
                state,
            }
        }
        Err(e) => {
            warn!(trial = number, error = %e, "trial failed");
            Trial {
                number,
                params,
                profit_rate: 0.0,
                win_rate: 0.0,
                trades: 0,
                score: policy.disqualified_score,
                state: TrialState::Failed,
            }
        }
    }
}

/// Append-only record of every evaluated trial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialHistory {
    trials: Vec<Trial>,
}

impl TrialHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trials(trials: Vec<Trial>) -> Self {
        TrialHistory { trials }
    }

    pub fn push(&mut self, trial: Trial) {
        self.trials.push(trial);
    }

    pub fn extend(&mut self, trials: impl IntoIterator<Item = Trial>) {
        self.trials.extend(trials);
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Number for the next trial appended.
    pub fn next_number(&self) -> usize {
        self.trials.iter().map(|t| t.number + 1).max().unwrap_or(0)
    }

    /// Highest-scoring trial; the earliest wins ties.
    pub fn best(&self) -> Option<&Trial> {
        self.trials.iter().fold(None, |best: Option<&Trial>, t| match best {
            Some(b) if b.score >= t.score => Some(b),
            _ => Some(t),
        })
    }
}

/// Running best-so-far, logging each improvement.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BestTracker {
    best: f64,
}

impl BestTracker {
    pub(crate) fn new(prior: &TrialHistory) -> Self {
        BestTracker {
            best: prior.best().map_or(f64::NEG_INFINITY, |t| t.score),
        }
    }

    pub(crate) fn best(&self) -> f64 {
        self.best
    }

    /// Returns true when `trial` beats everything seen so far.
    pub(crate) fn observe(&mut self, trial: &Trial) -> bool {
        if trial.score > self.best {
            self.best = trial.score;
            info!(
                trial = trial.number,
                score = trial.score,
                profit_rate = trial.profit_rate,
                win_rate = trial.win_rate,
                trades = trial.trades,
                params = ?trial.params,
                "better parameter combination found"
            );
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub method: SearchMethod,
    pub seed: u64,
    pub scoring: ScoringPolicy,
    pub grid: GridSettings,
    pub bayesian: BayesianSettings,
    pub genetic: GeneticSettings,
    pub keep_awake_command: Option<String>,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            method: SearchMethod::Bayesian,
            seed: 42,
            scoring: ScoringPolicy::default(),
            grid: GridSettings::default(),
            bayesian: BayesianSettings::default(),
            genetic: GeneticSettings::default(),
            keep_awake_command: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub method: SearchMethod,
    /// Resumed trials followed by this session's trials.
    pub history: TrialHistory,
    pub best: Option<Trial>,
    pub hall_of_fame: Vec<Trial>,
    pub logbook: Vec<GenerationStats>,
    pub stopped_early: bool,
}

struct KeepAwakeGuard<'a> {
    inner: &'a dyn KeepAwake,
    held: bool,
}

impl<'a> KeepAwakeGuard<'a> {
    fn acquire(inner: &'a dyn KeepAwake) -> Self {
        let held = match inner.acquire() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "could not inhibit sleep; continuing");
                false
            }
        };
        KeepAwakeGuard { inner, held }
    }
}

impl Drop for KeepAwakeGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            self.inner.release();
        }
    }
}

/// One optimization run with its lifecycle collaborators.
pub struct OptimizerSession<'a, E: TrialEvaluator> {
    pub evaluator: &'a E,
    pub space: &'a ParamSpace,
    pub settings: &'a OptimizerSettings,
    pub keep_awake: &'a dyn KeepAwake,
    pub sink: &'a dyn ResultsSink,
}

impl<E: TrialEvaluator> OptimizerSession<'_, E> {
    pub fn run(&self, method: SearchMethod, resume: bool) -> Result<SearchOutcome, BandtraderError> {
        let _awake = KeepAwakeGuard::acquire(self.keep_awake);

        let prior = if resume {
            let trials = self.sink.load_history(method)?;
            info!(method = %method, trials = trials.len(), "resuming from saved history");
            TrialHistory::from_trials(trials)
        } else {
            TrialHistory::new()
        };

        info!(
            method = %method,
            axes = self.space.axes().len(),
            combinations = ?self.space.combination_count(),
            "optimization started"
        );

        let scoring = &self.settings.scoring;
        let seed = self.settings.seed;
        let mut outcome = SearchOutcome {
            method,
            history: prior.clone(),
            best: None,
            hall_of_fame: Vec::new(),
            logbook: Vec::new(),
            stopped_early: false,
        };

        match method {
            SearchMethod::Grid => {
                let trials = grid::grid_search(
                    self.evaluator,
                    self.space,
                    &self.settings.grid,
                    scoring,
                    seed,
                    &prior,
                );
                outcome.history.extend(trials);
            }
            SearchMethod::Bayesian => {
                let run = bayesian::bayesian_search(
                    self.evaluator,
                    self.space,
                    &self.settings.bayesian,
                    scoring,
                    seed,
                    &prior,
                );
                outcome.history.extend(run.trials);
                outcome.stopped_early = run.stopped_early;
            }
            SearchMethod::Genetic => {
                let run = genetic::genetic_search(
                    self.evaluator,
                    self.space,
                    &self.settings.genetic,
                    scoring,
                    seed,
                    &prior,
                );
                outcome.history.extend(run.trials);
                outcome.hall_of_fame = run.hall_of_fame;
                outcome.logbook = run.logbook;
            }
        }

        outcome.best = outcome.history.best().cloned();
        self.sink
            .save(method, &outcome.history, outcome.best.as_ref())?;

        match &outcome.best {
            Some(best) => info!(
                method = %method,
                trials = outcome.history.len(),
                score = best.score,
                params = ?best.params,
                "optimization finished"
            ),
            None => warn!(method = %method, "optimization produced no trials"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Scores a parameter set by its distance to a target point.
    pub struct TargetEvaluator {
        pub target: ParamSet,
        pub trades: usize,
    }

    impl TrialEvaluator for TargetEvaluator {
        fn evaluate(&self, params: &ParamSet) -> Result<TrialMetrics, BandtraderError> {
            let distance: f64 = self
                .target
                .iter()
                .map(|(k, v)| (params.get(k).copied().unwrap_or(0.0) - v).abs())
                .sum();
            Ok(TrialMetrics {
                profit_rate: 100.0 - distance,
                win_rate: 0.5,
                trades: self.trades,
            })
        }
    }

    pub fn space_3x3() -> ParamSpace {
        ParamSpace::new(vec![
            ParamAxis {
                name: "x".into(),
                values: vec![1.0, 2.0, 3.0],
            },
            ParamAxis {
                name: "y".into(),
                values: vec![10.0, 20.0, 30.0],
            },
        ])
        .unwrap()
    }

    pub fn target(x: f64, y: f64) -> ParamSet {
        [("x".to_string(), x), ("y".to_string(), y)].into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::cell::Cell;

    fn trial(number: usize, score: f64) -> Trial {
        Trial {
            number,
            params: ParamSet::new(),
            profit_rate: 0.0,
            win_rate: 0.0,
            trades: 10,
            score,
            state: TrialState::Complete,
        }
    }

    #[test]
    fn score_combines_return_and_win_rate() {
        let policy = ScoringPolicy::default();
        let m = TrialMetrics {
            profit_rate: 10.0,
            win_rate: 0.5,
            trades: 5,
        };
        assert!((policy.score(&m) - 26.0).abs() < 1e-12);
    }

    #[test]
    fn four_trades_disqualified() {
        let policy = ScoringPolicy::default();
        let m = TrialMetrics {
            profit_rate: 500.0,
            win_rate: 1.0,
            trades: 4,
        };
        assert_eq!(policy.score(&m), -999.0);
    }

    struct Failing;
    impl TrialEvaluator for Failing {
        fn evaluate(&self, _: &ParamSet) -> Result<TrialMetrics, BandtraderError> {
            Err(BandtraderError::InvalidParam {
                name: "x".into(),
                reason: "boom".into(),
            })
        }
    }

    #[test]
    fn failing_evaluation_scores_sentinel() {
        let t = run_trial(&Failing, &ScoringPolicy::default(), 3, target(1.0, 1.0));
        assert_eq!(t.state, TrialState::Failed);
        assert_eq!(t.score, -999.0);
        assert_eq!(t.number, 3);
    }

    #[test]
    fn run_trial_marks_disqualified() {
        let eval = TargetEvaluator {
            target: target(1.0, 10.0),
            trades: 2,
        };
        let t = run_trial(&eval, &ScoringPolicy::default(), 0, target(1.0, 10.0));
        assert_eq!(t.state, TrialState::Disqualified);
    }

    #[test]
    fn history_best_prefers_earliest_tie() {
        let mut h = TrialHistory::new();
        h.push(trial(0, 5.0));
        h.push(trial(1, 9.0));
        h.push(trial(2, 9.0));
        assert_eq!(h.best().unwrap().number, 1);
        assert_eq!(h.next_number(), 3);
        assert!(TrialHistory::new().best().is_none());
    }

    #[test]
    fn method_parses_aliases() {
        assert_eq!("TPE".parse::<SearchMethod>().unwrap(), SearchMethod::Bayesian);
        assert_eq!("grid".parse::<SearchMethod>().unwrap(), SearchMethod::Grid);
        assert!("anneal".parse::<SearchMethod>().is_err());
    }

    #[derive(Default)]
    struct CountingAwake {
        acquired: Cell<u32>,
        released: Cell<u32>,
    }

    impl KeepAwake for CountingAwake {
        fn acquire(&self) -> Result<(), BandtraderError> {
            self.acquired.set(self.acquired.get() + 1);
            Ok(())
        }
        fn release(&self) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[derive(Default)]
    struct MemorySink {
        prior: Vec<Trial>,
        saved: std::cell::RefCell<Option<(usize, Option<f64>)>>,
        fail_save: bool,
    }

    impl ResultsSink for MemorySink {
        fn load_history(&self, _: SearchMethod) -> Result<Vec<Trial>, BandtraderError> {
            Ok(self.prior.clone())
        }
        fn save(
            &self,
            _: SearchMethod,
            history: &TrialHistory,
            best: Option<&Trial>,
        ) -> Result<(), BandtraderError> {
            if self.fail_save {
                return Err(BandtraderError::Report {
                    reason: "disk full".into(),
                });
            }
            *self.saved.borrow_mut() = Some((history.len(), best.map(|b| b.score)));
            Ok(())
        }
    }

    #[test]
    fn session_runs_grid_and_saves() {
        let eval = TargetEvaluator {
            target: target(2.0, 20.0),
            trades: 10,
        };
        let space = space_3x3();
        let settings = OptimizerSettings::default();
        let awake = CountingAwake::default();
        let sink = MemorySink::default();
        let session = OptimizerSession {
            evaluator: &eval,
            space: &space,
            settings: &settings,
            keep_awake: &awake,
            sink: &sink,
        };

        let outcome = session.run(SearchMethod::Grid, false).unwrap();
        assert_eq!(outcome.history.len(), 9);
        assert_eq!(outcome.best.unwrap().params, target(2.0, 20.0));
        assert_eq!(awake.acquired.get(), 1);
        assert_eq!(awake.released.get(), 1);
        assert_eq!(sink.saved.borrow().map(|s| s.0), Some(9));
    }

    #[test]
    fn session_releases_keep_awake_on_error() {
        let eval = TargetEvaluator {
            target: target(2.0, 20.0),
            trades: 10,
        };
        let space = space_3x3();
        let settings = OptimizerSettings::default();
        let awake = CountingAwake::default();
        let sink = MemorySink {
            fail_save: true,
            ..Default::default()
        };
        let session = OptimizerSession {
            evaluator: &eval,
            space: &space,
            settings: &settings,
            keep_awake: &awake,
            sink: &sink,
        };

        assert!(session.run(SearchMethod::Grid, false).is_err());
        assert_eq!(awake.released.get(), 1);
    }

    #[test]
    fn grid_resume_skips_evaluated_points() {
        let eval = TargetEvaluator {
            target: target(2.0, 20.0),
            trades: 10,
        };
        let space = space_3x3();
        let settings = OptimizerSettings::default();
        let awake = CountingAwake::default();
        let mut done = trial(0, 1.0);
        done.params = target(1.0, 10.0);
        let sink = MemorySink {
            prior: vec![done],
            ..Default::default()
        };
        let session = OptimizerSession {
            evaluator: &eval,
            space: &space,
            settings: &settings,
            keep_awake: &awake,
            sink: &sink,
        };

        let outcome = session.run(SearchMethod::Grid, true).unwrap();
        assert_eq!(outcome.history.len(), 9);
        assert_eq!(outcome.history.trials()[0].number, 0);
        assert!(outcome.history.trials()[1..].iter().all(|t| t.number >= 1));
    }
}
