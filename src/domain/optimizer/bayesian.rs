//! Sequential model-based search (tree-structured Parzen estimator).
//!
//! After a number of random start-up trials, observations are split into a
//! "good" top share and the rest. Each axis gets a Laplace-smoothed
//! frequency model per group; candidates are drawn from the good model and
//! the one maximising l(x)/g(x) is proposed.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::param_space::ParamSpace;
use super::{run_trial, BestTracker, ScoringPolicy, Trial, TrialEvaluator, TrialHistory, TrialState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BayesianSettings {
    pub n_trials: usize,
    pub n_startup_trials: usize,
    pub n_candidates: usize,
    /// Share of observations treated as good.
    pub gamma: f64,
    /// Trials scoring below this are marked pruned.
    pub prune_threshold: f64,
    /// Stop once the best has not improved for this many trials.
    pub patience: usize,
    /// Improvement is checked every this many trials.
    pub check_interval: usize,
}

impl Default for BayesianSettings {
    fn default() -> Self {
        BayesianSettings {
            n_trials: 40,
            n_startup_trials: 10,
            n_candidates: 15,
            gamma: 0.25,
            prune_threshold: -500.0,
            patience: 15,
            check_interval: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BayesianRun {
    pub trials: Vec<Trial>,
    pub stopped_early: bool,
}

struct Observation {
    indices: Vec<usize>,
    score: f64,
}

fn axis_counts(observations: &[&Observation], axis: usize, k: usize) -> Vec<f64> {
    let mut counts = vec![1.0; k];
    for o in observations {
        counts[o.indices[axis]] += 1.0;
    }
    counts
}

/// Propose the next index vector from past observations.
fn suggest<R: Rng + ?Sized>(
    space: &ParamSpace,
    observations: &[Observation],
    settings: &BayesianSettings,
    rng: &mut R,
) -> Vec<usize> {
    let mut ranked: Vec<&Observation> = observations.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let n = ranked.len();
    let n_good = ((n as f64 * settings.gamma).ceil() as usize).clamp(1, n);
    let (good, bad) = ranked.split_at(n_good);

    space
        .axes()
        .iter()
        .enumerate()
        .map(|(a, axis)| {
            let k = axis.values.len();
            let good_counts = axis_counts(good, a, k);
            let bad_counts = axis_counts(bad, a, k);
            let good_total: f64 = good_counts.iter().sum();
            let bad_total: f64 = bad_counts.iter().sum();

            let ratio = |i: usize| (good_counts[i] / good_total) / (bad_counts[i] / bad_total);

            let Ok(dist) = WeightedIndex::new(&good_counts) else {
                return rng.gen_range(0..k);
            };
            (0..settings.n_candidates.max(1))
                .map(|_| dist.sample(rng))
                .fold(None, |best: Option<usize>, i| match best {
                    Some(b) if ratio(b) >= ratio(i) => Some(b),
                    _ => Some(i),
                })
                .unwrap_or(0)
        })
        .collect()
}

pub fn bayesian_search<E: TrialEvaluator + ?Sized>(
    evaluator: &E,
    space: &ParamSpace,
    settings: &BayesianSettings,
    policy: &ScoringPolicy,
    seed: u64,
    prior: &TrialHistory,
) -> BayesianRun {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut observations: Vec<Observation> = prior
        .trials()
        .iter()
        .filter_map(|t| {
            Some(Observation {
                indices: space.indices_of(&t.params)?,
                score: t.score,
            })
        })
        .collect();

    let mut tracker = BestTracker::new(prior);
    let mut checked_best = tracker.best();
    let mut stale = 0usize;
    let mut stopped_early = false;
    let start = prior.next_number();
    let mut trials = Vec::with_capacity(settings.n_trials);

    for t in 0..settings.n_trials {
        let warming_up =
            observations.is_empty() || observations.len() < settings.n_startup_trials;
        let indices = if warming_up {
            space.random_indices(&mut rng)
        } else {
            suggest(space, &observations, settings, &mut rng)
        };

        let mut trial = run_trial(evaluator, policy, start + t, space.params_at(&indices));
        if trial.score < settings.prune_threshold && trial.state != TrialState::Failed {
            trial.state = TrialState::Pruned;
        }
        tracker.observe(&trial);
        observations.push(Observation {
            indices,
            score: trial.score,
        });
        trials.push(trial);

        let interval = settings.check_interval.max(1);
        if (t + 1) % interval == 0 {
            if tracker.best() > checked_best {
                checked_best = tracker.best();
                stale = 0;
            } else {
                stale += interval;
            }
            if settings.patience > 0 && stale >= settings.patience {
                info!(trials = t + 1, stale, "early stopping: no improvement");
                stopped_early = true;
                break;
            }
        }
    }

    BayesianRun {
        trials,
        stopped_early,
    }
}
