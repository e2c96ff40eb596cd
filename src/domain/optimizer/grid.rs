//! Exhaustive grid search with a seeded subsample above the size cap.
//!
//! Trials are independent and evaluated with rayon; the history and the
//! best-so-far are merged after every trial has finished.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::info;

use super::param_space::ParamSpace;
use super::{run_trial, BestTracker, ScoringPolicy, Trial, TrialEvaluator, TrialHistory};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSettings {
    /// Above this many combinations a uniform subsample of this size is
    /// evaluated instead.
    pub max_combinations: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        GridSettings {
            max_combinations: 10_000,
        }
    }
}

/// Index vectors to evaluate, in a deterministic order for a given seed.
pub fn grid_candidates(space: &ParamSpace, cap: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(seed);
    match space.combination_count() {
        Some(total) if total <= cap => (0..total).map(|n| space.decode(n)).collect(),
        Some(total) => {
            info!(total, cap, "grid exceeds cap; evaluating a seeded subsample");
            let mut picks = rand::seq::index::sample(&mut rng, total, cap).into_vec();
            picks.sort_unstable();
            picks.into_iter().map(|n| space.decode(n)).collect()
        }
        None => {
            info!(cap, "grid size overflows; evaluating random distinct points");
            let mut seen = HashSet::with_capacity(cap);
            let mut out = Vec::with_capacity(cap);
            while out.len() < cap {
                let idx = space.random_indices(&mut rng);
                if seen.insert(idx.clone()) {
                    out.push(idx);
                }
            }
            out
        }
    }
}

/// Evaluate the grid, skipping points already present in `prior`.
pub fn grid_search<E: TrialEvaluator + ?Sized>(
    evaluator: &E,
    space: &ParamSpace,
    settings: &GridSettings,
    policy: &ScoringPolicy,
    seed: u64,
    prior: &TrialHistory,
) -> Vec<Trial> {
    let done: HashSet<Vec<usize>> = prior
        .trials()
        .iter()
        .filter_map(|t| space.indices_of(&t.params))
        .collect();

    let pending: Vec<Vec<usize>> = grid_candidates(space, settings.max_combinations, seed)
        .into_iter()
        .filter(|idx| !done.contains(idx))
        .collect();
    info!(
        pending = pending.len(),
        skipped = done.len(),
        "grid search evaluating"
    );

    let start = prior.next_number();
    let trials: Vec<Trial> = pending
        .par_iter()
        .enumerate()
        .map(|(i, idx)| run_trial(evaluator, policy, start + i, space.params_at(idx)))
        .collect();

    let mut tracker = BestTracker::new(prior);
    for t in &trials {
        tracker.observe(t);
    }
    trials
}
