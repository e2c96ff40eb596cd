//! Population-based search over index-vector individuals.
//!
//! Generational replacement with tournament selection, two-point crossover
//! and uniform integer mutation. Each generation's new individuals are
//! evaluated in parallel; an individual already evaluated reuses its score.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use super::param_space::ParamSpace;
use super::{run_trial, BestTracker, ScoringPolicy, Trial, TrialEvaluator, TrialHistory};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneticSettings {
    pub population: usize,
    pub generations: usize,
    pub crossover_prob: f64,
    pub mutation_prob: f64,
    /// Per-gene resample probability once an individual mutates.
    pub gene_mutation_prob: f64,
    pub tournament_size: usize,
    pub hall_of_fame: usize,
}

impl Default for GeneticSettings {
    fn default() -> Self {
        GeneticSettings {
            population: 50,
            generations: 20,
            crossover_prob: 0.7,
            mutation_prob: 0.2,
            gene_mutation_prob: 0.2,
            tournament_size: 3,
            hall_of_fame: 5,
        }
    }
}

/// Fitness summary of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub evaluations: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone)]
pub struct GeneticRun {
    pub trials: Vec<Trial>,
    /// Best distinct individuals seen, best first.
    pub hall_of_fame: Vec<Trial>,
    pub logbook: Vec<GenerationStats>,
}

type Genome = Vec<usize>;

fn tournament<'p, R: Rng + ?Sized>(
    population: &'p [Genome],
    fitness: &[f64],
    size: usize,
    rng: &mut R,
) -> &'p Genome {
    let mut winner = rng.gen_range(0..population.len());
    for _ in 1..size.max(1) {
        let challenger = rng.gen_range(0..population.len());
        if fitness[challenger] > fitness[winner] {
            winner = challenger;
        }
    }
    &population[winner]
}

/// Swap the genes between two random cut points.
fn two_point_crossover<R: Rng + ?Sized>(a: &mut Genome, b: &mut Genome, rng: &mut R) {
    let size = a.len().min(b.len());
    if size < 2 {
        return;
    }
    let mut lo = rng.gen_range(1..=size);
    let mut hi = rng.gen_range(1..size);
    if hi >= lo {
        hi += 1;
    } else {
        std::mem::swap(&mut lo, &mut hi);
    }
    for i in lo..hi {
        std::mem::swap(&mut a[i], &mut b[i]);
    }
}

fn uniform_mutation<R: Rng + ?Sized>(
    genome: &mut Genome,
    space: &ParamSpace,
    gene_prob: f64,
    rng: &mut R,
) {
    for (gene, axis) in genome.iter_mut().zip(space.axes()) {
        if rng.gen_bool(gene_prob) {
            *gene = rng.gen_range(0..axis.values.len());
        }
    }
}

fn update_hall_of_fame(hof: &mut Vec<Trial>, candidates: &[Trial], size: usize) {
    for t in candidates {
        if hof.iter().any(|h| h.params == t.params) {
            continue;
        }
        hof.push(t.clone());
    }
    // Stable sort keeps the earlier trial ahead on ties.
    hof.sort_by(|a, b| b.score.total_cmp(&a.score));
    hof.truncate(size);
}

fn stats(generation: usize, evaluations: usize, fitness: &[f64]) -> GenerationStats {
    let n = fitness.len().max(1) as f64;
    GenerationStats {
        generation,
        evaluations,
        avg: fitness.iter().sum::<f64>() / n,
        min: fitness.iter().copied().fold(f64::INFINITY, f64::min),
        max: fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

struct Evaluated<'a, E: TrialEvaluator + ?Sized> {
    evaluator: &'a E,
    space: &'a ParamSpace,
    policy: &'a ScoringPolicy,
    cache: HashMap<Genome, f64>,
    next_number: usize,
    trials: Vec<Trial>,
}

impl<E: TrialEvaluator + ?Sized> Evaluated<'_, E> {
    /// Fitness for every genome, evaluating unseen ones in parallel.
    /// Returns the fitness vector and the trials created.
    fn fitness_of(&mut self, population: &[Genome]) -> (Vec<f64>, Vec<Trial>) {
        let mut fresh: Vec<&Genome> = Vec::new();
        for g in population {
            if !self.cache.contains_key(g) && !fresh.contains(&g) {
                fresh.push(g);
            }
        }

        let start = self.next_number;
        let (evaluator, space, policy) = (self.evaluator, self.space, self.policy);
        let new_trials: Vec<Trial> = fresh
            .par_iter()
            .enumerate()
            .map(|(i, g)| run_trial(evaluator, policy, start + i, space.params_at(g)))
            .collect();
        self.next_number += new_trials.len();

        for (g, t) in fresh.iter().zip(&new_trials) {
            self.cache.insert((*g).clone(), t.score);
        }
        self.trials.extend(new_trials.iter().cloned());

        let fitness = population
            .iter()
            .map(|g| self.cache.get(g).copied().unwrap_or(self.policy.disqualified_score))
            .collect();
        (fitness, new_trials)
    }
}

pub fn genetic_search<E: TrialEvaluator + ?Sized>(
    evaluator: &E,
    space: &ParamSpace,
    settings: &GeneticSettings,
    policy: &ScoringPolicy,
    seed: u64,
    prior: &TrialHistory,
) -> GeneticRun {
    let mut rng = StdRng::seed_from_u64(seed);
    let size = settings.population.max(2);

    let mut evaluated = Evaluated {
        evaluator,
        space,
        policy,
        cache: HashMap::new(),
        next_number: prior.next_number(),
        trials: Vec::new(),
    };

    // Resumed trials seed the cache and the strongest of them the population.
    let mut seeded: Vec<(Genome, f64)> = prior
        .trials()
        .iter()
        .filter_map(|t| Some((space.indices_of(&t.params)?, t.score)))
        .collect();
    seeded.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (g, score) in &seeded {
        evaluated.cache.entry(g.clone()).or_insert(*score);
    }
    let mut population: Vec<Genome> = seeded
        .into_iter()
        .map(|(g, _)| g)
        .take(size / 2)
        .collect();
    while population.len() < size {
        population.push(space.random_indices(&mut rng));
    }

    let mut tracker = BestTracker::new(prior);
    let mut hall_of_fame: Vec<Trial> = Vec::new();
    update_hall_of_fame(&mut hall_of_fame, prior.trials(), settings.hall_of_fame);
    let mut logbook = Vec::with_capacity(settings.generations + 1);

    let (mut fitness, new_trials) = evaluated.fitness_of(&population);
    for t in &new_trials {
        tracker.observe(t);
    }
    update_hall_of_fame(&mut hall_of_fame, &new_trials, settings.hall_of_fame);
    let gen0 = stats(0, new_trials.len(), &fitness);
    info!(
        generation = 0,
        evals = gen0.evaluations,
        avg = gen0.avg,
        min = gen0.min,
        max = gen0.max,
        "generation evaluated"
    );
    logbook.push(gen0);

    for generation in 1..=settings.generations {
        let mut offspring: Vec<Genome> = (0..size)
            .map(|_| tournament(&population, &fitness, settings.tournament_size, &mut rng).clone())
            .collect();

        for pair in offspring.chunks_mut(2) {
            if let [a, b] = pair {
                if rng.gen_bool(settings.crossover_prob) {
                    two_point_crossover(a, b, &mut rng);
                }
            }
        }
        for child in &mut offspring {
            if rng.gen_bool(settings.mutation_prob) {
                uniform_mutation(child, space, settings.gene_mutation_prob, &mut rng);
            }
        }

        let (next_fitness, new_trials) = evaluated.fitness_of(&offspring);
        for t in &new_trials {
            tracker.observe(t);
        }
        update_hall_of_fame(&mut hall_of_fame, &new_trials, settings.hall_of_fame);

        population = offspring;
        fitness = next_fitness;
        let record = stats(generation, new_trials.len(), &fitness);
        info!(
            generation,
            evals = record.evaluations,
            avg = record.avg,
            min = record.min,
            max = record.max,
            "generation evaluated"
        );
        logbook.push(record);
    }

    GeneticRun {
        trials: evaluated.trials,
        hall_of_fame,
        logbook,
    }
}
