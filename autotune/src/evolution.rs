//! Differential evolution over the flat axis encoding.
//!
//! Classic DE/rand/1/bin with two departures forced by the search space:
//! power-of-two axes do their arithmetic in exponent space, and categorical
//! axes (permutations, choices, optional flags) reassort from the three
//! parents instead of interpolating. Every trial vector is decoded through
//! [`ConfigSpec::decode`], so candidates handed to the objective are always
//! normalized, and the genotype is re-encoded from the decoded config to
//! keep the two in sync.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snafu::{ResultExt, ensure};
use tessel_config::{AxisValue, Config, ConfigSpec, TunableAxis};

use crate::error::{self, Result};
use crate::sample::{donor_value, random_value};
use crate::{BenchResult, TuneReport};

#[derive(Debug, Clone, bon::Builder)]
pub struct EvolutionSettings {
    #[builder(default = 40)]
    pub population_size: usize,
    #[builder(default = 20)]
    pub generations: usize,
    #[builder(default = 0.8)]
    pub crossover_rate: f64,
    /// Fixed seed: the same spec, settings, and objective replay the same
    /// candidate sequence.
    #[builder(default = 0)]
    pub seed: u64,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Member {
    genes: Vec<AxisValue>,
    config: Config,
    score: Duration,
}

pub struct DifferentialEvolutionSearch {
    settings: EvolutionSettings,
}

impl DifferentialEvolutionSearch {
    pub fn new(settings: EvolutionSettings) -> Self {
        Self { settings }
    }

    pub fn run(
        &self,
        spec: &ConfigSpec,
        mut objective: impl FnMut(&Config) -> BenchResult,
    ) -> Result<TuneReport> {
        let axes = spec.flat_axes();
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        // rand/1 mutation draws three distinct non-target members.
        let pop_size = self.settings.population_size.max(4);
        let mut evaluated = 0usize;

        let mut population: Vec<Member> = Vec::with_capacity(pop_size);
        population.push(measure(spec, spec.default_config(), &mut objective, &mut evaluated));
        while population.len() < pop_size {
            let genes: Vec<AxisValue> =
                axes.iter().map(|a| random_value(&mut rng, &a.domain)).collect();
            let config = spec.decode(&genes).context(error::ConfigSnafu)?;
            population.push(measure(spec, config, &mut objective, &mut evaluated));
        }

        for generation in 0..self.settings.generations {
            for i in 0..pop_size {
                let [r0, r1, r2] = distinct_indices(&mut rng, pop_size, i);
                let trial = self.trial_genes(&mut rng, &axes, &population, i, [r0, r1, r2]);
                let config = spec.decode(&trial).context(error::ConfigSnafu)?;
                let challenger = measure(spec, config, &mut objective, &mut evaluated);
                if challenger.score < population[i].score {
                    population[i] = challenger;
                }
            }
            if let Some(best) = population.iter().min_by_key(|m| m.score) {
                tracing::debug!(generation, best = ?best.score, "{}", best.config.summary());
            }
        }

        let Some(best) = population.iter().min_by_key(|m| m.score) else {
            return error::AllCandidatesFailedSnafu { tried: evaluated }.fail();
        };
        ensure!(best.score < Duration::MAX, error::AllCandidatesFailedSnafu { tried: evaluated });
        Ok(TuneReport { best: best.config.clone(), best_time: best.score, evaluated })
    }

    /// Binomial crossover of the donor vector with parent `i`. One forced
    /// axis guarantees the trial differs from the parent genotype.
    fn trial_genes(
        &self,
        rng: &mut StdRng,
        axes: &[TunableAxis],
        population: &[Member],
        i: usize,
        [r0, r1, r2]: [usize; 3],
    ) -> Vec<AxisValue> {
        let forced = rng.random_range(0..axes.len());
        axes.iter()
            .enumerate()
            .map(|(j, axis)| {
                let donor = donor_value(
                    rng,
                    &axis.domain,
                    &population[r0].genes[j],
                    &population[r1].genes[j],
                    &population[r2].genes[j],
                );
                if j == forced || rng.random_bool(self.settings.crossover_rate) {
                    donor
                } else {
                    population[i].genes[j].clone()
                }
            })
            .collect()
    }
}

fn measure(
    spec: &ConfigSpec,
    config: Config,
    objective: &mut impl FnMut(&Config) -> BenchResult,
    evaluated: &mut usize,
) -> Member {
    let genes = spec.encode(&config);
    let outcome = objective(&config);
    *evaluated += 1;
    if let BenchResult::Failure(reason) = &outcome {
        tracing::debug!(reason = %reason, "candidate failed: {}", config.summary());
    }
    Member { genes, score: outcome.score(), config }
}

fn distinct_indices(rng: &mut StdRng, n: usize, avoid: usize) -> [usize; 3] {
    let mut out = [0usize; 3];
    let mut filled = 0;
    while filled < 3 {
        let c = rng.random_range(0..n);
        if c != avoid && !out[..filled].contains(&c) {
            out[filled] = c;
            filled += 1;
        }
    }
    out
}
