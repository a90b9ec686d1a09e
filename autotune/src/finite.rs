//! Exhaustive timing over an explicit config list.

use snafu::{ResultExt, ensure};
use tessel_config::{Config, ConfigSpec};

use crate::error::{self, Result};
use crate::{BenchResult, TuneReport};

/// Benchmarks every config in a caller-supplied list and picks the fastest.
///
/// Used when a kernel is restricted to a known-good set of configs; a list
/// of one would make the search pointless, so fewer than two is an error.
#[derive(Debug)]
pub struct FiniteSearch {
    configs: Vec<Config>,
}

impl FiniteSearch {
    /// Validates each config strictly against `spec`. Duplicates (after
    /// normalization) are benchmarked once.
    pub fn new(spec: &ConfigSpec, configs: Vec<Config>) -> Result<Self> {
        ensure!(configs.len() >= 2, error::NotEnoughConfigsSnafu { got: configs.len() });
        let mut normalized: Vec<Config> = Vec::with_capacity(configs.len());
        for mut config in configs {
            spec.normalize(&mut config, true).context(error::ConfigSnafu)?;
            if !normalized.contains(&config) {
                normalized.push(config);
            }
        }
        Ok(Self { configs: normalized })
    }

    pub fn candidates(&self) -> &[Config] {
        &self.configs
    }

    pub fn run(&self, mut objective: impl FnMut(&Config) -> BenchResult) -> Result<TuneReport> {
        let mut best: Option<(usize, std::time::Duration)> = None;
        for (i, config) in self.configs.iter().enumerate() {
            let outcome = objective(config);
            match &outcome {
                BenchResult::Time(t) => {
                    tracing::debug!(candidate = i, time = ?t, "{}", config.summary());
                }
                BenchResult::Failure(reason) => {
                    tracing::warn!(candidate = i, reason = %reason, "candidate failed");
                }
            }
            let score = outcome.score();
            if best.is_none_or(|(_, s)| score < s) {
                best = Some((i, score));
            }
        }
        let Some((idx, time)) = best else {
            return error::AllCandidatesFailedSnafu { tried: 0usize }.fail();
        };
        ensure!(
            time < std::time::Duration::MAX,
            error::AllCandidatesFailedSnafu { tried: self.configs.len() }
        );
        Ok(TuneReport { best: self.configs[idx].clone(), best_time: time, evaluated: self.configs.len() })
    }
}
