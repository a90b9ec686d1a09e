//! Config search for tessel kernels.
//!
//! Two strategies are provided: [`FiniteSearch`] times an explicit list of
//! configs, and [`DifferentialEvolutionSearch`] explores the flat axis
//! encoding of a [`tessel_config::ConfigSpec`]. Both are driven by an
//! objective closure supplied by the caller, so this crate never needs to
//! know how a candidate is compiled or launched.

pub mod error;
pub mod evolution;
pub mod finite;
mod sample;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use evolution::{DifferentialEvolutionSearch, EvolutionSettings};
pub use finite::FiniteSearch;

use std::time::Duration;

use tessel_config::Config;

/// Measured outcome of benchmarking one candidate config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchResult {
    /// Wall time of the candidate's best run.
    Time(Duration),
    /// Compilation or launch failed; the candidate is infinitely bad.
    Failure(String),
}

impl BenchResult {
    fn score(&self) -> Duration {
        match self {
            Self::Time(t) => *t,
            Self::Failure(_) => Duration::MAX,
        }
    }
}

/// Outcome of a completed search.
#[derive(Debug, Clone)]
pub struct TuneReport {
    pub best: Config,
    pub best_time: Duration,
    /// Total objective evaluations, including failed candidates.
    pub evaluated: usize,
}
