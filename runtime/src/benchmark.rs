//! Wall-clock timing for autotune candidates.

use std::time::{Duration, Instant};

use crate::error::{self, Result};

#[derive(Debug, Clone, bon::Builder)]
pub struct BenchmarkConfig {
    #[builder(default = 1)]
    pub warmup_runs: usize,
    #[builder(default = 3)]
    pub timing_runs: usize,
    /// Score candidates by their fastest run rather than the mean. The
    /// minimum is less sensitive to scheduling noise on a loaded machine.
    #[builder(default = true)]
    pub take_minimum: bool,
    /// Total wall-clock budget for one candidate, checked between runs. A
    /// candidate that blows through it fails instead of stalling the search.
    #[builder(default = Duration::from_secs(60))]
    pub timeout: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkResult {
    pub min: Duration,
    pub mean: Duration,
    pub runs: usize,
}

impl BenchmarkResult {
    /// The score under the given config's timing policy.
    pub fn timing(&self, config: &BenchmarkConfig) -> Duration {
        if config.take_minimum { self.min } else { self.mean }
    }
}

/// Run `work` a few times and report timing. The first error aborts the
/// benchmark; a candidate that fails once would not be trustworthy anyway.
pub fn benchmark(mut work: impl FnMut() -> Result<()>, config: &BenchmarkConfig) -> Result<BenchmarkResult> {
    let deadline = Instant::now() + config.timeout;
    let overtime = || Instant::now() > deadline;
    for _ in 0..config.warmup_runs {
        work()?;
        snafu::ensure!(!overtime(), error::BenchmarkTimeoutSnafu { limit: config.timeout });
    }
    let runs = config.timing_runs.max(1);
    let mut min = Duration::MAX;
    let mut total = Duration::ZERO;
    for _ in 0..runs {
        let start = Instant::now();
        work()?;
        let elapsed = start.elapsed();
        min = min.min(elapsed);
        total += elapsed;
        snafu::ensure!(!overtime(), error::BenchmarkTimeoutSnafu { limit: config.timeout });
    }
    Ok(BenchmarkResult { min, mean: total / runs as u32, runs })
}
