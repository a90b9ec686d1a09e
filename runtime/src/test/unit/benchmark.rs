use std::cell::Cell;
use std::time::Duration;

use crate::benchmark::{benchmark, BenchmarkConfig};
use crate::error::Error;

#[test]
fn runs_warmups_plus_timing_runs() {
    let calls = Cell::new(0usize);
    let config = BenchmarkConfig::builder().warmup_runs(2).timing_runs(5).build();
    let result = benchmark(
        || {
            calls.set(calls.get() + 1);
            Ok(())
        },
        &config,
    )
    .unwrap();
    assert_eq!(calls.get(), 7);
    assert_eq!(result.runs, 5);
    assert!(result.min <= result.mean);
}

#[test]
fn timing_follows_the_scoring_policy() {
    let config = BenchmarkConfig::builder().build();
    let result = benchmark(|| Ok(()), &config).unwrap();
    assert_eq!(result.timing(&config), result.min);

    let by_mean = BenchmarkConfig::builder().take_minimum(false).build();
    assert_eq!(result.timing(&by_mean), result.mean);
}

#[test]
fn exceeding_the_time_budget_fails_the_candidate() {
    let calls = Cell::new(0usize);
    let config = BenchmarkConfig::builder()
        .warmup_runs(0)
        .timing_runs(1000)
        .timeout(Duration::from_millis(5))
        .build();
    let err = benchmark(
        || {
            calls.set(calls.get() + 1);
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        },
        &config,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BenchmarkTimeout { .. }), "{err}");
    // The deadline is checked between runs, so the stall is bounded well
    // below the full run count.
    assert!(calls.get() < 1000);
}

#[test]
fn first_failure_aborts() {
    let calls = Cell::new(0usize);
    let config = BenchmarkConfig::builder().warmup_runs(0).timing_runs(4).build();
    let err = benchmark(
        || {
            calls.set(calls.get() + 1);
            Err(Error::UnboundSize { name: "n".into() })
        },
        &config,
    )
    .unwrap_err();
    assert_eq!(calls.get(), 1);
    assert!(matches!(err, Error::UnboundSize { .. }));
}
