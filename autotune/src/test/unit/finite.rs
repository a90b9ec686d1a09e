use std::time::Duration;

use tessel_config::Config;

use crate::error::Error;
use crate::finite::FiniteSearch;
use crate::test::{prefer_large_blocks, sample_spec};
use crate::BenchResult;

#[test]
fn picks_the_fastest_candidate() {
    let spec = sample_spec();
    let configs: Vec<Config> =
        [32, 256, 64].into_iter().map(|b| Config::with_block_sizes(vec![b])).collect();
    let search = FiniteSearch::new(&spec, configs).unwrap();
    let report = search.run(prefer_large_blocks).unwrap();
    assert_eq!(report.best.block_sizes[0], 256);
    assert_eq!(report.evaluated, 3);
}

#[test]
fn fewer_than_two_configs_is_rejected() {
    let spec = sample_spec();
    let err = FiniteSearch::new(&spec, vec![Config::default()]).unwrap_err();
    assert!(matches!(err, Error::NotEnoughConfigs { got: 1 }), "{err}");
}

#[test]
fn duplicates_collapse_after_normalization() {
    let spec = sample_spec();
    // 100 and 128 both clamp to the same power of two.
    let configs = vec![Config::with_block_sizes(vec![100]), Config::with_block_sizes(vec![128])];
    let search = FiniteSearch::new(&spec, configs).unwrap();
    assert_eq!(search.candidates().len(), 1);
}

#[test]
fn failed_candidates_lose_to_any_timing() {
    let spec = sample_spec();
    let configs = vec![Config::with_block_sizes(vec![32]), Config::with_block_sizes(vec![256])];
    let search = FiniteSearch::new(&spec, configs).unwrap();
    let report = search
        .run(|config| {
            if config.block_sizes[0] == 256 {
                BenchResult::Failure("out of shared memory".into())
            } else {
                BenchResult::Time(Duration::from_millis(900))
            }
        })
        .unwrap();
    assert_eq!(report.best.block_sizes[0], 32);
}

#[test]
fn all_failures_is_an_error() {
    let spec = sample_spec();
    let configs = vec![Config::with_block_sizes(vec![32]), Config::with_block_sizes(vec![256])];
    let search = FiniteSearch::new(&spec, configs).unwrap();
    let err = search.run(|_| BenchResult::Failure("boom".into())).unwrap_err();
    assert!(matches!(err, Error::AllCandidatesFailed { tried: 2 }), "{err}");
}

#[test]
fn surplus_axes_are_rejected_strictly() {
    let spec = sample_spec();
    let configs = vec![
        Config::with_block_sizes(vec![32, 32, 32]),
        Config::with_block_sizes(vec![64]),
    ];
    let err = FiniteSearch::new(&spec, configs).unwrap_err();
    assert!(matches!(err, Error::Config { .. }), "{err}");
}
