use proptest::prelude::*;
use test_case::test_case;

use crate::config::{Config, PidType};
use crate::error::Error;
use crate::spec::{
    BlockSizeSpec, ConfigSpec, FlattenLoopSpec, L2GroupingSpec, LoopOrderSpec, RangeSpec,
    ReductionLoopSpec,
};
use tessel_ir::program::BlockId;

fn sample_spec() -> ConfigSpec {
    ConfigSpec {
        block_sizes: vec![BlockSizeSpec::new(BlockId(0), 1000), BlockSizeSpec::new(BlockId(1), 48)],
        reduction_loops: vec![ReductionLoopSpec { block_id: BlockId(2), size_hint: 4096 }],
        loop_orders: vec![LoopOrderSpec { block_ids: vec![BlockId(0), BlockId(1)] }],
        flatten_loops: vec![FlattenLoopSpec { block_ids: vec![BlockId(0), BlockId(1)], allowed: true }],
        l2_groupings: vec![L2GroupingSpec { block_ids: [BlockId(0), BlockId(1)] }],
        ranges: vec![
            RangeSpec { block_id: BlockId(2), static_allowed: false },
            RangeSpec { block_id: BlockId(3), static_allowed: true },
        ],
        allow_use_yz_grid: None,
    }
}

#[test]
fn default_config_fills_every_table() {
    let spec = sample_spec();
    let config = spec.default_config();
    assert_eq!(config.block_sizes, vec![64, 64]);
    assert_eq!(config.reduction_loops, vec![None]);
    assert_eq!(config.loop_orders, vec![vec![0, 1]]);
    assert_eq!(config.flatten_loops, vec![false]);
    assert_eq!(config.l2_groupings, vec![1]);
    assert_eq!(config.range_unroll_factors, vec![0, 0]);
    assert_eq!(config.static_ranges, vec![false, false]);
    assert_eq!(config.num_warps, 4);
    assert_eq!(config.num_stages, 3);
}

#[test]
fn default_config_is_a_normalize_fixed_point() {
    let spec = sample_spec();
    let config = spec.default_config();
    let mut again = config.clone();
    spec.normalize(&mut again, true).unwrap();
    assert_eq!(config, again);
}

#[test_case(1, 1; "already minimal")]
#[test_case(3, 4; "rounds up to power of two")]
#[test_case(100_000, 8192; "clamped to table max")]
#[test_case(-5, 1; "negative becomes one")]
fn block_sizes_are_clamped(input: i64, expected: i64) {
    let spec = sample_spec();
    let mut config = Config::with_block_sizes(vec![input, 32]);
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.block_sizes[0], expected);
}

#[test]
fn reduction_loop_covering_full_extent_becomes_persistent() {
    let spec = sample_spec();
    let mut config = spec.default_config();
    config.reduction_loops = vec![Some(4096)];
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.reduction_loops, vec![None]);

    config.reduction_loops = vec![Some(128)];
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.reduction_loops, vec![Some(128)]);
}

#[test]
fn strict_rejects_surplus_entries() {
    let spec = sample_spec();
    let mut config = spec.default_config();
    config.block_sizes.push(64);
    let err = spec.normalize(&mut config, true).unwrap_err();
    assert!(matches!(err, Error::UnknownAxis { table: "block_sizes", got: 3, registered: 2 }));
}

#[test]
fn lenient_truncates_surplus_entries() {
    let spec = sample_spec();
    let mut config = spec.default_config();
    config.block_sizes.push(64);
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.block_sizes.len(), 2);
}

#[test]
fn bad_loop_order_is_rejected_in_both_modes() {
    let spec = sample_spec();
    for strict in [false, true] {
        let mut config = spec.default_config();
        config.loop_orders = vec![vec![0, 0]];
        let err = spec.normalize(&mut config, strict).unwrap_err();
        assert!(matches!(err, Error::NotAPermutation { .. }));
    }
}

#[test]
fn xyz_pid_downgrades_when_grid_disallows_it() {
    let spec = sample_spec();
    let mut config = spec.default_config();
    config.pid_type = PidType::Xyz;
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.pid_type, PidType::Flat);

    let mut config = spec.default_config();
    config.pid_type = PidType::Xyz;
    let err = spec.normalize(&mut config, true).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}

#[test]
fn xyz_pid_disables_l2_grouping() {
    let mut spec = sample_spec();
    spec.allow_use_yz_grid = Some(true);
    let mut config = spec.default_config();
    config.pid_type = PidType::Xyz;
    config.l2_groupings = vec![8];
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.l2_groupings, vec![1]);
}

#[test]
fn disallowed_flatten_is_forced_off() {
    let mut spec = sample_spec();
    spec.set_flatten_allowed(0, false);
    let mut config = spec.default_config();
    config.flatten_loops = vec![true];
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.flatten_loops, vec![false]);
}

#[test]
fn static_range_silences_other_range_knobs() {
    let spec = sample_spec();
    let mut config = spec.default_config();
    config.static_ranges = vec![false, true];
    config.range_unroll_factors = vec![2, 2];
    config.range_num_stages = vec![3, 3];
    spec.normalize(&mut config, false).unwrap();
    assert_eq!(config.range_unroll_factors, vec![2, 0]);
    assert_eq!(config.range_num_stages, vec![3, 0]);
    // static_allowed=false on the first range keeps it dynamic
    assert_eq!(config.static_ranges, vec![false, true]);
}

#[test]
fn remove_duplicates_keeps_first_registration() {
    let mut spec = sample_spec();
    spec.block_sizes.push(BlockSizeSpec::new(BlockId(0), 7));
    spec.remove_duplicates();
    assert_eq!(spec.block_sizes.len(), 2);
    assert_eq!(spec.block_sizes[0].size_hint, 1000);
}

#[test]
fn update_min_raises_default() {
    let mut spec = BlockSizeSpec::new(BlockId(0), 4);
    assert_eq!(spec.default_value(), 4);
    spec.update_min(16);
    assert_eq!(spec.default_value(), 16);
}

fn arb_config() -> impl Strategy<Value = Config> {
    (
        proptest::collection::vec(-4i64..20_000, 0..4),
        proptest::collection::vec(proptest::option::of(1i64..10_000), 0..3),
        proptest::collection::vec(0i64..200, 0..3),
        proptest::collection::vec(any::<bool>(), 0..3),
        (1u32..=64, 0u32..=12),
    )
        .prop_map(|(block_sizes, reduction_loops, l2_groupings, flatten_loops, (num_warps, num_stages))| {
            Config {
                block_sizes,
                reduction_loops,
                l2_groupings,
                flatten_loops,
                num_warps,
                num_stages,
                ..Default::default()
            }
        })
}

proptest! {
    /// Normalization is idempotent for any lenient-accepted input.
    #[test]
    fn normalize_is_idempotent(config in arb_config()) {
        let spec = sample_spec();
        let mut once = config;
        prop_assume!(spec.normalize(&mut once, false).is_ok());
        let mut twice = once.clone();
        spec.normalize(&mut twice, false).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Anything lenient normalization produces passes strict validation.
    #[test]
    fn normalized_configs_are_strictly_valid(config in arb_config()) {
        let spec = sample_spec();
        let mut normalized = config;
        prop_assume!(spec.normalize(&mut normalized, false).is_ok());
        let mut check = normalized.clone();
        prop_assert!(spec.normalize(&mut check, true).is_ok());
        prop_assert_eq!(normalized, check);
    }
}
