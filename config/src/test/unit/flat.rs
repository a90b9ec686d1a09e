use crate::axis::AxisValue;
use crate::config::{IndexingStrategy, PidType};
use crate::spec::{BlockSizeSpec, ConfigSpec, FlattenLoopSpec, LoopOrderSpec, ReductionLoopSpec};
use tessel_ir::program::BlockId;

fn sample_spec() -> ConfigSpec {
    ConfigSpec {
        block_sizes: vec![BlockSizeSpec::new(BlockId(0), 512), BlockSizeSpec::new(BlockId(1), 512)],
        reduction_loops: vec![ReductionLoopSpec { block_id: BlockId(2), size_hint: 1024 }],
        loop_orders: vec![LoopOrderSpec { block_ids: vec![BlockId(0), BlockId(1)] }],
        flatten_loops: vec![FlattenLoopSpec { block_ids: vec![BlockId(0), BlockId(1)], allowed: true }],
        ..Default::default()
    }
}

#[test]
fn axis_count_matches_encoding_width() {
    let spec = sample_spec();
    let config = spec.default_config();
    assert_eq!(spec.flat_axes().len(), spec.encode(&config).len());
}

#[test]
fn every_default_lies_in_its_domain() {
    for axis in sample_spec().flat_axes() {
        assert!(axis.domain.contains(&axis.default), "axis {}", axis.name);
    }
}

#[test]
fn encoded_defaults_lie_in_their_domains() {
    let spec = sample_spec();
    let config = spec.default_config();
    for (axis, value) in spec.flat_axes().iter().zip(spec.encode(&config)) {
        assert!(axis.domain.contains(&value), "axis {}", axis.name);
    }
}

#[test]
fn decode_inverts_encode() {
    let spec = sample_spec();
    let mut config = spec.default_config();
    config.block_sizes = vec![128, 32];
    config.reduction_loops = vec![Some(64)];
    config.loop_orders = vec![vec![1, 0]];
    config.flatten_loops = vec![true];
    config.num_warps = 8;
    config.indexing = IndexingStrategy::BlockPtr;
    spec.normalize(&mut config, true).unwrap();

    let decoded = spec.decode(&spec.encode(&config)).unwrap();
    assert_eq!(decoded, config);
}

#[test]
fn decode_normalizes_out_of_domain_values() {
    let spec = sample_spec();
    let mut values = spec.encode(&spec.default_config());
    values[0] = AxisValue::Int(1_000_000);
    let decoded = spec.decode(&values).unwrap();
    assert_eq!(decoded.block_sizes[0], 8192);
}

#[test]
fn decode_rejects_wrong_width() {
    let spec = sample_spec();
    assert!(spec.decode(&[]).is_err());
}

#[test]
fn pid_axis_excludes_xyz_until_grid_allows_it() {
    let mut spec = sample_spec();
    let n = |s: &ConfigSpec| match s.flat_axes().last().unwrap().domain {
        crate::axis::AxisDomain::Choice { n } => n,
        ref d => panic!("unexpected pid domain {d:?}"),
    };
    assert_eq!(n(&spec), 2);
    spec.allow_use_yz_grid = Some(true);
    assert_eq!(n(&spec), PidType::ALL.len());
}
