//! Specs and configs serialize for cache persistence; the ids inside the
//! axis tables must survive the trip.

use crate::config::{Config, IndexingStrategy, PidType};
use crate::spec::{BlockSizeSpec, ConfigSpec, LoopOrderSpec, ReductionLoopSpec};
use tessel_ir::program::BlockId;

#[test]
fn spec_tables_round_trip() {
    let spec = ConfigSpec {
        block_sizes: vec![BlockSizeSpec::new(BlockId(0), 256)],
        reduction_loops: vec![ReductionLoopSpec { block_id: BlockId(1), size_hint: 512 }],
        loop_orders: vec![LoopOrderSpec { block_ids: vec![BlockId(0)] }],
        ..Default::default()
    };
    let text = serde_json::to_string(&spec).unwrap();
    let back: ConfigSpec = serde_json::from_str(&text).unwrap();
    assert_eq!(spec, back);
}

#[test]
fn configs_round_trip() {
    let config = Config {
        block_sizes: vec![64, 32],
        indexing: IndexingStrategy::BlockPtr,
        pid_type: PidType::Persistent,
        ..Default::default()
    };
    let text = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&text).unwrap();
    assert_eq!(config, back);
}
