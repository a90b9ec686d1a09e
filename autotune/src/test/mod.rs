mod unit;

use std::time::Duration;

use tessel_config::{
    BlockSizeSpec, Config, ConfigSpec, FlattenLoopSpec, LoopOrderSpec, ReductionLoopSpec,
};
use tessel_ir::program::BlockId;

use crate::BenchResult;

pub(crate) fn sample_spec() -> ConfigSpec {
    ConfigSpec {
        block_sizes: vec![BlockSizeSpec::new(BlockId(0), 2048), BlockSizeSpec::new(BlockId(1), 48)],
        reduction_loops: vec![ReductionLoopSpec { block_id: BlockId(2), size_hint: 4096 }],
        loop_orders: vec![LoopOrderSpec { block_ids: vec![BlockId(0), BlockId(1)] }],
        flatten_loops: vec![FlattenLoopSpec {
            block_ids: vec![BlockId(0), BlockId(1)],
            allowed: true,
        }],
        ..Default::default()
    }
}

/// Synthetic objective: larger first block size is faster, everything else
/// is neutral. Gives the searches a smooth, deterministic landscape.
pub(crate) fn prefer_large_blocks(config: &Config) -> BenchResult {
    let bs = config.block_sizes.first().copied().unwrap_or(1);
    BenchResult::Time(Duration::from_micros(10_000 / bs as u64 + 5))
}
