//! The concrete configuration record.

use serde::{Deserialize, Serialize};

/// How tensor subscripts are lowered in the generated kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexingStrategy {
    /// Raw pointer arithmetic. Always available.
    #[default]
    Pointer,
    /// Block-pointer descriptors (`tl.make_block_ptr`).
    BlockPtr,
    /// Hardware tensor descriptors; requires backend capability.
    TensorDescriptor,
}

impl IndexingStrategy {
    pub const ALL: [Self; 3] = [Self::Pointer, Self::BlockPtr, Self::TensorDescriptor];
}

/// Launch-grid program-id layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PidType {
    /// One linear pid axis, decomposed in the kernel.
    #[default]
    Flat,
    /// Use x/y/z grid axes directly (up to 3 dimensions).
    Xyz,
    /// Persistent kernel: a fixed number of programs loop over virtual pids.
    Persistent,
}

impl PidType {
    /// `Xyz` is last so a 2-wide choice axis covers the always-legal pair.
    pub const ALL: [Self; 3] = [Self::Flat, Self::Persistent, Self::Xyz];
}

/// One concrete assignment of every tunable axis: a flat, hashable record.
/// Fields are parallel to the spec's registration-ordered axis tables;
/// [`crate::ConfigSpec::normalize`] fills defaults and validates before use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Config {
    /// One entry per autotunable (loop-sourced) block size.
    pub block_sizes: Vec<i64>,
    /// One entry per reduction dimension; `None` selects a persistent
    /// (single pass) reduction.
    pub reduction_loops: Vec<Option<i64>>,
    /// One permutation per registered multi-dimensional loop group.
    pub loop_orders: Vec<Vec<usize>>,
    /// One flag per flattenable tile group.
    pub flatten_loops: Vec<bool>,
    /// L2-cache grouping factor per registered 2-d grid (1 = off).
    pub l2_groupings: Vec<i64>,
    /// Per nested-loop dimension: unroll factor (0 = backend default).
    pub range_unroll_factors: Vec<i64>,
    /// Per nested-loop dimension: warp specialization.
    pub range_warp_specialize: Vec<Option<bool>>,
    /// Per nested-loop dimension: pipelining stage count (0 = default).
    pub range_num_stages: Vec<i64>,
    /// Per nested-loop dimension: multi-buffering.
    pub range_multi_buffers: Vec<Option<bool>>,
    /// Per nested-loop dimension: fully static unrolling.
    pub static_ranges: Vec<bool>,
    pub num_warps: u32,
    pub num_stages: u32,
    pub indexing: IndexingStrategy,
    pub pid_type: PidType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_sizes: Vec::new(),
            reduction_loops: Vec::new(),
            loop_orders: Vec::new(),
            flatten_loops: Vec::new(),
            l2_groupings: Vec::new(),
            range_unroll_factors: Vec::new(),
            range_warp_specialize: Vec::new(),
            range_num_stages: Vec::new(),
            range_multi_buffers: Vec::new(),
            static_ranges: Vec::new(),
            num_warps: 4,
            num_stages: 3,
            indexing: IndexingStrategy::default(),
            pid_type: PidType::default(),
        }
    }
}

impl Config {
    /// Convenience constructor for the common "just block sizes" case.
    pub fn with_block_sizes(block_sizes: impl Into<Vec<i64>>) -> Self {
        Self { block_sizes: block_sizes.into(), ..Default::default() }
    }

    /// Short human-readable summary used in logs.
    pub fn summary(&self) -> String {
        format!(
            "bs={:?} red={:?} order={:?} flat={:?} l2={:?} warps={} stages={} idx={:?} pid={:?}",
            self.block_sizes,
            self.reduction_loops,
            self.loop_orders,
            self.flatten_loops,
            self.l2_groupings,
            self.num_warps,
            self.num_stages,
            self.indexing,
            self.pid_type,
        )
    }
}
