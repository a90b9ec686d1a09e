//! Tiling strategies: how a configuration maps block dimensions onto the
//! launch grid.
//!
//! Everything here is pure arithmetic over the traced program and one
//! configuration. The code generator renders these decisions as kernel
//! source and the simulator executes them directly, so the two can never
//! disagree about which elements a program instance covers.

use tessel_config::{Config, ConfigSpec};
use tessel_ir::program::{BlockId, LoopKind, Program};
use tessel_ir::sym::{ceil_div, next_power_of_two, SymInt};

use crate::env::{BlockSizeSource, Environment};

/// The concrete block size of a dimension under one configuration.
pub fn resolve_block_size(
    env: &Environment,
    spec: &ConfigSpec,
    config: &Config,
    block_id: BlockId,
) -> i64 {
    let info = env.block_info(block_id);
    match info.source {
        BlockSizeSource::Fixed(v) => v,
        BlockSizeSource::Grid => 1,
        BlockSizeSource::Loop => {
            let idx = spec
                .block_id_to_index(block_id)
                .unwrap_or_else(|| unreachable!("loop dimension {} not in spec", block_id.0));
            config.block_sizes[idx]
        }
        BlockSizeSource::ReductionLoop => {
            let idx = spec
                .reduction_index(block_id)
                .unwrap_or_else(|| unreachable!("reduction dimension {} not in spec", block_id.0));
            match config.reduction_loops[idx] {
                Some(block) => block,
                // Persistent: one block covers the power-of-two padded extent.
                None => next_power_of_two(env.shape_env.size_hint(info.size).max(1)),
            }
        }
    }
}

/// One grid dimension of a root loop under a configuration.
#[derive(Debug, Clone)]
pub struct DimPlan {
    pub block_id: BlockId,
    pub begin: SymInt,
    pub end: SymInt,
    pub block_size: i64,
    /// Whether lanes can fall outside `[begin, end)` and need masking.
    pub masked: bool,
}

impl DimPlan {
    /// Number of programs along this dimension, given a resolver for
    /// symbolic sizes.
    pub fn grid_size(&self, extent: i64) -> i64 {
        ceil_div(extent.max(0), self.block_size)
    }
}

/// How one top-level loop is laid out on the launch grid.
#[derive(Debug, Clone)]
pub enum RootPlan {
    /// All dimensions collapsed into one linear pid axis; indices are
    /// recovered by division in row-major order over the traced dims.
    Flattened { dims: Vec<DimPlan> },
    /// One pid axis per dimension, iterated in `order` (a permutation of
    /// positions into `dims`, innermost first).
    Nd { dims: Vec<DimPlan>, order: Vec<usize>, l2_group: i64 },
}

impl RootPlan {
    pub fn dims(&self) -> &[DimPlan] {
        match self {
            Self::Flattened { dims } | Self::Nd { dims, .. } => dims,
        }
    }

    /// Total programs this root launches.
    pub fn total_programs(&self, extent_of: &dyn Fn(BlockId) -> i64) -> i64 {
        match self {
            Self::Flattened { dims } => {
                let total: i64 = dims.iter().map(|d| extent_of(d.block_id).max(0)).product();
                ceil_div(total, self.flat_block_size())
            }
            Self::Nd { dims, .. } => {
                dims.iter().map(|d| d.grid_size(extent_of(d.block_id))).product()
            }
        }
    }

    /// Product of the per-dimension block sizes; the tile volume of one
    /// program in the flattened layout.
    pub fn flat_block_size(&self) -> i64 {
        self.dims().iter().map(|d| d.block_size).product()
    }
}

/// Lay out root `root_idx` of `program` under `config`.
///
/// The order/flatten/L2 tables in the spec are indexed by registration
/// order, which only counts multi-dimensional roots (and 2-d roots for L2),
/// so the group indices are recomputed by walking earlier roots.
pub fn plan_root(
    program: &Program,
    root_idx: usize,
    env: &Environment,
    spec: &ConfigSpec,
    config: &Config,
) -> RootPlan {
    let root = &program.roots[root_idx];
    let ndim = root.inner.block_ids.len();
    let group_idx = program.roots[..root_idx]
        .iter()
        .filter(|r| r.inner.block_ids.len() >= 2)
        .count();
    let l2_idx = program.roots[..root_idx]
        .iter()
        .filter(|r| r.inner.block_ids.len() == 2)
        .count();

    let dims: Vec<DimPlan> = (0..ndim)
        .map(|i| {
            let block_id = root.inner.block_ids[i];
            let begin = root.inner.begins[i];
            let end = root.inner.ends[i];
            let block_size = resolve_block_size(env, spec, config, block_id);
            // A nonzero begin always masks; otherwise only a provable
            // multiple of the block size runs unmasked.
            let masked = !(begin == SymInt::Const(0)
                && env.shape_env.known_multiple(end, block_size));
            DimPlan { block_id, begin, end, block_size, masked }
        })
        .collect();

    let flatten = ndim >= 2
        && spec.flatten_loops.get(group_idx).is_some_and(|f| f.allowed)
        && config.flatten_loops.get(group_idx).copied().unwrap_or(false);
    if flatten && root.inner.kind != LoopKind::Grid {
        // The linear index covers the exact element count, so per-dimension
        // masks collapse into one bound check on the flat index.
        return RootPlan::Flattened { dims };
    }

    let order = if ndim >= 2 {
        config
            .loop_orders
            .get(group_idx)
            .cloned()
            .unwrap_or_else(|| (0..ndim).collect())
    } else {
        (0..ndim).collect()
    };
    let l2_group = if ndim == 2 {
        config.l2_groupings.get(l2_idx).copied().unwrap_or(1)
    } else {
        1
    };
    RootPlan::Nd { dims, order, l2_group }
}

/// Decompose a flat pid into per-dimension pids, `counts[0]` varying
/// fastest. Inverse of `compose_pid`.
pub fn decompose_pid(pid: i64, counts: &[i64]) -> Vec<i64> {
    let mut rest = pid;
    counts
        .iter()
        .map(|&c| {
            let v = rest % c.max(1);
            rest /= c.max(1);
            v
        })
        .collect()
}

pub fn compose_pid(pids: &[i64], counts: &[i64]) -> i64 {
    let mut acc = 0;
    let mut stride = 1;
    for (&p, &c) in pids.iter().zip(counts) {
        acc += p * stride;
        stride *= c.max(1);
    }
    acc
}

/// L2-friendly pid swizzle for a 2-d grid: programs are issued in groups of
/// `group_m` rows so consecutive pids share column tiles. A bijection on
/// `0..m_blocks * n_blocks`.
pub fn l2_swizzle(pid: i64, m_blocks: i64, n_blocks: i64, group_m: i64) -> (i64, i64) {
    if group_m <= 1 {
        return (pid % m_blocks.max(1), pid / m_blocks.max(1));
    }
    let num_pid_in_group = group_m * n_blocks;
    let group_id = pid / num_pid_in_group;
    let first_pid_m = group_id * group_m;
    let group_size_m = (m_blocks - first_pid_m).min(group_m).max(1);
    let pid_m = first_pid_m + pid % group_size_m;
    let pid_n = pid % num_pid_in_group / group_size_m;
    (pid_m, pid_n)
}
