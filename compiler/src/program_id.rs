//! Shared-launch program-id dispatch.
//!
//! All top-level loops of one program share a single launch whose grid is
//! the sum of the per-root grids. Each program instance finds its root by
//! comparing its pid against the running totals, then rebases the pid into
//! that root's local grid.

use tessel_config::{Config, ConfigSpec};
use tessel_ir::program::{BlockId, Program};

use crate::env::Environment;
use crate::tile_strategy::{plan_root, RootPlan};

#[derive(Debug, Clone)]
pub struct ProgramIds {
    pub plans: Vec<RootPlan>,
}

impl ProgramIds {
    pub fn plan(program: &Program, env: &Environment, spec: &ConfigSpec, config: &Config) -> Self {
        let plans = (0..program.roots.len())
            .map(|i| plan_root(program, i, env, spec, config))
            .collect();
        Self { plans }
    }

    /// Whether dispatch prologue is needed at all.
    pub fn shared(&self) -> bool {
        self.plans.len() > 1
    }

    pub fn totals(&self, extent_of: &dyn Fn(BlockId) -> i64) -> Vec<i64> {
        self.plans.iter().map(|p| p.total_programs(extent_of)).collect()
    }

    pub fn total(&self, extent_of: &dyn Fn(BlockId) -> i64) -> i64 {
        self.totals(extent_of).iter().sum()
    }

    /// Map a global pid to `(root index, local pid)`; `None` for pids past
    /// the end of the grid.
    pub fn locate(&self, pid: i64, extent_of: &dyn Fn(BlockId) -> i64) -> Option<(usize, i64)> {
        let mut base = 0;
        for (root_idx, total) in self.totals(extent_of).into_iter().enumerate() {
            if pid < base + total {
                return Some((root_idx, pid - base));
            }
            base += total;
        }
        None
    }
}
