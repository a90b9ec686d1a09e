//! Cross-loop dependency analysis.
//!
//! Every top-level device loop of one program shares a single kernel launch,
//! so their programs may interleave arbitrarily. A loop that reads or
//! rewrites a tensor an earlier loop writes would observe a race; the trace
//! rejects it.

use std::collections::HashSet;

use tessel_ir::program::{DeviceExpr, DeviceStmt, Program, ValueId};

use crate::error::{self, Result};

#[derive(Default)]
struct AccessSets {
    reads: HashSet<ValueId>,
    writes: HashSet<ValueId>,
}

fn collect(body: &[DeviceStmt], sets: &mut AccessSets) {
    for stmt in body {
        match stmt {
            DeviceStmt::Define { expr, .. } | DeviceStmt::Assign { expr, .. } => {
                if let DeviceExpr::Load { tensor, .. } = expr {
                    sets.reads.insert(*tensor);
                }
            }
            DeviceStmt::Store { tensor, .. } | DeviceStmt::AtomicAdd { tensor, .. } => {
                sets.writes.insert(*tensor);
            }
            DeviceStmt::Loop(l) => collect(&l.body, sets),
        }
    }
}

/// Reject programs where a later top-level loop depends on an earlier one.
pub fn check(program: &Program) -> Result<()> {
    let mut written_before: HashSet<ValueId> = HashSet::new();
    for root in &program.roots {
        let mut sets = AccessSets::default();
        collect(&root.inner.body, &mut sets);
        if let Some(&tensor) = sets
            .reads
            .iter()
            .chain(&sets.writes)
            .find(|t| written_before.contains(t))
        {
            return error::LoopDependencySnafu {
                tensor: program.value(tensor).name.clone(),
                loc: root.inner.loc,
            }
            .fail();
        }
        written_before.extend(sets.writes);
    }
    Ok(())
}
