//! Kernel source generation.
//!
//! One traced program plus one configuration deterministically produce one
//! kernel module: a `@triton.jit` device function, a host launcher, and a
//! precompiler entry point that binds arguments without launching.

use std::collections::HashMap;

use itertools::Itertools;
use snafu::ResultExt;

use tessel_config::{Config, ConfigSpec, IndexingStrategy, PidType};
use tessel_ir::program::{
    BlockId, DeviceExpr, DeviceLoop, DeviceStmt, HostStmt, Index, ParamKind, Program, ReduceOp,
    ValueId, ValueKind,
};
use tessel_ir::sym::SymInt;
use tessel_ir::DType;

use crate::device_function::{
    broadcast_suffix, collect_params, kernel_expr, range_kwargs, ParamTable, SourceWriter,
};
use crate::env::{BlockSizeSource, Environment};
use crate::error::{self, Result};
use crate::tile_strategy::{plan_root, RootPlan};
use crate::trace::Traced;

/// One generated kernel variant.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub name: String,
    pub text: String,
    pub config: Config,
}

pub fn generate(traced: &Traced, config: &Config) -> Result<KernelSource> {
    let mut config = config.clone();
    traced.spec.normalize(&mut config, false).context(error::ConfigSnafu)?;
    let mut cg = CodeGen {
        program: &traced.program,
        env: &traced.env,
        spec: &traced.spec,
        config: &config,
        dims: HashMap::new(),
        w: SourceWriter::new(),
        flat_mode: false,
    };
    cg.run()?;
    tracing::debug!(
        target: "tessel::codegen",
        kernel = %traced.program.name,
        config = %config.summary(),
        "generated kernel source"
    );
    Ok(KernelSource { name: traced.program.name.clone(), text: cg.w.finish(), config })
}

/// Per block dimension emission state inside one root.
#[derive(Debug, Clone)]
struct DimState {
    index: String,
    offset: Option<String>,
    mask: Option<String>,
    end: String,
}

struct CodeGen<'a> {
    program: &'a Program,
    env: &'a Environment,
    spec: &'a ConfigSpec,
    config: &'a Config,
    dims: HashMap<BlockId, DimState>,
    w: SourceWriter,
    /// The current root uses the flattened layout: every tile is a 1-d
    /// vector over the linearized index, so broadcast suffixes are dropped.
    flat_mode: bool,
}

impl CodeGen<'_> {
    fn run(&mut self) -> Result<()> {
        snafu::ensure!(!self.program.roots.is_empty(), error::NoDeviceLoopSnafu);
        let params = collect_params(
            self.program,
            &self.env.shape_env,
            &self.tunable_blocks(),
        );

        self.w.line("from __future__ import annotations");
        self.w.blank();
        self.w.line("import torch");
        self.w.line("import triton");
        self.w.line("import triton.language as tl");
        self.w.line("from torch._inductor.runtime import triton_helpers");
        self.w.line("from torch._inductor.runtime.triton_helpers import math as tl_math");
        self.w.blank();
        self.w.line("@triton.jit");
        self.w.line(format!("def _{}_kernel({}):", self.program.name, params.signature()));
        self.w.indent();
        self.emit_kernel_body()?;
        self.w.dedent();
        self.w.blank();
        self.emit_launcher(&params, false)?;
        self.w.blank();
        self.emit_launcher(&params, true)?;
        Ok(())
    }

    /// Block ids whose sizes are tunable constexpr parameters, in first-use
    /// order.
    fn tunable_blocks(&self) -> Vec<BlockId> {
        self.used_blocks()
            .into_iter()
            .filter(|&id| self.env.block_info(id).is_tunable())
            .collect()
    }

    /// Every block dimension the program touches, loops and tiles alike.
    fn used_blocks(&self) -> Vec<BlockId> {
        fn add(out: &mut Vec<BlockId>, id: BlockId) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        fn walk_index(out: &mut Vec<BlockId>, index: &[Index]) {
            for i in index {
                if let Index::Tile(b) = i {
                    add(out, *b);
                }
            }
        }
        fn walk(out: &mut Vec<BlockId>, body: &[DeviceStmt]) {
            for stmt in body {
                match stmt {
                    DeviceStmt::Define { expr, .. } | DeviceStmt::Assign { expr, .. } => match expr
                    {
                        DeviceExpr::Load { index, .. } => walk_index(out, index),
                        DeviceExpr::Full { dims, .. } => dims.iter().for_each(|&d| add(out, d)),
                        DeviceExpr::TileBegin(b)
                        | DeviceExpr::TileEnd(b)
                        | DeviceExpr::TileBlockSize(b)
                        | DeviceExpr::TileIndex(b) => add(out, *b),
                        _ => {}
                    },
                    DeviceStmt::Store { index, .. } | DeviceStmt::AtomicAdd { index, .. } => {
                        walk_index(out, index)
                    }
                    DeviceStmt::Loop(l) => {
                        l.block_ids.iter().for_each(|&b| add(out, b));
                        walk(out, &l.body);
                    }
                }
            }
        }
        let mut out = Vec::new();
        for root in &self.program.roots {
            root.inner.block_ids.iter().for_each(|&b| add(&mut out, b));
            walk(&mut out, &root.inner.body);
        }
        out
    }

    fn bs_name(&self, block_id: BlockId) -> String {
        match self.env.block_info(block_id).source {
            BlockSizeSource::Fixed(v) => v.to_string(),
            BlockSizeSource::Grid => "1".to_owned(),
            BlockSizeSource::Loop | BlockSizeSource::ReductionLoop => {
                format!("_BLOCK_SIZE_{}", block_id.0)
            }
        }
    }

    /// In-kernel spelling of a symbolic size.
    fn kexpr(&self, s: SymInt) -> String {
        kernel_expr(&self.env.shape_env, s)
            .unwrap_or_else(|| self.env.shape_env.render(s))
    }

    fn name(&self, id: ValueId) -> &str {
        &self.program.value(id).name
    }

    fn value_dims(&self, id: ValueId) -> &[BlockId] {
        self.program.value(id).device_dims().unwrap_or(&[])
    }

    fn suffix_for(&self, pos: Option<usize>, ndim: usize) -> String {
        if self.flat_mode {
            String::new()
        } else {
            pos.map(|p| broadcast_suffix(p, ndim)).unwrap_or_default()
        }
    }

    // Kernel body ---------------------------------------------------------

    fn emit_kernel_body(&mut self) -> Result<()> {
        let totals: Vec<String> =
            (0..self.program.roots.len()).map(|i| self.kernel_total_expr(i)).collect();
        if self.config.pid_type == PidType::Persistent {
            self.w.line(format!("total_pids = {}", totals.iter().join(" + ")));
            self.w.line(
                "for virtual_pid in tl.range(tl.program_id(0), total_pids, tl.num_programs(0)):",
            );
            self.w.indent();
            self.emit_dispatch(0, "virtual_pid", &totals)?;
            self.w.dedent();
        } else if self.program.roots.len() > 1 {
            self.w.line("pid_shared = tl.program_id(0)");
            self.emit_dispatch(0, "pid_shared", &totals)?;
        } else {
            self.emit_root(0, "tl.program_id(0)")?;
        }
        Ok(())
    }

    /// If/elif chain mapping a shared pid onto the per-root grids.
    fn emit_dispatch(&mut self, root: usize, pid: &str, totals: &[String]) -> Result<()> {
        if root + 1 == totals.len() {
            return self.emit_root(root, pid);
        }
        self.w.line(format!("num_blocks_{root} = {}", totals[root]));
        self.w.line(format!("if {pid} < num_blocks_{root}:"));
        self.w.indent();
        self.emit_root(root, pid)?;
        self.w.dedent();
        self.w.line("else:");
        self.w.indent();
        let rebased = format!("pid_off_{}", root + 1);
        self.w.line(format!("{rebased} = {pid} - num_blocks_{root}"));
        self.emit_dispatch(root + 1, &rebased, totals)?;
        self.w.dedent();
        Ok(())
    }

    fn plan(&self, root: usize) -> RootPlan {
        plan_root(self.program, root, self.env, self.spec, self.config)
    }

    /// Number of programs root `root` occupies, as a kernel-side expression.
    fn kernel_total_expr(&self, root: usize) -> String {
        match self.plan(root) {
            RootPlan::Flattened { dims } => {
                let total = dims
                    .iter()
                    .map(|d| format!("({})", self.extent_expr(d.begin, d.end)))
                    .join(" * ");
                let flat = dims.iter().map(|d| self.bs_name(d.block_id)).join(" * ");
                format!("tl.cdiv({total}, {flat})")
            }
            RootPlan::Nd { dims, .. } => dims
                .iter()
                .map(|d| {
                    format!(
                        "tl.cdiv({}, {})",
                        self.extent_expr(d.begin, d.end),
                        self.bs_name(d.block_id)
                    )
                })
                .join(" * "),
        }
    }

    fn extent_expr(&self, begin: SymInt, end: SymInt) -> String {
        if begin == SymInt::Const(0) {
            self.kexpr(end)
        } else {
            format!("({} - {})", self.kexpr(end), self.kexpr(begin))
        }
    }

    fn emit_root(&mut self, root_idx: usize, pid: &str) -> Result<()> {
        self.dims.clear();
        let plan = self.plan(root_idx);
        match &plan {
            RootPlan::Flattened { dims } => {
                self.flat_mode = true;
                self.emit_flattened_prologue(root_idx, pid, dims);
            }
            RootPlan::Nd { dims, order, l2_group } => {
                self.flat_mode = false;
                self.emit_nd_prologue(root_idx, pid, dims, order, *l2_group);
            }
        }
        let body = self.program.roots[root_idx].inner.body.clone();
        let rdims = self.reduction_dims(&body);
        for &(rd, looped) in &rdims {
            if looped.is_none() {
                self.emit_persistent_reduction(rd);
            }
        }
        let looped: Vec<(BlockId, i64)> =
            rdims.iter().filter_map(|&(rd, l)| l.map(|bs| (rd, bs))).collect();
        self.emit_stmts_with_reductions(&body, &looped)
    }

    fn emit_flattened_prologue(
        &mut self,
        root_idx: usize,
        pid: &str,
        dims: &[crate::tile_strategy::DimPlan],
    ) {
        let flat_bs = dims.iter().map(|d| self.bs_name(d.block_id)).join(" * ");
        let total =
            dims.iter().map(|d| format!("({})", self.extent_expr(d.begin, d.end))).join(" * ");
        let flat = format!("indices_flat_{root_idx}");
        self.w.line(format!(
            "{flat} = ({pid} * ({flat_bs}) + tl.arange(0, {flat_bs})).to(tl.int32)"
        ));
        // The exact element count is only a multiple of the flat block in
        // lucky constant cases; mask by default.
        let exact = dims.iter().all(|d| !d.masked)
            && dims
                .iter()
                .map(|d| d.end.as_const())
                .collect::<Option<Vec<_>>>()
                .is_some_and(|ends| {
                    let total: i64 = ends.iter().product();
                    let flat: i64 = dims.iter().map(|d| d.block_size).product();
                    flat != 0 && total % flat == 0
                });
        let mask = if exact {
            None
        } else {
            let mask = format!("mask_flat_{root_idx}");
            self.w.line(format!("{mask} = {flat} < {total}"));
            Some(mask)
        };
        for (i, d) in dims.iter().enumerate() {
            let id = d.block_id.0;
            let divisor = dims[i + 1..]
                .iter()
                .map(|d| format!("({})", self.extent_expr(d.begin, d.end)))
                .join(" * ");
            let extent = self.extent_expr(d.begin, d.end);
            let index = format!("indices_{id}");
            if divisor.is_empty() {
                self.w.line(format!("{index} = {flat} % ({extent})"));
            } else {
                self.w.line(format!("{index} = {flat} // ({divisor}) % ({extent})"));
            }
            self.dims.insert(
                d.block_id,
                DimState { index, offset: None, mask: mask.clone(), end: self.kexpr(d.end) },
            );
        }
    }

    fn emit_nd_prologue(
        &mut self,
        root_idx: usize,
        pid: &str,
        dims: &[crate::tile_strategy::DimPlan],
        order: &[usize],
        l2_group: i64,
    ) {
        let ndim = dims.len();
        let count_name = |i: usize| format!("num_blocks_{root_idx}_{i}");
        let pid_name = |i: usize| format!("pid_{}", dims[i].block_id.0);

        if ndim == 1 {
            self.w.line(format!("{} = {pid}", pid_name(0)));
        } else if self.config.pid_type == PidType::Xyz && self.program.roots.len() == 1 {
            for (axis, &i) in order.iter().enumerate() {
                self.w.line(format!("{} = tl.program_id({axis})", pid_name(i)));
            }
        } else {
            for &i in order {
                self.w.line(format!(
                    "{} = tl.cdiv({}, {})",
                    count_name(i),
                    self.extent_expr(dims[i].begin, dims[i].end),
                    self.bs_name(dims[i].block_id)
                ));
            }
            if ndim == 2 && l2_group > 1 {
                // Grouped issue order: consecutive pids share column tiles.
                let (m, n) = (order[0], order[1]);
                self.w.line(format!("num_pid_in_group = {l2_group} * {}", count_name(n)));
                self.w.line(format!("group_id = {pid} // num_pid_in_group"));
                self.w.line(format!("first_pid_m = group_id * {l2_group}"));
                self.w.line(format!(
                    "group_size_m = tl.minimum({} - first_pid_m, {l2_group})",
                    count_name(m)
                ));
                self.w.line(format!("{} = first_pid_m + {pid} % group_size_m", pid_name(m)));
                self.w
                    .line(format!("{} = {pid} % num_pid_in_group // group_size_m", pid_name(n)));
            } else {
                let mut rest = pid.to_owned();
                for (k, &i) in order.iter().enumerate() {
                    if k + 1 == ndim {
                        self.w.line(format!("{} = {rest}", pid_name(i)));
                    } else {
                        self.w.line(format!("{} = {rest} % {}", pid_name(i), count_name(i)));
                        let next = format!("pid_rest_{root_idx}_{k}");
                        self.w.line(format!("{next} = {rest} // {}", count_name(i)));
                        rest = next;
                    }
                }
            }
        }

        for (i, d) in dims.iter().enumerate() {
            let id = d.block_id.0;
            let bs = self.bs_name(d.block_id);
            let offset = format!("offset_{id}");
            let index = format!("indices_{id}");
            let end = self.kexpr(d.end);
            if d.begin == SymInt::Const(0) {
                self.w.line(format!("{offset} = {} * {bs}", pid_name(i)));
            } else {
                self.w.line(format!(
                    "{offset} = {} + {} * {bs}",
                    self.kexpr(d.begin),
                    pid_name(i)
                ));
            }
            self.w
                .line(format!("{index} = ({offset} + tl.arange(0, {bs})).to(tl.int32)"));
            let mask = if d.masked {
                let mask = format!("mask_{id}");
                self.w.line(format!("{mask} = {index} < {end}"));
                Some(mask)
            } else {
                None
            };
            self.dims.insert(d.block_id, DimState { index, offset: Some(offset), mask, end });
        }
    }

    /// Reduction dimensions this body touches, with their looped block size
    /// when the config runs them as a loop.
    fn reduction_dims(&self, body: &[DeviceStmt]) -> Vec<(BlockId, Option<i64>)> {
        let mut out = Vec::new();
        let mut blocks = Vec::new();
        fn walk(cg: &CodeGen<'_>, body: &[DeviceStmt], out: &mut Vec<BlockId>) {
            for stmt in body {
                match stmt {
                    DeviceStmt::Define { dst, .. } | DeviceStmt::Assign { dst, .. } => {
                        out.extend(cg.value_dims(*dst).iter().copied());
                    }
                    DeviceStmt::Store { index, .. } | DeviceStmt::AtomicAdd { index, .. } => {
                        for i in index {
                            if let Index::Tile(b) = i {
                                out.push(*b);
                            }
                        }
                    }
                    DeviceStmt::Loop(l) => walk(cg, &l.body, out),
                }
            }
        }
        walk(self, body, &mut blocks);
        for b in blocks {
            if out.iter().any(|&(seen, _)| seen == b) {
                continue;
            }
            if self.env.block_info(b).source == BlockSizeSource::ReductionLoop {
                let idx = self.spec.reduction_index(b).unwrap_or(0);
                out.push((b, self.config.reduction_loops.get(idx).copied().flatten()));
            }
        }
        out
    }

    fn emit_persistent_reduction(&mut self, rd: BlockId) {
        let id = rd.0;
        let info = self.env.block_info(rd);
        let bs = self.bs_name(rd);
        let end = self.kexpr(info.size);
        let index = format!("indices_{id}");
        self.w.line(format!("{index} = tl.arange(0, {bs}).to(tl.int32)"));
        // The block is padded to a power of two; mask unless the extent is
        // statically that exact size.
        let exact = info.size.as_const().is_some_and(|n| n > 0 && n & (n - 1) == 0);
        let mask = if exact {
            None
        } else {
            let mask = format!("mask_{id}");
            self.w.line(format!("{mask} = {index} < {end}"));
            Some(mask)
        };
        self.dims.insert(rd, DimState { index, offset: None, mask, end });
    }

    /// Emit statements, wrapping the span that touches each looped reduction
    /// dimension in an accumulating `tl.range` loop.
    fn emit_stmts_with_reductions(
        &mut self,
        stmts: &[DeviceStmt],
        looped: &[(BlockId, i64)],
    ) -> Result<()> {
        let Some(&(rd, _block)) = looped.first() else {
            for stmt in stmts {
                self.emit_stmt(stmt)?;
            }
            return Ok(());
        };
        let rest = &looped[1..];
        let mentions: Vec<bool> = stmts.iter().map(|s| self.mentions(s, rd)).collect();
        let Some(first) = mentions.iter().position(|&m| m) else {
            return self.emit_stmts_with_reductions(stmts, rest);
        };
        let last = mentions.iter().rposition(|&m| m).unwrap_or(first);

        self.emit_stmts_with_reductions(&stmts[..first], rest)?;

        // Accumulators for reductions over rd must exist before the loop.
        let mid = &stmts[first..=last];
        for stmt in mid {
            if let DeviceStmt::Define { dst, expr: DeviceExpr::Reduce { op, src, axis }, .. } = stmt
            {
                if self.value_dims(*src).get(*axis) == Some(&rd) {
                    self.w.line(format!("{} = {}", self.name(*dst), self.reduce_init(*dst, *op)));
                }
            }
        }

        let id = rd.0;
        let info = self.env.block_info(rd);
        let bs = self.bs_name(rd);
        let end = self.kexpr(info.size);
        self.w.line(format!("for roffset_{id} in tl.range(0, {end}, {bs}):"));
        self.w.indent();
        let index = format!("indices_{id}");
        self.w.line(format!("{index} = (roffset_{id} + tl.arange(0, {bs})).to(tl.int32)"));
        let mask = format!("mask_{id}");
        self.w.line(format!("{mask} = {index} < {end}"));
        self.dims.insert(
            rd,
            DimState {
                index,
                offset: Some(format!("roffset_{id}")),
                mask: Some(mask),
                end: end.clone(),
            },
        );
        for stmt in mid {
            match stmt {
                DeviceStmt::Define { dst, expr: DeviceExpr::Reduce { op, src, axis }, .. }
                    if self.value_dims(*src).get(*axis) == Some(&rd) =>
                {
                    let partial = self.reduce_expr(*op, *src, *axis)?;
                    let acc = self.name(*dst).to_owned();
                    let merged = match op {
                        ReduceOp::Sum => format!("{acc} + {partial}"),
                        ReduceOp::Max => format!("triton_helpers.maximum({acc}, {partial})"),
                    };
                    self.w.line(format!("{acc} = {merged}"));
                }
                _ => self.emit_stmt(stmt)?,
            }
        }
        self.w.dedent();
        self.dims.remove(&rd);

        self.emit_stmts_with_reductions(&stmts[last + 1..], rest)
    }

    fn reduce_init(&self, dst: ValueId, op: ReduceOp) -> String {
        let dims = self.value_dims(dst);
        let identity = match op {
            ReduceOp::Sum => "0.0".to_owned(),
            ReduceOp::Max => "float('-inf')".to_owned(),
        };
        if dims.is_empty() {
            identity
        } else {
            let shape = dims.iter().map(|&d| self.bs_name(d)).join(", ");
            format!("tl.full([{shape}], {identity}, tl.float32)")
        }
    }

    fn mentions(&self, stmt: &DeviceStmt, rd: BlockId) -> bool {
        let value_has = |id: ValueId| self.value_dims(id).contains(&rd);
        let index_has = |index: &[Index]| {
            index.iter().any(|i| match i {
                Index::Tile(b) => *b == rd,
                Index::Scalar(v) | Index::Gather(v) => value_has(*v),
            })
        };
        match stmt {
            DeviceStmt::Define { dst, expr, .. } | DeviceStmt::Assign { dst, expr, .. } => {
                value_has(*dst)
                    || match expr {
                        DeviceExpr::Load { index, .. } => index_has(index),
                        DeviceExpr::Binary { lhs, rhs, .. } => value_has(*lhs) || value_has(*rhs),
                        DeviceExpr::Unary { src, .. } => value_has(*src),
                        DeviceExpr::DotAcc { lhs, rhs, acc } => {
                            value_has(*lhs) || value_has(*rhs) || value_has(*acc)
                        }
                        DeviceExpr::Reduce { src, .. } => value_has(*src),
                        DeviceExpr::Full { dims, .. } => dims.contains(&rd),
                        DeviceExpr::TileBegin(b)
                        | DeviceExpr::TileEnd(b)
                        | DeviceExpr::TileBlockSize(b)
                        | DeviceExpr::TileIndex(b) => *b == rd,
                    }
            }
            DeviceStmt::Store { index, value, .. } => index_has(index) || value_has(*value),
            DeviceStmt::AtomicAdd { index, value, .. } => index_has(index) || value_has(*value),
            DeviceStmt::Loop(l) => l.body.iter().any(|s| self.mentions(s, rd)),
        }
    }

    // Statements ----------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &DeviceStmt) -> Result<()> {
        match stmt {
            DeviceStmt::Define { dst, expr, .. } | DeviceStmt::Assign { dst, expr, .. } => {
                let text = self.expr_text(*dst, expr)?;
                self.w.line(format!("{} = {}", self.name(*dst), text));
                Ok(())
            }
            DeviceStmt::Store { tensor, index, value, .. } => {
                if let Some(line) = self.block_ptr_store(*tensor, index, *value) {
                    self.w.line(line);
                    return Ok(());
                }
                let (ptr, mask) = self.address(*tensor, index, self.value_dims(*value).to_vec());
                self.w.line(format!("tl.store({ptr}, {}, {mask})", self.name(*value)));
                Ok(())
            }
            DeviceStmt::AtomicAdd { tensor, index, value, .. } => {
                let (ptr, mask) = self.address(*tensor, index, self.value_dims(*value).to_vec());
                self.w
                    .line(format!("tl.atomic_add({ptr}, {}, {mask})", self.name(*value)));
                Ok(())
            }
            DeviceStmt::Loop(l) => self.emit_loop(l),
        }
    }

    fn emit_loop(&mut self, l: &DeviceLoop) -> Result<()> {
        let ndim = l.block_ids.len();
        for i in 0..ndim {
            let block_id = l.block_ids[i];
            let id = block_id.0;
            let bs = self.bs_name(block_id);
            let begin = self.kexpr(l.begins[i]);
            let end = self.kexpr(l.ends[i]);
            let range_idx = self.spec.range_index(block_id);
            let static_range = range_idx
                .and_then(|r| self.config.static_ranges.get(r))
                .copied()
                .unwrap_or(false);
            let kwargs =
                range_idx.map(|r| range_kwargs(self.config, r)).unwrap_or_default();
            let range_fn = if static_range { "tl.static_range" } else { "tl.range" };
            self.w.line(format!(
                "for offset_{id} in {range_fn}({begin}, {end}, {bs}{kwargs}):"
            ));
            self.w.indent();
            let index = format!("indices_{id}");
            self.w.line(format!("{index} = (offset_{id} + tl.arange(0, {bs})).to(tl.int32)"));
            let resolved = crate::tile_strategy::resolve_block_size(
                self.env, self.spec, self.config, block_id,
            );
            let masked = !(l.begins[i] == SymInt::Const(0)
                && self.env.shape_env.known_multiple(l.ends[i], resolved));
            let mask = if masked {
                let mask = format!("mask_{id}");
                self.w.line(format!("{mask} = {index} < {end}"));
                Some(mask)
            } else {
                None
            };
            self.dims.insert(
                block_id,
                DimState { index, offset: Some(format!("offset_{id}")), mask, end },
            );
        }
        for stmt in &l.body {
            self.emit_stmt(stmt)?;
        }
        for i in (0..ndim).rev() {
            self.w.dedent();
            self.dims.remove(&l.block_ids[i]);
        }
        Ok(())
    }

    // Expressions ---------------------------------------------------------

    fn expr_text(&mut self, dst: ValueId, expr: &DeviceExpr) -> Result<String> {
        Ok(match expr {
            DeviceExpr::Load { tensor, index } => {
                if let Some(text) = self.block_ptr_load(*tensor, index, dst) {
                    text
                } else {
                    let (ptr, mask) = self.address(*tensor, index, self.value_dims(dst).to_vec());
                    if mask == "None" {
                        format!("tl.load({ptr}, None)")
                    } else {
                        format!("tl.load({ptr}, {mask}, other=0)")
                    }
                }
            }
            DeviceExpr::Binary { op, lhs, rhs } => op.render(self.name(*lhs), self.name(*rhs)),
            DeviceExpr::Unary { op, src } => op.render(self.name(*src)),
            DeviceExpr::DotAcc { lhs, rhs, acc } => format!(
                "tl.dot({}, {}, acc={}, input_precision='tf32')",
                self.name(*lhs),
                self.name(*rhs),
                self.name(*acc)
            ),
            DeviceExpr::Reduce { op, src, axis } => self.reduce_expr(*op, *src, *axis)?,
            DeviceExpr::Full { dims, value, dtype } => {
                if dims.is_empty() {
                    format!("{value:?}")
                } else {
                    let shape = dims.iter().map(|&d| self.bs_name(d)).join(", ");
                    format!("tl.full([{shape}], {value:?}, {})", dtype.kernel_name())
                }
            }
            DeviceExpr::TileBegin(b) => self.dim(*b).offset.clone().unwrap_or_else(|| "0".into()),
            DeviceExpr::TileEnd(b) => {
                let d = self.dim(*b).clone();
                let offset = d.offset.unwrap_or_else(|| "0".into());
                format!("tl.minimum({offset} + {}, {})", self.bs_name(*b), d.end)
            }
            DeviceExpr::TileBlockSize(b) => {
                let d = self.dim(*b).clone();
                let offset = d.offset.unwrap_or_else(|| "0".into());
                format!("tl.minimum({}, {} - {offset})", self.bs_name(*b), d.end)
            }
            DeviceExpr::TileIndex(b) => self.dim(*b).index.clone(),
        })
    }

    fn reduce_expr(&mut self, op: ReduceOp, src: ValueId, axis: usize) -> Result<String> {
        let src_dims = self.value_dims(src).to_vec();
        let src_name = self.name(src).to_owned();
        let reduced = src_dims[axis];
        let masked = self.dims.get(&reduced).and_then(|d| d.mask.clone());
        let input = match (op, masked) {
            // Masked-out lanes load zero, which is already the sum identity.
            (ReduceOp::Sum, _) | (ReduceOp::Max, None) => src_name,
            (ReduceOp::Max, Some(mask)) => {
                let suffix = self.suffix_for(Some(axis), src_dims.len());
                format!("tl.where({mask}{suffix}, {src_name}, float('-inf'))")
            }
        };
        Ok(format!("{}({input}, {axis})", op.kernel_fn()))
    }

    fn dim(&self, b: BlockId) -> &DimState {
        self.dims.get(&b).unwrap_or_else(|| {
            unreachable!("block dimension {} has no emission state", b.0)
        })
    }

    /// Pointer expression and combined mask for one tensor access. `dims`
    /// is the block-dimension shape of the accessed tile.
    fn address(&mut self, tensor: ValueId, index: &[Index], dims: Vec<BlockId>) -> (String, String) {
        let tname = self.name(tensor).to_owned();
        let ndim = dims.len();
        let pos_of = |b: BlockId| dims.iter().position(|&d| d == b);
        let mut terms = Vec::new();
        let mut masks: Vec<String> = Vec::new();
        for (axis, i) in index.iter().enumerate() {
            let stride = format!("{tname}_stride_{axis}");
            match i {
                Index::Tile(b) => {
                    let d = self.dim(*b).clone();
                    let suffix = self.suffix_for(pos_of(*b), ndim);
                    terms.push(format!("{}{suffix} * {stride}", d.index));
                    if let Some(mask) = d.mask {
                        let term = format!("{mask}{suffix}");
                        if !masks.contains(&term) {
                            masks.push(term);
                        }
                    }
                }
                Index::Scalar(v) => {
                    terms.push(format!("{} * {stride}", self.name(*v)));
                }
                Index::Gather(v) => {
                    let vdims = self.value_dims(*v).to_vec();
                    let suffix = match vdims.as_slice() {
                        [single] => self.suffix_for(pos_of(*single), ndim),
                        _ => String::new(),
                    };
                    terms.push(format!("{}{suffix} * {stride}", self.name(*v)));
                    for b in vdims {
                        if let Some(mask) = self.dims.get(&b).and_then(|d| d.mask.clone()) {
                            let suffix = self.suffix_for(pos_of(b), ndim);
                            let term = format!("{mask}{suffix}");
                            if !masks.contains(&term) {
                                masks.push(term);
                            }
                        }
                    }
                }
            }
        }
        let ptr = if terms.is_empty() {
            tname
        } else {
            format!("{tname} + {}", terms.join(" + "))
        };
        let mask = if masks.is_empty() { "None".to_owned() } else { masks.join(" & ") };
        (ptr, mask)
    }

    /// Block-pointer form of a load, when the access is a pure tile
    /// subscript and the strategy asks for it.
    fn block_ptr_load(&mut self, tensor: ValueId, index: &[Index], dst: ValueId) -> Option<String> {
        let block_ptr = self.block_ptr(tensor, index, self.value_dims(dst).to_vec())?;
        Some(format!("tl.load({block_ptr}, boundary_check={}, padding_option='zero')", self.boundary(index)))
    }

    fn block_ptr_store(&mut self, tensor: ValueId, index: &[Index], value: ValueId) -> Option<String> {
        let block_ptr = self.block_ptr(tensor, index, self.value_dims(value).to_vec())?;
        Some(format!(
            "tl.store({block_ptr}, {}, boundary_check={})",
            self.name(value),
            self.boundary(index)
        ))
    }

    fn boundary(&self, index: &[Index]) -> String {
        let checked: Vec<String> = index
            .iter()
            .enumerate()
            .filter_map(|(axis, i)| match i {
                Index::Tile(b) if self.dims.get(b).is_some_and(|d| d.mask.is_some()) => {
                    Some(axis.to_string())
                }
                _ => None,
            })
            .collect();
        format!("[{}]", checked.join(", "))
    }

    fn block_ptr(&mut self, tensor: ValueId, index: &[Index], dims: Vec<BlockId>) -> Option<String> {
        if self.config.indexing == IndexingStrategy::Pointer {
            return None;
        }
        // Only pure tile subscripts in traced order have a descriptor form.
        let tile_ids: Vec<BlockId> = index
            .iter()
            .map(|i| match i {
                Index::Tile(b) => Some(*b),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        if tile_ids != dims {
            return None;
        }
        let tname = self.name(tensor).to_owned();
        let fake = match &self.program.value(tensor).kind {
            ValueKind::HostTensor { fake } => fake.clone(),
            _ => return None,
        };
        let shape = fake.shape.iter().map(|&s| self.kexpr(s)).join(", ");
        let strides =
            (0..fake.shape.len()).map(|d| format!("{tname}_stride_{d}")).join(", ");
        let offsets = tile_ids
            .iter()
            .map(|b| self.dims.get(b).and_then(|d| d.offset.clone()))
            .collect::<Option<Vec<_>>>()?
            .join(", ");
        let blocks = tile_ids.iter().map(|&b| self.bs_name(b)).join(", ");
        let order = (0..tile_ids.len()).rev().map(|i| i.to_string()).join(", ");
        Some(format!(
            "tl.make_block_ptr({tname}, [{shape}], [{strides}], [{offsets}], [{blocks}], [{order}])"
        ))
    }

    // Host side -----------------------------------------------------------

    fn first_tensor_param(&self) -> Option<&str> {
        self.program
            .params
            .iter()
            .find(|p| p.kind == ParamKind::Tensor)
            .map(|p| p.name.as_str())
    }

    fn emit_launcher(&mut self, params: &ParamTable, precompile: bool) -> Result<()> {
        let name = &self.program.name;
        let arg_list = self.program.params.iter().map(|p| p.name.clone()).join(", ");
        if precompile {
            self.w.line(format!("def _{name}_make_precompiler({arg_list}):"));
        } else {
            self.w.line(format!("def {name}({arg_list}):"));
        }
        self.w.indent();

        let device = self
            .first_tensor_param()
            .map(|t| format!("{t}.device"))
            .unwrap_or_else(|| "'cuda'".to_owned());
        let host_allocs = self.program.host.clone();
        for stmt in &host_allocs {
            let HostStmt::Alloc { dst, shape, dtype, zeroed, .. } = stmt;
            let dims = shape
                .iter()
                .map(|&s| {
                    self.env.shape_env.host_expr(s).ok_or_else(|| {
                        error::ShapeSpecializingAllocationSnafu {
                            size: self.env.shape_env.render(s),
                            loc: self.program.value(*dst).loc,
                        }
                        .build()
                    })
                })
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let ctor = if *zeroed { "torch.zeros" } else { "torch.empty" };
            self.w.line(format!(
                "{} = {ctor}([{dims}], dtype={}, device={device})",
                self.name(*dst),
                torch_dtype(*dtype)
            ));
        }

        for block_id in self.tunable_blocks() {
            let value = self.host_block_size_expr(block_id);
            self.w.line(format!("_BLOCK_SIZE_{} = {value}", block_id.0));
        }

        let grid = self.host_grid_expr();
        let tail = format!(
            "{}, num_warps={}, num_stages={}",
            params.call_args(),
            self.config.num_warps,
            self.config.num_stages
        );
        if precompile {
            self.w.line("from tessel_runtime.precompile import make_precompiler");
            self.w.line(format!("return make_precompiler(_{name}_kernel)({tail})"));
        } else {
            self.w.line(format!("_{name}_kernel[{grid}]({tail})"));
            if let Some(ret) = self.program.ret {
                self.w.line(format!("return {}", self.name(ret)));
            }
        }
        self.w.dedent();
        Ok(())
    }

    /// Host-side value for a block-size local in the launcher.
    fn host_block_size_expr(&self, block_id: BlockId) -> String {
        let info = self.env.block_info(block_id);
        match info.source {
            BlockSizeSource::Loop => {
                let idx = self.spec.block_id_to_index(block_id).unwrap_or(0);
                self.config.block_sizes.get(idx).copied().unwrap_or(1).to_string()
            }
            BlockSizeSource::ReductionLoop => {
                let idx = self.spec.reduction_index(block_id).unwrap_or(0);
                match self.config.reduction_loops.get(idx).copied().flatten() {
                    Some(block) => block.to_string(),
                    // Persistent: cover the actual extent, padded to a power
                    // of two at bind time.
                    None => format!(
                        "triton.next_power_of_2({})",
                        self.env
                            .shape_env
                            .host_expr(info.size)
                            .unwrap_or_else(|| self.env.shape_env.size_hint(info.size).to_string())
                    ),
                }
            }
            BlockSizeSource::Fixed(v) => v.to_string(),
            BlockSizeSource::Grid => "1".to_owned(),
        }
    }

    fn host_extent_expr(&self, begin: SymInt, end: SymInt) -> String {
        let h = |s: SymInt| {
            self.env
                .shape_env
                .host_expr(s)
                .unwrap_or_else(|| self.env.shape_env.size_hint(s).to_string())
        };
        if begin == SymInt::Const(0) {
            h(end)
        } else {
            format!("({} - {})", h(end), h(begin))
        }
    }

    fn host_grid_expr(&self) -> String {
        let root_total = |root: usize| -> String {
            match self.plan(root) {
                RootPlan::Flattened { dims } => {
                    let total = dims
                        .iter()
                        .map(|d| format!("({})", self.host_extent_expr(d.begin, d.end)))
                        .join(" * ");
                    let flat =
                        dims.iter().map(|d| self.host_bs_name(d.block_id)).join(" * ");
                    format!("triton.cdiv({total}, {flat})")
                }
                RootPlan::Nd { dims, .. } => dims
                    .iter()
                    .map(|d| {
                        format!(
                            "triton.cdiv({}, {})",
                            self.host_extent_expr(d.begin, d.end),
                            self.host_bs_name(d.block_id)
                        )
                    })
                    .join(" * "),
            }
        };

        if self.config.pid_type == PidType::Xyz && self.program.roots.len() == 1 {
            if let RootPlan::Nd { dims, order, .. } = self.plan(0) {
                let mut axes = vec!["1".to_owned(); 3];
                for (axis, &i) in order.iter().enumerate().take(3) {
                    axes[axis] = format!(
                        "triton.cdiv({}, {})",
                        self.host_extent_expr(dims[i].begin, dims[i].end),
                        self.host_bs_name(dims[i].block_id)
                    );
                }
                return format!("({},)", axes.join(", "));
            }
        }
        let total = (0..self.program.roots.len()).map(root_total).join(" + ");
        if self.config.pid_type == PidType::Persistent {
            let device = self
                .first_tensor_param()
                .map(|t| format!("{t}.device"))
                .unwrap_or_else(|| "'cuda'".to_owned());
            format!(
                "(min({total}, torch.cuda.get_device_properties({device}).multi_processor_count),)"
            )
        } else {
            format!("({total},)")
        }
    }

    fn host_bs_name(&self, block_id: BlockId) -> String {
        match self.env.block_info(block_id).source {
            BlockSizeSource::Fixed(v) => v.to_string(),
            BlockSizeSource::Grid => "1".to_owned(),
            _ => format!("_BLOCK_SIZE_{}", block_id.0),
        }
    }
}

fn torch_dtype(dtype: DType) -> &'static str {
    match dtype {
        DType::F32 => "torch.float32",
        DType::F16 => "torch.float16",
        DType::BF16 => "torch.bfloat16",
        DType::I32 => "torch.int32",
        DType::I64 => "torch.int64",
        DType::Bool => "torch.bool",
    }
}
