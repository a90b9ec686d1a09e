//! The reference backend: a direct interpreter for traced programs.
//!
//! "Compiling" here still runs the code generator, so every config the
//! autotuner proposes is validated against the real lowering path, but
//! execution interprets the typed program on host tensors instead of
//! launching the generated module. Pid mapping goes through the exact same
//! functions codegen renders ([`decompose_pid`], [`l2_swizzle`], the root
//! plans), so the interpreter and the generated kernel cover the same
//! elements for any config.
//!
//! Reductions always execute over the full dimension in one pass. A looped
//! reduction config changes how the generated kernel chunks the work, not
//! which elements feed the reduction, so results agree.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use snafu::{ensure, ResultExt};

use tessel_compiler::{
    decompose_pid, generate, l2_swizzle, resolve_block_size, ProgramIds, RootPlan, Traced,
};
use tessel_config::Config;
use tessel_ir::program::{
    BlockId, DeviceExpr, DeviceLoop, DeviceStmt, HostStmt, Index, ParamKind, ReduceOp, ValueId,
    ValueKind,
};
use tessel_ir::sym::{SymInt, SymVar};
use tessel_ir::{Device, Tensor};

use crate::backend::{CompiledKernel, KernelBackend, RunArg};
use crate::error::{self, Result};

/// Backend that interprets programs on the host.
#[derive(Debug, Default)]
pub struct SimBackend;

impl KernelBackend for SimBackend {
    fn name(&self) -> &str {
        "sim"
    }

    fn compile(&self, traced: &Arc<Traced>, config: &Config) -> Result<Arc<dyn CompiledKernel>> {
        let source = generate(traced, config).context(error::CompileSnafu)?;
        Ok(Arc::new(SimKernel {
            traced: Arc::clone(traced),
            config: source.config,
            source: source.text,
        }))
    }
}

/// One "compiled" variant: the program, the normalized config, and the
/// generated source kept for inspection.
pub struct SimKernel {
    traced: Arc<Traced>,
    config: Config,
    source: String,
}

impl CompiledKernel for SimKernel {
    fn execute(&self, args: &[RunArg<'_>]) -> Result<Tensor> {
        Interp::run(&self.traced, &self.config, args)
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// A device value during interpretation. Tiles hold their data row-major
/// over the current lane counts of their block dimensions (a single lane
/// axis under the flattened layout).
#[derive(Debug, Clone)]
enum Value {
    Scalar(f64),
    Tile { dims: SmallVec<[BlockId; 3]>, shape: SmallVec<[usize; 3]>, data: Vec<f64> },
}

/// The live lanes of one block dimension.
#[derive(Debug, Clone)]
struct DimState {
    indices: Vec<i64>,
    offset: i64,
    end: i64,
    block_size: i64,
}

/// Lane bookkeeping for a flattened root.
#[derive(Debug, Clone)]
struct FlatState {
    dims: Vec<BlockId>,
    extents: Vec<i64>,
    /// Linear element ids this program covers, already clipped to the total.
    lanes: Vec<i64>,
}

struct Interp<'a> {
    traced: &'a Traced,
    config: &'a Config,
    bindings: HashMap<SymVar, i64>,
    extents: HashMap<BlockId, i64>,
    tensors: HashMap<ValueId, Tensor>,
    values: HashMap<ValueId, Value>,
    dims: HashMap<BlockId, DimState>,
    flat: Option<FlatState>,
}

impl<'a> Interp<'a> {
    fn run(traced: &'a Traced, config: &'a Config, args: &[RunArg<'_>]) -> Result<Tensor> {
        let mut interp = Self::bind(traced, config, args)?;
        interp.allocate_outputs()?;
        interp.seed_reduction_dims()?;

        let ids = ProgramIds::plan(&traced.program, &traced.env, &traced.spec, config);
        let extents = interp.extents.clone();
        let extent_of = move |id: BlockId| extents[&id];
        let total = ids.total(&extent_of);
        for pid in 0..total {
            let Some((root_idx, local)) = ids.locate(pid, &extent_of) else {
                unreachable!("pid {pid} inside the grid of {total}")
            };
            interp.run_root(&ids.plans[root_idx], root_idx, local)?;
        }

        let ret = traced.program.ret.ok_or_else(|| {
            error::MissingReturnSnafu { name: traced.program.name.clone() }.build()
        })?;
        match interp.tensors.remove(&ret) {
            Some(t) => Ok(t),
            None => unreachable!("return value is always a host tensor"),
        }
    }

    /// Check the actual arguments against the traced parameter list and
    /// bind every leaf size variable.
    fn bind(traced: &'a Traced, config: &'a Config, args: &[RunArg<'_>]) -> Result<Self> {
        let program = &traced.program;
        ensure!(
            args.len() == program.params.len(),
            error::ArgumentCountSnafu { expected: program.params.len(), got: args.len() }
        );
        let mut bindings = HashMap::new();
        let mut tensors = HashMap::new();
        for (param, arg) in program.params.iter().zip(args) {
            let name = param.name.clone();
            match (param.kind, arg) {
                (ParamKind::Tensor, RunArg::Tensor(t)) => {
                    ensure!(
                        t.device() == Device::Cpu,
                        error::UnsupportedDeviceSnafu { name, device: t.device() }
                    );
                    let ValueKind::HostTensor { fake } = &program.value(param.value).kind else {
                        unreachable!("tensor params always point at host tensors")
                    };
                    ensure!(
                        fake.shape.len() == t.ndim(),
                        error::ArgumentMismatchSnafu {
                            name,
                            reason: format!("traced with rank {}, bound to rank {}", fake.shape.len(), t.ndim()),
                        }
                    );
                    for (dim, (&sym, &actual)) in fake.shape.iter().zip(t.shape()).enumerate() {
                        match sym {
                            SymInt::Const(expected) => ensure!(
                                expected == actual as i64,
                                error::ShapeMismatchSnafu { name: param.name.clone(), dim, expected, got: actual }
                            ),
                            SymInt::Sym(var) => {
                                bindings.insert(var, actual as i64);
                            }
                        }
                    }
                    tensors.insert(param.value, (*t).clone());
                }
                (ParamKind::Int, RunArg::Int(v)) => {
                    let ValueKind::HostScalar { value } = &program.value(param.value).kind else {
                        unreachable!("int params always point at host scalars")
                    };
                    if let Some(var) = value.as_var() {
                        bindings.insert(var, *v);
                    }
                }
                (ParamKind::ConstInt, RunArg::Int(v)) => {
                    let ValueKind::HostScalar { value } = &program.value(param.value).kind else {
                        unreachable!("const-int params always point at host scalars")
                    };
                    ensure!(
                        value.as_const() == Some(*v),
                        error::ArgumentMismatchSnafu {
                            name,
                            reason: format!("specialized on constant {:?}, called with {v}", value.as_const()),
                        }
                    );
                }
                (ParamKind::Tensor, RunArg::Int(_)) => {
                    return error::ArgumentMismatchSnafu { name, reason: "expected a tensor, got an int".to_owned() }.fail();
                }
                (_, RunArg::Tensor(_)) => {
                    return error::ArgumentMismatchSnafu { name, reason: "expected an int, got a tensor".to_owned() }.fail();
                }
            }
        }

        let mut interp = Self {
            traced,
            config,
            bindings,
            extents: HashMap::new(),
            tensors,
            values: HashMap::new(),
            dims: HashMap::new(),
            flat: None,
        };
        for info in traced.env.block_sizes() {
            let extent = interp.eval(info.size)?;
            interp.extents.insert(info.block_id, extent);
        }
        Ok(interp)
    }

    fn eval(&self, s: SymInt) -> Result<i64> {
        self.traced
            .env
            .shape_env
            .evaluate(s, &|var| self.bindings.get(&var).copied())
            .ok_or_else(|| error::UnboundSizeSnafu { name: self.traced.env.shape_env.render(s) }.build())
    }

    fn allocate_outputs(&mut self) -> Result<()> {
        let allocs = self.traced.program.host.clone();
        for HostStmt::Alloc { dst, shape, dtype, .. } in &allocs {
            let dims = shape.iter().map(|&s| Ok(self.eval(s)?.max(0) as usize)).collect::<Result<Vec<_>>>()?;
            // The interpreter zero-fills every allocation; `zeroed` only
            // matters for the generated launcher.
            self.tensors.insert(*dst, Tensor::zeros(&dims, *dtype, Device::Cpu));
        }
        Ok(())
    }

    /// Reduction dimensions index their whole extent from any scope.
    fn seed_reduction_dims(&mut self) -> Result<()> {
        let env = &self.traced.env;
        for info in env.block_sizes() {
            if !matches!(info.source, tessel_compiler::BlockSizeSource::ReductionLoop) {
                continue;
            }
            let extent = self.extents[&info.block_id];
            let block_size = resolve_block_size(env, &self.traced.spec, self.config, info.block_id);
            self.dims.insert(
                info.block_id,
                DimState { indices: (0..extent).collect(), offset: 0, end: extent, block_size },
            );
        }
        Ok(())
    }

    fn run_root(&mut self, plan: &RootPlan, root_idx: usize, local: i64) -> Result<()> {
        let body = &self.traced.program.roots[root_idx].inner.body;
        match plan {
            RootPlan::Nd { dims, order, l2_group } => {
                let counts: Vec<i64> = order
                    .iter()
                    .map(|&i| dims[i].grid_size(self.extents[&dims[i].block_id]))
                    .collect();
                let pids = if dims.len() == 2 && *l2_group > 1 {
                    let (pid_m, pid_n) = l2_swizzle(local, counts[0], counts[1], *l2_group);
                    vec![pid_m, pid_n]
                } else {
                    decompose_pid(local, &counts)
                };
                for (k, &i) in order.iter().enumerate() {
                    let d = &dims[i];
                    let begin = self.eval(d.begin)?;
                    let end = self.eval(d.end)?;
                    let offset = begin + pids[k] * d.block_size;
                    let indices = (offset..(offset + d.block_size).min(end)).collect();
                    self.dims.insert(
                        d.block_id,
                        DimState { indices, offset, end, block_size: d.block_size },
                    );
                }
                self.exec_body(body)?;
                for d in dims.iter() {
                    self.dims.remove(&d.block_id);
                }
            }
            RootPlan::Flattened { dims } => {
                let extents: Vec<i64> = dims.iter().map(|d| self.extents[&d.block_id]).collect();
                let total: i64 = extents.iter().product();
                let fbs = plan.flat_block_size();
                let lo = local * fbs;
                let hi = (lo + fbs).min(total);
                self.flat = Some(FlatState {
                    dims: dims.iter().map(|d| d.block_id).collect(),
                    extents,
                    lanes: (lo..hi).collect(),
                });
                self.exec_body(body)?;
                self.flat = None;
            }
        }
        Ok(())
    }

    fn exec_body(&mut self, body: &[DeviceStmt]) -> Result<()> {
        for stmt in body {
            match stmt {
                DeviceStmt::Define { dst, expr, .. } | DeviceStmt::Assign { dst, expr, .. } => {
                    let v = self.eval_expr(*dst, expr)?;
                    self.values.insert(*dst, v);
                }
                DeviceStmt::Store { tensor, index, value, .. } => {
                    self.write(*tensor, index, *value, false)?;
                }
                DeviceStmt::AtomicAdd { tensor, index, value, .. } => {
                    self.write(*tensor, index, *value, true)?;
                }
                DeviceStmt::Loop(l) => self.exec_loop(l, 0)?,
            }
        }
        Ok(())
    }

    /// Sequential nested loop: iterate dimension `d`'s blocks, recursing
    /// into the remaining dimensions, running the body at the innermost
    /// level.
    fn exec_loop(&mut self, l: &DeviceLoop, d: usize) -> Result<()> {
        if d == l.block_ids.len() {
            return self.exec_body(&l.body);
        }
        let id = l.block_ids[d];
        let begin = self.eval(l.begins[d])?;
        let end = self.eval(l.ends[d])?;
        let block_size =
            resolve_block_size(&self.traced.env, &self.traced.spec, self.config, id).max(1);
        let mut offset = begin;
        while offset < end {
            let indices = (offset..(offset + block_size).min(end)).collect();
            self.dims.insert(id, DimState { indices, offset, end, block_size });
            self.exec_loop(l, d + 1)?;
            offset += block_size;
        }
        self.dims.remove(&id);
        Ok(())
    }

    // Expressions ----------------------------------------------------------

    fn value(&self, id: ValueId) -> Value {
        match self.values.get(&id) {
            Some(v) => v.clone(),
            None => unreachable!("value {} read before definition", id.0),
        }
    }

    fn scalar(&self, id: ValueId) -> f64 {
        match self.value(id) {
            Value::Scalar(s) => s,
            Value::Tile { .. } => unreachable!("scalar expected for value {}", id.0),
        }
    }

    fn dim(&self, id: BlockId) -> &DimState {
        match self.dims.get(&id) {
            Some(d) => d,
            None => unreachable!("block dimension {} used outside its loop", id.0),
        }
    }

    fn eval_expr(&self, dst: ValueId, expr: &DeviceExpr) -> Result<Value> {
        match expr {
            DeviceExpr::Load { tensor, index } => self.load(dst, *tensor, index),
            DeviceExpr::Binary { op, lhs, rhs } => {
                let v = match (self.value(*lhs), self.value(*rhs)) {
                    (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(op.apply(a, b)),
                    (Value::Scalar(a), Value::Tile { dims, shape, data }) => Value::Tile {
                        dims,
                        shape,
                        data: data.iter().map(|&b| op.apply(a, b)).collect(),
                    },
                    (Value::Tile { dims, shape, data }, Value::Scalar(b)) => Value::Tile {
                        dims,
                        shape,
                        data: data.iter().map(|&a| op.apply(a, b)).collect(),
                    },
                    (Value::Tile { dims, shape, data: ld }, Value::Tile { data: rd, .. }) => {
                        Value::Tile {
                            dims,
                            shape,
                            data: ld.iter().zip(&rd).map(|(&a, &b)| op.apply(a, b)).collect(),
                        }
                    }
                };
                Ok(v)
            }
            DeviceExpr::Unary { op, src } => Ok(match self.value(*src) {
                Value::Scalar(a) => Value::Scalar(op.apply(a)),
                Value::Tile { dims, shape, data } => {
                    Value::Tile { dims, shape, data: data.iter().map(|&a| op.apply(a)).collect() }
                }
            }),
            DeviceExpr::DotAcc { lhs, rhs, acc } => self.dot_acc(*lhs, *rhs, *acc),
            DeviceExpr::Reduce { op, src, axis } => self.reduce(*op, *src, *axis),
            DeviceExpr::Full { dims, value, .. } => Ok(self.full(dims, *value)),
            DeviceExpr::TileBegin(id) => Ok(Value::Scalar(self.dim(*id).offset as f64)),
            DeviceExpr::TileEnd(id) => {
                let d = self.dim(*id);
                Ok(Value::Scalar((d.offset + d.block_size).min(d.end) as f64))
            }
            DeviceExpr::TileBlockSize(id) => {
                let d = self.dim(*id);
                Ok(Value::Scalar(d.block_size.min(d.end - d.offset) as f64))
            }
            DeviceExpr::TileIndex(id) => {
                let d = self.dim(*id);
                Ok(Value::Tile {
                    dims: smallvec![*id],
                    shape: smallvec![d.indices.len()],
                    data: d.indices.iter().map(|&i| i as f64).collect(),
                })
            }
        }
    }

    fn full(&self, dims: &[BlockId], value: f64) -> Value {
        if dims.is_empty() {
            return Value::Scalar(value);
        }
        if self.flat.as_ref().is_some_and(|f| f.dims == dims) {
            let lanes = self.flat.as_ref().map_or(0, |f| f.lanes.len());
            return Value::Tile {
                dims: dims.iter().copied().collect(),
                shape: smallvec![lanes],
                data: vec![value; lanes],
            };
        }
        let shape: SmallVec<[usize; 3]> = dims.iter().map(|&d| self.dim(d).indices.len()).collect();
        let n = shape.iter().product();
        Value::Tile { dims: dims.iter().copied().collect(), shape, data: vec![value; n] }
    }

    fn load(&self, dst: ValueId, tensor: ValueId, index: &[Index]) -> Result<Value> {
        let dims: SmallVec<[BlockId; 3]> = self
            .traced
            .program
            .value(dst)
            .device_dims()
            .unwrap_or(&[])
            .iter()
            .copied()
            .collect();
        if self.flat.as_ref().is_some_and(|f| f.dims == dims.as_slice()) {
            let offsets = self.flat_offsets(tensor, index)?;
            let t = &self.tensors[&tensor];
            let data = offsets
                .iter()
                .map(|&off| t.get(off).context(error::TensorSnafu))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Value::Tile { dims, shape: smallvec![data.len()], data });
        }
        let offsets = self.target_offsets(tensor, index, &dims)?;
        let t = &self.tensors[&tensor];
        let data = offsets
            .iter()
            .map(|&off| t.get(off).context(error::TensorSnafu))
            .collect::<Result<Vec<_>>>()?;
        if dims.is_empty() {
            return Ok(Value::Scalar(data[0]));
        }
        let shape: SmallVec<[usize; 3]> = dims.iter().map(|&d| self.dim(d).indices.len()).collect();
        Ok(Value::Tile { dims, shape, data })
    }

    fn write(&mut self, tensor: ValueId, index: &[Index], value: ValueId, atomic: bool) -> Result<()> {
        let mut sub_dims: SmallVec<[BlockId; 3]> = SmallVec::new();
        for ix in index {
            match ix {
                Index::Tile(id) => sub_dims.push(*id),
                Index::Scalar(_) => {}
                Index::Gather(v) => {
                    sub_dims.extend(
                        self.traced.program.value(*v).device_dims().unwrap_or(&[]).iter().copied(),
                    );
                }
            }
        }
        let offsets = if self.flat.as_ref().is_some_and(|f| f.dims == sub_dims.as_slice()) {
            self.flat_offsets(tensor, index)?
        } else {
            self.target_offsets(tensor, index, &sub_dims)?
        };
        let vals: Vec<f64> = match self.value(value) {
            Value::Scalar(s) => vec![s; offsets.len()],
            Value::Tile { data, .. } => data,
        };
        let Some(t) = self.tensors.get_mut(&tensor) else {
            unreachable!("stores always target host tensors")
        };
        for (&off, &v) in offsets.iter().zip(&vals) {
            if atomic {
                let cur = t.get(off).context(error::TensorSnafu)?;
                t.set(off, cur + v).context(error::TensorSnafu)?;
            } else {
                t.set(off, v).context(error::TensorSnafu)?;
            }
        }
        Ok(())
    }

    /// Linear storage offsets addressed by a subscript in the flattened
    /// layout: each lane's linear id is split into per-dimension coordinates
    /// in row-major order (last dimension fastest).
    fn flat_offsets(&self, tensor: ValueId, index: &[Index]) -> Result<Vec<usize>> {
        let Some(f) = &self.flat else { unreachable!("flat offsets outside a flattened root") };
        let t = &self.tensors[&tensor];
        let name = &self.traced.program.value(tensor).name;
        let mut offsets = Vec::with_capacity(f.lanes.len());
        for &lane in &f.lanes {
            let mut rest = lane;
            let mut off = 0usize;
            for axis in (0..index.len()).rev() {
                let extent = f.extents[axis].max(1);
                let coord = rest % extent;
                rest /= extent;
                ensure!(
                    coord < t.size(axis) as i64,
                    error::AccessOutOfBoundsSnafu {
                        tensor: name.clone(),
                        index: coord,
                        extent: t.size(axis) as i64,
                    }
                );
                off += coord as usize * t.strides()[axis];
            }
            offsets.push(off);
        }
        Ok(offsets)
    }

    /// Linear storage offsets addressed by a subscript, one per position of
    /// the tile spanning `dims`.
    fn target_offsets(&self, tensor: ValueId, index: &[Index], dims: &[BlockId]) -> Result<Vec<usize>> {
        let t = &self.tensors[&tensor];
        let name = &self.traced.program.value(tensor).name;
        let shape: SmallVec<[usize; 3]> = dims.iter().map(|&d| self.dim(d).indices.len()).collect();
        let n: usize = shape.iter().product();
        let mut offsets = Vec::with_capacity(n);
        for linear in 0..n {
            let coords = unflatten(linear, &shape);
            let mut off = 0usize;
            for (axis, ix) in index.iter().enumerate() {
                let idx_val = match ix {
                    Index::Tile(id) => {
                        let Some(p) = dims.iter().position(|d| d == id) else {
                            unreachable!("subscript dimension missing from tile dims")
                        };
                        self.dim(*id).indices[coords[p]]
                    }
                    Index::Scalar(v) => self.scalar(*v) as i64,
                    Index::Gather(v) => {
                        let Value::Tile { dims: gdims, shape: gshape, data } = self.value(*v) else {
                            unreachable!("gather index is always a tile")
                        };
                        let mut glin = 0usize;
                        for (gp, gd) in gdims.iter().enumerate() {
                            let Some(p) = dims.iter().position(|d| d == gd) else {
                                unreachable!("gather dimension missing from tile dims")
                            };
                            glin = glin * gshape[gp] + coords[p];
                        }
                        let raw = data[glin] as i64;
                        ensure!(
                            raw >= 0 && raw < t.size(axis) as i64,
                            error::GatherIndexOutOfBoundsSnafu {
                                index: raw,
                                extent: t.size(axis) as i64,
                                tensor: name.clone(),
                            }
                        );
                        raw
                    }
                };
                ensure!(
                    idx_val >= 0 && idx_val < t.size(axis) as i64,
                    error::AccessOutOfBoundsSnafu {
                        tensor: name.clone(),
                        index: idx_val,
                        extent: t.size(axis) as i64,
                    }
                );
                off += idx_val as usize * t.strides()[axis];
            }
            offsets.push(off);
        }
        Ok(offsets)
    }

    fn dot_acc(&self, lhs: ValueId, rhs: ValueId, acc: ValueId) -> Result<Value> {
        let (Value::Tile { data: ld, shape: lshape, .. }, Value::Tile { data: rd, .. }) =
            (self.value(lhs), self.value(rhs))
        else {
            unreachable!("dot operands are always 2-d tiles")
        };
        let Value::Tile { dims, shape, data: mut out } = self.value(acc) else {
            unreachable!("dot accumulator is always a 2-d tile")
        };
        let (m, n) = (shape[0], shape[1]);
        let k = lshape[1];
        for i in 0..m {
            for j in 0..n {
                let mut s = 0.0;
                for kk in 0..k {
                    s += ld[i * k + kk] * rd[kk * n + j];
                }
                out[i * n + j] += s;
            }
        }
        Ok(Value::Tile { dims, shape, data: out })
    }

    /// Only live lanes are materialized, so reducing over them matches the
    /// generated kernel's masked reduction (0 for sums, -inf for maxima).
    fn reduce(&self, op: ReduceOp, src: ValueId, axis: usize) -> Result<Value> {
        let Value::Tile { dims, shape, data } = self.value(src) else {
            unreachable!("reduce source is always a tile")
        };
        let out_dims: SmallVec<[BlockId; 3]> =
            dims.iter().enumerate().filter(|&(i, _)| i != axis).map(|(_, &d)| d).collect();
        let out_shape: SmallVec<[usize; 3]> =
            shape.iter().enumerate().filter(|&(i, _)| i != axis).map(|(_, &s)| s).collect();
        let out_n: usize = out_shape.iter().product();
        let mut out = vec![op.identity(); out_n];
        for linear in 0..data.len() {
            let coords = unflatten(linear, &shape);
            let mut oi = 0usize;
            for (i, &c) in coords.iter().enumerate() {
                if i != axis {
                    oi = oi * shape[i] + c;
                }
            }
            out[oi] = op.combine(out[oi], data[linear]);
        }
        if out_dims.is_empty() {
            return Ok(Value::Scalar(out[0]));
        }
        Ok(Value::Tile { dims: out_dims, shape: out_shape, data: out })
    }
}

/// Row-major coordinates of `linear` in `shape`, last dimension fastest.
fn unflatten(mut linear: usize, shape: &[usize]) -> SmallVec<[usize; 3]> {
    let mut coords: SmallVec<[usize; 3]> = smallvec![0; shape.len()];
    for i in (0..shape.len()).rev() {
        let s = shape[i].max(1);
        coords[i] = linear % s;
        linear /= s;
    }
    coords
}
