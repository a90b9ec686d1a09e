//! The trace context and device scope: the surface a kernel body programs
//! against.
//!
//! A kernel body is an ordinary closure over [`TraceCtx`]. Host-level calls
//! (argument binding, allocation, tile-group creation) live on the context;
//! device-level calls (loads, arithmetic, stores) live on [`DeviceScope`],
//! which only exists inside [`TraceCtx::for_each`]. Misplacing an operation
//! is therefore mostly a type error; the few placement rules the types
//! cannot carry (unconsumed loop groups, host work between top-level loops,
//! tile escape) are enforced here with located errors.

use smallvec::{smallvec, SmallVec};

use tessel_ir::origin::{here, Loc, Origin};
use tessel_ir::program::{
    BinaryOp, BlockId, DeviceExpr, DeviceLoop, DeviceStmt, HostStmt, Index, LoopKind, LoopRoot,
    Param, ParamKind, Program, ReduceOp, UnaryOp, ValueId, ValueInfo, ValueKind,
};
use tessel_ir::sym::SymInt;
use tessel_ir::{DType, Device, FakeTensor};

use crate::env::{Environment, TraceSettings};
use crate::error::{self, Result};
use crate::trace::deps;

/// One actual argument the kernel was bound against.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Tensor { shape: Vec<usize>, dtype: DType, device: Device },
    Int(i64),
}

/// A host tensor: an argument or an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorRef(pub(crate) ValueId);

/// A device tile value produced inside a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRef(pub(crate) ValueId);

/// A host scalar (int argument or size expression).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarRef(pub(crate) ValueId);

/// The tile of one block dimension inside its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub(crate) block_id: BlockId,
}

impl Tile {
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }
}

/// A created-but-not-yet-driven loop group. Deliberately neither `Copy` nor
/// `Clone`: `for_each` consumes it, and a group that is never consumed is
/// reported when the trace finishes.
#[derive(Debug)]
pub struct TileGroup {
    idx: usize,
}

/// One per-axis subscript in a tensor access.
#[derive(Debug, Clone, Copy)]
pub enum Idx {
    /// The tile of a block dimension.
    Tile(Tile),
    /// A scalar device value selecting a single row/column.
    Scalar(TileRef),
    /// An integer tile used as a gather index.
    Gather(TileRef),
}

#[derive(Debug)]
struct PendingGroup {
    kind: LoopKind,
    block_ids: SmallVec<[BlockId; 3]>,
    begins: SmallVec<[SymInt; 3]>,
    ends: SmallVec<[SymInt; 3]>,
    zero_based: bool,
    consumed: bool,
    loc: Loc,
}

/// The finished trace: the typed program plus the environment and the
/// configuration space it accumulated.
#[derive(Debug)]
pub struct Traced {
    pub program: Program,
    pub env: Environment,
    pub spec: tessel_config::ConfigSpec,
}

/// Trace `body` once and finish the program.
pub fn trace(
    name: impl Into<String>,
    settings: TraceSettings,
    args: Vec<ArgValue>,
    body: impl FnOnce(&mut TraceCtx) -> Result<()>,
) -> Result<Traced> {
    let mut ctx = TraceCtx::new(name, settings, args);
    body(&mut ctx)?;
    ctx.finish()
}

pub struct TraceCtx {
    program: Program,
    env: Environment,
    args: Vec<ArgValue>,
    next_arg: usize,
    pending: Vec<PendingGroup>,
    /// Block dimensions whose loops are currently open, outermost first.
    active_blocks: Vec<BlockId>,
    roots_started: bool,
    /// Location of the first host statement after a top-level loop, if any.
    host_after_root: Option<Loc>,
}

impl TraceCtx {
    pub fn new(name: impl Into<String>, settings: TraceSettings, args: Vec<ArgValue>) -> Self {
        Self {
            program: Program::new(name),
            env: Environment::new(settings),
            args,
            next_arg: 0,
            pending: Vec::new(),
            active_blocks: Vec::new(),
            roots_started: false,
            host_after_root: None,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    fn take_arg(&mut self, name: &str) -> Result<ArgValue> {
        let arg = self.args.get(self.next_arg).cloned().ok_or_else(|| {
            error::ArgumentMismatchSnafu {
                name: name.to_owned(),
                reason: "more parameters declared than arguments bound".to_owned(),
            }
            .build()
        })?;
        self.next_arg += 1;
        Ok(arg)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        snafu::ensure!(
            self.program.params.iter().all(|p| p.name != name),
            error::NamingConflictSnafu { name: name.to_owned() }
        );
        Ok(())
    }

    /// Declare the next argument as a tensor.
    #[track_caller]
    pub fn tensor_arg(&mut self, name: &str) -> Result<TensorRef> {
        let loc = here();
        self.check_name(name)?;
        let (shape, dtype, device) = match self.take_arg(name)? {
            ArgValue::Tensor { shape, dtype, device } => (shape, dtype, device),
            ArgValue::Int(_) => {
                return error::ArgumentMismatchSnafu {
                    name: name.to_owned(),
                    reason: "declared as tensor, bound to an int".to_owned(),
                }
                .fail();
            }
        };
        let fake = self.env.to_fake(name, &shape, dtype, device);
        let id = self.program.push_value(ValueInfo {
            kind: ValueKind::HostTensor { fake },
            name: name.to_owned(),
            loc,
        });
        self.program.params.push(Param { name: name.to_owned(), kind: ParamKind::Tensor, value: id });
        Ok(TensorRef(id))
    }

    /// Declare the next argument as a runtime integer (stays symbolic).
    #[track_caller]
    pub fn int_arg(&mut self, name: &str) -> Result<ScalarRef> {
        let loc = here();
        self.check_name(name)?;
        let value = match self.take_arg(name)? {
            ArgValue::Int(v) => v,
            ArgValue::Tensor { .. } => {
                return error::ArgumentMismatchSnafu {
                    name: name.to_owned(),
                    reason: "declared as int, bound to a tensor".to_owned(),
                }
                .fail();
            }
        };
        let sym = self.env.shape_env.create_var(name, value, Origin::Argument { name: name.to_owned() });
        let id = self.program.push_value(ValueInfo {
            kind: ValueKind::HostScalar { value: sym },
            name: name.to_owned(),
            loc,
        });
        self.program.params.push(Param { name: name.to_owned(), kind: ParamKind::Int, value: id });
        Ok(ScalarRef(id))
    }

    /// Declare the next argument as a compile-time constant. The value is
    /// baked into the generated source and specializes the kernel.
    #[track_caller]
    pub fn const_int_arg(&mut self, name: &str) -> Result<i64> {
        let loc = here();
        self.check_name(name)?;
        let value = match self.take_arg(name)? {
            ArgValue::Int(v) => v,
            ArgValue::Tensor { .. } => {
                return error::ArgumentMismatchSnafu {
                    name: name.to_owned(),
                    reason: "declared as int, bound to a tensor".to_owned(),
                }
                .fail();
            }
        };
        let id = self.program.push_value(ValueInfo {
            kind: ValueKind::HostScalar { value: SymInt::Const(value) },
            name: name.to_owned(),
            loc,
        });
        self.program
            .params
            .push(Param { name: name.to_owned(), kind: ParamKind::ConstInt, value: id });
        Ok(value)
    }

    /// Symbolic size of one tensor dimension.
    pub fn size(&self, tensor: TensorRef, dim: usize) -> SymInt {
        match &self.program.value(tensor.0).kind {
            ValueKind::HostTensor { fake } => fake.shape[dim],
            _ => unreachable!("TensorRef always points at a host tensor"),
        }
    }

    pub fn ndim(&self, tensor: TensorRef) -> usize {
        self.fake(tensor).shape.len()
    }

    pub fn dtype(&self, tensor: TensorRef) -> DType {
        self.fake(tensor).dtype
    }

    pub fn device(&self, tensor: TensorRef) -> Device {
        self.fake(tensor).device
    }

    /// Symbolic value of a runtime int argument, usable as a size.
    pub fn scalar_value(&self, scalar: ScalarRef) -> SymInt {
        match &self.program.value(scalar.0).kind {
            ValueKind::HostScalar { value } => *value,
            _ => unreachable!("ScalarRef always points at a host scalar"),
        }
    }

    fn fake(&self, tensor: TensorRef) -> &FakeTensor {
        match &self.program.value(tensor.0).kind {
            ValueKind::HostTensor { fake } => fake,
            _ => unreachable!("TensorRef always points at a host tensor"),
        }
    }

    /// Allocate an output tensor on the host. Every dimension must reduce
    /// to an expression over argument sizes; anything else would bake one
    /// input's data into the compiled artifact.
    #[track_caller]
    pub fn empty(&mut self, shape: &[SymInt], dtype: DType, device: Device) -> Result<TensorRef> {
        self.alloc(shape, dtype, device, false, here())
    }

    /// Allocate a zero-filled output tensor. Required when the kernel only
    /// writes part of the output or accumulates into it.
    #[track_caller]
    pub fn zeros_host(&mut self, shape: &[SymInt], dtype: DType, device: Device) -> Result<TensorRef> {
        self.alloc(shape, dtype, device, true, here())
    }

    fn alloc(
        &mut self,
        shape: &[SymInt],
        dtype: DType,
        device: Device,
        zeroed: bool,
        loc: Loc,
    ) -> Result<TensorRef> {
        for &dim in shape {
            snafu::ensure!(
                self.env.shape_env.host_expr(dim).is_some(),
                error::ShapeSpecializingAllocationSnafu { size: self.env.shape_env.render(dim), loc }
            );
        }
        if self.roots_started {
            self.host_after_root.get_or_insert(loc);
        }
        let name = format!("out_{}", self.program.values().len());
        let fake = FakeTensor {
            shape: shape.iter().copied().collect(),
            dtype,
            device,
            origin: Origin::Internal,
        };
        let id = self.program.push_value(ValueInfo {
            kind: ValueKind::HostTensor { fake },
            name,
            loc,
        });
        self.program.host.push(HostStmt::Alloc {
            dst: id,
            shape: shape.iter().copied().collect(),
            dtype,
            zeroed,
            loc,
        });
        Ok(TensorRef(id))
    }

    /// Allocate an output with the same shape/dtype/device as `like`.
    #[track_caller]
    pub fn empty_like(&mut self, like: TensorRef) -> Result<TensorRef> {
        let fake = self.fake(like).clone();
        self.alloc(&fake.shape, fake.dtype, fake.device, false, here())
    }

    /// Mark the kernel's return value.
    pub fn ret(&mut self, tensor: TensorRef) {
        self.program.ret = Some(tensor.0);
    }

    fn push_group(
        &mut self,
        kind: LoopKind,
        block_ids: SmallVec<[BlockId; 3]>,
        begins: SmallVec<[SymInt; 3]>,
        ends: SmallVec<[SymInt; 3]>,
        zero_based: bool,
        loc: Loc,
    ) -> TileGroup {
        let idx = self.pending.len();
        self.pending.push(PendingGroup { kind, block_ids, begins, ends, zero_based, consumed: false, loc });
        TileGroup { idx }
    }

    /// An autotuned tile group over `sizes`, one block dimension per size.
    #[track_caller]
    pub fn tile(&mut self, sizes: &[SymInt]) -> TileGroup {
        let loc = here();
        let block_ids: SmallVec<[BlockId; 3]> =
            sizes.iter().map(|&s| self.env.allocate_loop_dimension(s)).collect();
        let begins: SmallVec<[SymInt; 3]> = sizes.iter().map(|_| SymInt::Const(0)).collect();
        self.push_group(LoopKind::Tile, block_ids, begins, sizes.iter().copied().collect(), true, loc)
    }

    /// A tile group over the half-open ranges `begins[i]..ends[i]`.
    #[track_caller]
    pub fn tile_range(&mut self, begins: &[SymInt], ends: &[SymInt]) -> TileGroup {
        let loc = here();
        debug_assert_eq!(begins.len(), ends.len());
        let sizes: SmallVec<[SymInt; 3]> = begins
            .iter()
            .zip(ends)
            .map(|(&b, &e)| self.env.shape_env.sub(e, b))
            .collect();
        let block_ids: SmallVec<[BlockId; 3]> =
            sizes.iter().map(|&s| self.env.allocate_loop_dimension(s)).collect();
        let zero = begins.iter().all(|&b| b == SymInt::Const(0));
        self.push_group(LoopKind::Tile, block_ids, begins.iter().copied().collect(), ends.iter().copied().collect(), zero, loc)
    }

    /// Pre-allocate an autotunable block axis whose iteration extent is
    /// supplied later by [`tile_sized`]. Lets two loops share one block-size
    /// knob, or lets the body shape an accumulator before its loop opens.
    ///
    /// [`tile_sized`]: Self::tile_sized
    pub fn register_block_size(&mut self, min: i64, max: i64) -> Tile {
        let block_id = self.env.allocate_registered_dimension(min, max);
        Tile { block_id }
    }

    /// A tile group driven by pre-registered block axes, one axis per size.
    #[track_caller]
    pub fn tile_sized(&mut self, sizes: &[SymInt], axes: &[Tile]) -> TileGroup {
        let loc = here();
        debug_assert_eq!(sizes.len(), axes.len());
        let block_ids: SmallVec<[BlockId; 3]> = axes.iter().map(|t| t.block_id).collect();
        for (&size, &id) in sizes.iter().zip(&block_ids) {
            self.env.resolve_registered_extent(id, size);
        }
        let begins: SmallVec<[SymInt; 3]> = sizes.iter().map(|_| SymInt::Const(0)).collect();
        self.push_group(LoopKind::Tile, block_ids, begins, sizes.iter().copied().collect(), true, loc)
    }

    /// A tile group with a user-fixed (non-tunable) block size.
    #[track_caller]
    pub fn fixed_tile(&mut self, size: SymInt, block_size: i64) -> TileGroup {
        let loc = here();
        let id = self.env.allocate_fixed_dimension(size, block_size);
        self.push_group(LoopKind::Tile, smallvec![id], smallvec![SymInt::Const(0)], smallvec![size], true, loc)
    }

    /// A one-element-per-program grid group.
    #[track_caller]
    pub fn grid(&mut self, sizes: &[SymInt]) -> TileGroup {
        let loc = here();
        let block_ids: SmallVec<[BlockId; 3]> =
            sizes.iter().map(|&s| self.env.allocate_grid_dimension(s)).collect();
        let begins: SmallVec<[SymInt; 3]> = sizes.iter().map(|_| SymInt::Const(0)).collect();
        self.push_group(LoopKind::Grid, block_ids, begins, sizes.iter().copied().collect(), true, loc)
    }

    /// A whole-dimension reduction tile: indexes the full extent at once,
    /// with the configuration choosing persistent or looped execution.
    #[track_caller]
    pub fn reduction(&mut self, size: SymInt) -> Tile {
        let block_id = self.env.allocate_reduction_dimension(size);
        Tile { block_id }
    }

    /// Drive a top-level (launch grid) loop over `group`.
    #[track_caller]
    pub fn for_each(
        &mut self,
        group: TileGroup,
        body: impl FnOnce(&mut DeviceScope<'_>, &[Tile]) -> Result<()>,
    ) -> Result<()> {
        let loc = here();
        if self.roots_started {
            if let Some(host_loc) = self.host_after_root {
                return error::TopLevelStatementBetweenLoopsSnafu { loc: host_loc }.fail();
            }
        }
        self.roots_started = true;
        let pending = &mut self.pending[group.idx];
        pending.consumed = true;
        let (kind, block_ids, begins, ends, zero_based) = (
            pending.kind,
            pending.block_ids.clone(),
            pending.begins.clone(),
            pending.ends.clone(),
            pending.zero_based,
        );
        self.env.register_root_group(&block_ids, zero_based);

        let tiles: Vec<Tile> = block_ids.iter().map(|&block_id| Tile { block_id }).collect();
        self.active_blocks.extend(block_ids.iter().copied());
        let mut scope = DeviceScope { ctx: self, stmts: Vec::new() };
        let result = body(&mut scope, &tiles);
        let stmts = scope.stmts;
        for _ in &block_ids {
            self.active_blocks.pop();
        }
        result?;

        self.program.roots.push(LoopRoot {
            inner: DeviceLoop { kind, block_ids, begins, ends, body: stmts, loc },
        });
        Ok(())
    }

    /// Finish tracing: placement checks, cross-loop dependency analysis, and
    /// configuration-space finalization.
    pub fn finish(mut self) -> Result<Traced> {
        if let Some(unconsumed) = self.pending.iter().find(|g| !g.consumed) {
            return error::LoopFunctionNotInForSnafu { loc: unconsumed.loc }.fail();
        }
        snafu::ensure!(!self.program.roots.is_empty(), error::NoDeviceLoopSnafu);
        deps::check(&self.program)?;
        let root_dims: Vec<usize> =
            self.program.roots.iter().map(|r| r.inner.block_ids.len()).collect();
        let spec = self.env.finalize_spec(&root_dims);
        tracing::debug!(
            target: "tessel::trace",
            kernel = %self.program.name,
            roots = self.program.roots.len(),
            block_dims = self.env.block_sizes().len(),
            "trace finished"
        );
        Ok(Traced { program: self.program, env: self.env, spec })
    }
}

/// The device-side statement builder, alive only inside a `for_each` body.
pub struct DeviceScope<'a> {
    ctx: &'a mut TraceCtx,
    stmts: Vec<DeviceStmt>,
}

impl DeviceScope<'_> {
    /// Read access to the trace context (sizes, dtypes).
    pub fn ctx(&self) -> &TraceCtx {
        self.ctx
    }

    fn define(&mut self, kind: ValueKind, name: String, expr: DeviceExpr, loc: Loc) -> ValueId {
        let id = self.ctx.program.push_value(ValueInfo { kind, name, loc });
        self.stmts.push(DeviceStmt::Define { dst: id, expr, loc });
        id
    }

    fn tile_dims(&self, value: ValueId) -> &[BlockId] {
        self.ctx.program.value(value).device_dims().unwrap_or(&[])
    }

    fn tile_dtype(&self, value: ValueId, loc: Loc) -> Result<DType> {
        self.ctx
            .program
            .value(value)
            .dtype()
            .ok_or_else(|| error::ArgumentMismatchSnafu {
                name: self.ctx.program.value(value).name.clone(),
                reason: format!("value has no dtype (at {loc})"),
            }
            .build())
    }

    /// Lower a subscript list: collect the ordered block dimensions it
    /// touches and validate placement.
    fn lower_index(
        &mut self,
        tensor: TensorRef,
        idx: &[Idx],
        loc: Loc,
    ) -> Result<(SmallVec<[Index; 3]>, SmallVec<[BlockId; 3]>)> {
        let fake = self.ctx.fake(tensor).clone();
        let name = self.ctx.program.value(tensor.0).name.clone();
        snafu::ensure!(
            idx.len() == fake.shape.len(),
            error::RankMismatchSnafu { tensor: name, rank: fake.shape.len(), got: idx.len(), loc }
        );
        let mut index: SmallVec<[Index; 3]> = SmallVec::new();
        let mut dims: SmallVec<[BlockId; 3]> = SmallVec::new();
        for (axis, i) in idx.iter().enumerate() {
            match *i {
                Idx::Tile(tile) => {
                    // Reduction tiles span their whole dimension and are
                    // valid in any device scope; loop tiles must be inside
                    // the loop that owns them.
                    let reduction = matches!(
                        self.ctx.env.block_info(tile.block_id).source,
                        crate::env::BlockSizeSource::ReductionLoop
                    );
                    snafu::ensure!(
                        reduction || self.ctx.active_blocks.contains(&tile.block_id),
                        error::IncorrectTileUsageSnafu { block_id: tile.block_id, loc }
                    );
                    let extent = fake.shape[axis];
                    let registered = self.ctx.env.block_info(tile.block_id).size;
                    if !self.ctx.env.shape_env.known_equal(extent, registered) {
                        self.ctx.env.mark_alternate_size(tile.block_id, extent);
                    }
                    index.push(Index::Tile(tile.block_id));
                    dims.push(tile.block_id);
                }
                Idx::Scalar(v) => {
                    snafu::ensure!(
                        self.tile_dims(v.0).is_empty(),
                        error::TileShapeMismatchSnafu {
                            lhs: self.tile_dims(v.0).to_vec(),
                            rhs: Vec::new(),
                            loc,
                        }
                    );
                    index.push(Index::Scalar(v.0));
                }
                Idx::Gather(v) => {
                    let dtype = self.tile_dtype(v.0, loc)?;
                    snafu::ensure!(dtype.is_int(), error::GatherIndexNotIntegerSnafu { dtype, loc });
                    for &d in self.tile_dims(v.0) {
                        dims.push(d);
                    }
                    index.push(Index::Gather(v.0));
                }
            }
        }
        self.ctx.env.observe_tile_access(&dims);
        Ok((index, dims))
    }

    /// Masked load; out-of-range lanes read zero.
    #[track_caller]
    pub fn load(&mut self, tensor: TensorRef, idx: &[Idx]) -> Result<TileRef> {
        let loc = here();
        let (index, dims) = self.lower_index(tensor, idx, loc)?;
        let dtype = self.ctx.fake(tensor).dtype;
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims, dtype },
            name,
            DeviceExpr::Load { tensor: tensor.0, index },
            loc,
        );
        Ok(TileRef(id))
    }

    /// Masked store; only valid lanes are written.
    #[track_caller]
    pub fn store(&mut self, tensor: TensorRef, idx: &[Idx], value: TileRef) -> Result<()> {
        let loc = here();
        let (index, dims) = self.lower_index(tensor, idx, loc)?;
        let value_dims = self.tile_dims(value.0);
        snafu::ensure!(
            value_dims.is_empty() || value_dims == dims.as_slice(),
            error::TileShapeMismatchSnafu { lhs: value_dims.to_vec(), rhs: dims.to_vec(), loc }
        );
        self.stmts.push(DeviceStmt::Store { tensor: tensor.0, index, value: value.0, loc });
        Ok(())
    }

    #[track_caller]
    pub fn atomic_add(&mut self, tensor: TensorRef, idx: &[Idx], value: TileRef) -> Result<()> {
        let loc = here();
        let (index, dims) = self.lower_index(tensor, idx, loc)?;
        let value_dims = self.tile_dims(value.0);
        snafu::ensure!(
            value_dims.is_empty() || value_dims == dims.as_slice(),
            error::TileShapeMismatchSnafu { lhs: value_dims.to_vec(), rhs: dims.to_vec(), loc }
        );
        self.stmts.push(DeviceStmt::AtomicAdd { tensor: tensor.0, index, value: value.0, loc });
        Ok(())
    }

    #[track_caller]
    fn binary(&mut self, op: BinaryOp, lhs: TileRef, rhs: TileRef) -> Result<TileRef> {
        let loc = here();
        let ldims = self.tile_dims(lhs.0).to_vec();
        let rdims = self.tile_dims(rhs.0).to_vec();
        let dims: SmallVec<[BlockId; 3]> = if ldims.is_empty() {
            rdims.iter().copied().collect()
        } else if rdims.is_empty() || ldims == rdims {
            ldims.iter().copied().collect()
        } else {
            return error::TileShapeMismatchSnafu { lhs: ldims, rhs: rdims, loc }.fail();
        };
        let lt = self.tile_dtype(lhs.0, loc)?;
        let rt = self.tile_dtype(rhs.0, loc)?;
        let dtype = lt
            .promote(rt)
            .ok_or_else(|| error::DTypeMismatchSnafu { lhs: lt, rhs: rt, loc }.build())?;
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims, dtype },
            name,
            DeviceExpr::Binary { op, lhs: lhs.0, rhs: rhs.0 },
            loc,
        );
        Ok(TileRef(id))
    }

    #[track_caller]
    pub fn add(&mut self, lhs: TileRef, rhs: TileRef) -> Result<TileRef> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    #[track_caller]
    pub fn sub(&mut self, lhs: TileRef, rhs: TileRef) -> Result<TileRef> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    #[track_caller]
    pub fn mul(&mut self, lhs: TileRef, rhs: TileRef) -> Result<TileRef> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    #[track_caller]
    pub fn div(&mut self, lhs: TileRef, rhs: TileRef) -> Result<TileRef> {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    #[track_caller]
    pub fn maximum(&mut self, lhs: TileRef, rhs: TileRef) -> Result<TileRef> {
        self.binary(BinaryOp::Maximum, lhs, rhs)
    }

    #[track_caller]
    fn unary(&mut self, op: UnaryOp, src: TileRef) -> Result<TileRef> {
        let loc = here();
        let dims: SmallVec<[BlockId; 3]> = self.tile_dims(src.0).iter().copied().collect();
        let dtype = self.tile_dtype(src.0, loc)?;
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims, dtype },
            name,
            DeviceExpr::Unary { op, src: src.0 },
            loc,
        );
        Ok(TileRef(id))
    }

    #[track_caller]
    pub fn neg(&mut self, src: TileRef) -> Result<TileRef> {
        self.unary(UnaryOp::Neg, src)
    }

    #[track_caller]
    pub fn exp(&mut self, src: TileRef) -> Result<TileRef> {
        self.unary(UnaryOp::Exp, src)
    }

    #[track_caller]
    pub fn relu(&mut self, src: TileRef) -> Result<TileRef> {
        self.unary(UnaryOp::Relu, src)
    }

    /// `acc + lhs @ rhs`; reassigns and returns `acc`.
    #[track_caller]
    pub fn dot_acc(&mut self, lhs: TileRef, rhs: TileRef, acc: TileRef) -> Result<TileRef> {
        let loc = here();
        let (l, r, a) = (
            self.tile_dims(lhs.0).to_vec(),
            self.tile_dims(rhs.0).to_vec(),
            self.tile_dims(acc.0).to_vec(),
        );
        let valid = l.len() == 2 && r.len() == 2 && a.len() == 2
            && l[1] == r[0] && a[0] == l[0] && a[1] == r[1];
        snafu::ensure!(valid, error::TileShapeMismatchSnafu { lhs: l, rhs: r, loc });
        self.stmts.push(DeviceStmt::Assign {
            dst: acc.0,
            expr: DeviceExpr::DotAcc { lhs: lhs.0, rhs: rhs.0, acc: acc.0 },
            loc,
        });
        Ok(acc)
    }

    #[track_caller]
    fn reduce(&mut self, op: ReduceOp, src: TileRef, axis: usize) -> Result<TileRef> {
        let loc = here();
        let src_dims = self.tile_dims(src.0).to_vec();
        snafu::ensure!(
            axis < src_dims.len(),
            error::ReduceAxisOutOfRangeSnafu { axis, rank: src_dims.len(), loc }
        );
        let dims: SmallVec<[BlockId; 3]> = src_dims
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &d)| d)
            .collect();
        let dtype = self.tile_dtype(src.0, loc)?;
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims, dtype },
            name,
            DeviceExpr::Reduce { op, src: src.0, axis },
            loc,
        );
        Ok(TileRef(id))
    }

    #[track_caller]
    pub fn reduce_sum(&mut self, src: TileRef, axis: usize) -> Result<TileRef> {
        self.reduce(ReduceOp::Sum, src, axis)
    }

    #[track_caller]
    pub fn reduce_max(&mut self, src: TileRef, axis: usize) -> Result<TileRef> {
        self.reduce(ReduceOp::Max, src, axis)
    }

    /// A tile-shaped constant.
    #[track_caller]
    pub fn full(&mut self, dims: &[Tile], value: f64, dtype: DType) -> TileRef {
        let loc = here();
        let block_dims: SmallVec<[BlockId; 3]> = dims.iter().map(|t| t.block_id).collect();
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims: block_dims.clone(), dtype },
            name,
            DeviceExpr::Full { dims: block_dims, value, dtype },
            loc,
        );
        TileRef(id)
    }

    #[track_caller]
    pub fn zeros(&mut self, dims: &[Tile], dtype: DType) -> TileRef {
        self.full(dims, 0.0, dtype)
    }

    /// First index covered by the tile, as a device scalar.
    #[track_caller]
    pub fn tile_begin(&mut self, tile: Tile) -> TileRef {
        self.introspect(tile, DeviceExpr::TileBegin(tile.block_id))
    }

    /// One past the last index covered by the tile.
    #[track_caller]
    pub fn tile_end(&mut self, tile: Tile) -> TileRef {
        self.introspect(tile, DeviceExpr::TileEnd(tile.block_id))
    }

    /// The tile's width after clipping at the iteration bound.
    #[track_caller]
    pub fn tile_block_size(&mut self, tile: Tile) -> TileRef {
        self.introspect(tile, DeviceExpr::TileBlockSize(tile.block_id))
    }

    /// The index vector of the tile, as a 1-d integer tile.
    #[track_caller]
    pub fn tile_index(&mut self, tile: Tile) -> TileRef {
        let loc = here();
        // Per-dimension indices do not survive linearization.
        self.ctx.env.observe_tile_access(&[tile.block_id]);
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims: smallvec![tile.block_id], dtype: DType::I32 },
            name,
            DeviceExpr::TileIndex(tile.block_id),
            loc,
        );
        TileRef(id)
    }

    #[track_caller]
    fn introspect(&mut self, tile: Tile, expr: DeviceExpr) -> TileRef {
        let loc = here();
        // Tile offsets are undefined under the flattened layout.
        self.ctx.env.observe_tile_access(&[tile.block_id]);
        let name = format!("v_{}", self.ctx.program.values().len());
        let id = self.define(
            ValueKind::DeviceTile { dims: SmallVec::new(), dtype: DType::I32 },
            name,
            expr,
            loc,
        );
        TileRef(id)
    }

    /// A nested autotuned tile group (sequential loop inside the kernel).
    #[track_caller]
    pub fn tile(&mut self, sizes: &[SymInt]) -> TileGroup {
        self.ctx.tile(sizes)
    }

    /// A nested tile group with a fixed block size.
    #[track_caller]
    pub fn fixed_tile(&mut self, size: SymInt, block_size: i64) -> TileGroup {
        self.ctx.fixed_tile(size, block_size)
    }

    /// Drive a nested sequential loop.
    #[track_caller]
    pub fn for_each(
        &mut self,
        group: TileGroup,
        body: impl FnOnce(&mut DeviceScope<'_>, &[Tile]) -> Result<()>,
    ) -> Result<()> {
        let loc = here();
        let pending = &mut self.ctx.pending[group.idx];
        pending.consumed = true;
        let (kind, block_ids, begins, ends) = (
            pending.kind,
            pending.block_ids.clone(),
            pending.begins.clone(),
            pending.ends.clone(),
        );
        if let Some(&dup) = block_ids.iter().find(|id| self.ctx.active_blocks.contains(id)) {
            return error::NestedDeviceLoopsConflictSnafu { block_id: dup, loc }.fail();
        }
        for &id in &block_ids {
            self.ctx.env.register_range(id);
        }
        self.ctx.active_blocks.extend(block_ids.iter().copied());
        let mut scope = DeviceScope { ctx: self.ctx, stmts: Vec::new() };
        let result = body(&mut scope, &block_ids.iter().map(|&block_id| Tile { block_id }).collect::<Vec<_>>());
        let stmts = scope.stmts;
        for _ in &block_ids {
            self.ctx.active_blocks.pop();
        }
        result?;
        self.stmts.push(DeviceStmt::Loop(DeviceLoop { kind, block_ids, begins, ends, body: stmts, loc }));
        Ok(())
    }
}
