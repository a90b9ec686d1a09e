//! The typed program: the traced representation of one user kernel.
//!
//! A [`Program`] is a sequence of host-level statements plus one or more
//! top-level device loop roots, each holding device-level operations
//! annotated with type information (shape in block dimensions, dtype,
//! placement). It is immutable once traced; configurations only change how
//! it is lowered, never its structure.
//!
//! Operations form a closed enum: supporting a new tensor operator is a new
//! variant and a match arm in the strategy/codegen/simulator, not a runtime
//! registry entry.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::dtype::DType;
use crate::fake::FakeTensor;
use crate::origin::Loc;
use crate::sym::SymInt;

/// Stable id of one tunable tiling dimension, allocated by the environment.
/// Ids index directly into the configuration space's parallel tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// Id of one value in the program's value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
}

impl BinaryOp {
    /// Infix operator or function spelling in the kernel dialect.
    pub fn render(self, lhs: &str, rhs: &str) -> String {
        match self {
            Self::Add => format!("{lhs} + {rhs}"),
            Self::Sub => format!("{lhs} - {rhs}"),
            Self::Mul => format!("{lhs} * {rhs}"),
            Self::Div => format!("{lhs} / {rhs}"),
            Self::Maximum => format!("triton_helpers.maximum({lhs}, {rhs})"),
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Maximum => lhs.max(rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Relu,
}

impl UnaryOp {
    pub fn render(self, src: &str) -> String {
        match self {
            Self::Neg => format!("-{src}"),
            Self::Exp => format!("tl_math.exp({src})"),
            Self::Relu => format!("tl.maximum({src}, 0.0)"),
        }
    }

    pub fn apply(self, v: f64) -> f64 {
        match self {
            Self::Neg => -v,
            Self::Exp => v.exp(),
            Self::Relu => v.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    pub fn kernel_fn(self) -> &'static str {
        match self {
            Self::Sum => "tl.sum",
            Self::Max => "tl.max",
        }
    }

    pub fn identity(self) -> f64 {
        match self {
            Self::Sum => 0.0,
            Self::Max => f64::NEG_INFINITY,
        }
    }

    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Sum => a + b,
            Self::Max => a.max(b),
        }
    }
}

/// One per-axis index into a tensor subscript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// The tile of a block dimension (`x[tile_m, ...]`).
    Tile(BlockId),
    /// A scalar device value (single row/column).
    Scalar(ValueId),
    /// An integer tile used as a gather index (`table[idx_tile, ...]`).
    Gather(ValueId),
}

/// Pure device-level expression.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceExpr {
    /// Masked load. Out-of-range lanes read the neutral value 0.
    Load { tensor: ValueId, index: SmallVec<[Index; 3]> },
    Binary { op: BinaryOp, lhs: ValueId, rhs: ValueId },
    Unary { op: UnaryOp, src: ValueId },
    /// `acc + lhs @ rhs` over one reduction block dimension.
    DotAcc { lhs: ValueId, rhs: ValueId, acc: ValueId },
    /// Reduce one block dimension of a tile.
    Reduce { op: ReduceOp, src: ValueId, axis: usize },
    /// Tile-shaped constant.
    Full { dims: SmallVec<[BlockId; 3]>, value: f64, dtype: DType },
    /// Tile introspection: first index covered by the current tile.
    TileBegin(BlockId),
    /// Tile introspection: one past the last index covered.
    TileEnd(BlockId),
    /// Tile introspection: the (possibly masked) tile width.
    TileBlockSize(BlockId),
    /// The index vector of the current tile.
    TileIndex(BlockId),
}

/// Device-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceStmt {
    /// Bind a fresh value.
    Define { dst: ValueId, expr: DeviceExpr, loc: Loc },
    /// Reassign an existing value (accumulator pattern inside loops).
    Assign { dst: ValueId, expr: DeviceExpr, loc: Loc },
    /// Masked store: only valid lanes are written.
    Store { tensor: ValueId, index: SmallVec<[Index; 3]>, value: ValueId, loc: Loc },
    AtomicAdd { tensor: ValueId, index: SmallVec<[Index; 3]>, value: ValueId, loc: Loc },
    /// A nested sequential device loop.
    Loop(DeviceLoop),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Block-sized tiles.
    Tile,
    /// One element per step (block size 1, scalar indices).
    Grid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLoop {
    pub kind: LoopKind,
    pub block_ids: SmallVec<[BlockId; 3]>,
    pub begins: SmallVec<[SymInt; 3]>,
    pub ends: SmallVec<[SymInt; 3]>,
    pub body: Vec<DeviceStmt>,
    pub loc: Loc,
}

/// One top-level device loop: a launch-grid root.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRoot {
    pub inner: DeviceLoop,
}

/// Host-level statement (runs in the launcher, outside the kernel).
#[derive(Debug, Clone, PartialEq)]
pub enum HostStmt {
    /// Allocate an output tensor, optionally zero-filled.
    Alloc { dst: ValueId, shape: SmallVec<[SymInt; 4]>, dtype: DType, zeroed: bool, loc: Loc },
}

/// Kind (and type info) of one value in the table.
#[derive(Debug, Clone)]
pub enum ValueKind {
    /// A tensor living on the host (argument or allocation).
    HostTensor { fake: FakeTensor },
    /// A tile-shaped device value; shape is a list of block dimensions,
    /// empty for scalars.
    DeviceTile { dims: SmallVec<[BlockId; 3]>, dtype: DType },
    /// A scalar known on the host (int argument, size expression).
    HostScalar { value: SymInt },
}

#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub kind: ValueKind,
    /// Debug name (argument name or generated).
    pub name: String,
    pub loc: Loc,
}

impl ValueInfo {
    pub fn device_dims(&self) -> Option<&[BlockId]> {
        match &self.kind {
            ValueKind::DeviceTile { dims, .. } => Some(dims),
            _ => None,
        }
    }

    pub fn dtype(&self) -> Option<DType> {
        match &self.kind {
            ValueKind::HostTensor { fake } => Some(fake.dtype),
            ValueKind::DeviceTile { dtype, .. } => Some(*dtype),
            ValueKind::HostScalar { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Tensor,
    Int,
    /// Compile-time constant: baked into the generated source, part of the
    /// specialization key by value.
    ConstInt,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub value: ValueId,
}

/// The traced program for one bound kernel.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub params: Vec<Param>,
    values: Vec<ValueInfo>,
    pub host: Vec<HostStmt>,
    pub roots: Vec<LoopRoot>,
    pub ret: Option<ValueId>,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Vec::new(), values: Vec::new(), host: Vec::new(), roots: Vec::new(), ret: None }
    }

    pub fn push_value(&mut self, info: ValueInfo) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(info);
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0 as usize]
    }

    pub fn values(&self) -> &[ValueInfo] {
        &self.values
    }

    /// Every block id referenced by a loop, in first-seen order.
    pub fn all_block_ids(&self) -> Vec<BlockId> {
        fn walk(body: &[DeviceStmt], out: &mut Vec<BlockId>) {
            for stmt in body {
                if let DeviceStmt::Loop(l) = stmt {
                    out.extend(l.block_ids.iter().copied());
                    walk(&l.body, out);
                }
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            out.extend(root.inner.block_ids.iter().copied());
            walk(&root.inner.body, &mut out);
        }
        out
    }
}
