//! Intermediate representation for the tessel kernel compiler.
//!
//! This crate defines the data the rest of the pipeline operates on:
//!
//! - [`sym`] - symbolic integers and the shape environment that owns them
//! - [`dtype`] - scalar element types
//! - [`tensor`] - minimal dense host tensors (example kernels, reference checks)
//! - [`fake`] - shape-only tensors used during tracing
//! - [`program`] - the typed program built by the tracer and consumed by codegen
//! - [`origin`] - provenance for symbols and values
//! - [`error`] - error types and result handling

pub mod dtype;
pub mod error;
pub mod fake;
pub mod origin;
pub mod program;
pub mod sym;
pub mod tensor;

#[cfg(test)]
mod test;

pub use dtype::DType;
pub use error::{Error, Result};
pub use fake::FakeTensor;
pub use origin::{Loc, Origin, here};
pub use program::{
    BinaryOp, BlockId, DeviceExpr, DeviceLoop, DeviceStmt, HostStmt, Index, LoopKind, LoopRoot, Param, ParamKind,
    Program, ReduceOp, UnaryOp, ValueId, ValueInfo, ValueKind,
};
pub use sym::{ShapeEnv, SymInt, SymVar};
pub use tensor::{Device, Tensor, TensorData};
