//! Tracing frontend and kernel code generation.
//!
//! A kernel body traced once (see [`trace`]) yields a typed program and a
//! configuration space. [`generate`] then lowers the program under any
//! configuration from that space into a self-contained kernel module.

pub mod device_function;
pub mod env;
pub mod error;
pub mod generate;
pub mod program_id;
pub mod tile_strategy;
pub mod trace;

#[cfg(test)]
mod test;

pub use env::{BlockSizeInfo, BlockSizeSource, Environment, TraceSettings, Warning, WarningKind};
pub use error::{Error, Result};
pub use generate::{generate, KernelSource};
pub use program_id::ProgramIds;
pub use tile_strategy::{
    compose_pid, decompose_pid, l2_swizzle, plan_root, resolve_block_size, DimPlan, RootPlan,
};
pub use trace::{
    trace, ArgValue, DeviceScope, Idx, ScalarRef, TensorRef, Tile, TileGroup, TileRef, TraceCtx,
    Traced,
};
