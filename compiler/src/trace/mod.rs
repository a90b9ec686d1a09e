//! The tracing frontend: a builder surface the user kernel drives once per
//! specialization, producing a typed [`tessel_ir::Program`].

pub mod ctx;
pub mod deps;

pub use ctx::{
    trace, ArgValue, DeviceScope, Idx, ScalarRef, TensorRef, Tile, TileGroup, TileRef, TraceCtx,
    Traced,
};
