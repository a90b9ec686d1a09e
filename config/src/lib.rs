//! Configuration space for tessel kernels.
//!
//! A [`ConfigSpec`] is the declarative catalog of every tunable axis
//! discovered while tracing a program; a [`Config`] is one concrete
//! assignment to every axis, sufficient to deterministically generate one
//! kernel variant. The spec owns normalization, defaults, and the flat
//! axis view the autotuner searches over.

pub mod axis;
pub mod config;
pub mod error;
pub mod spec;

#[cfg(test)]
mod test;

pub use axis::{AxisDomain, AxisValue, TunableAxis};
pub use config::{Config, IndexingStrategy, PidType};
pub use error::{Error, Result};
pub use spec::{
    BlockSizeSpec, ConfigSpec, FlattenLoopSpec, L2GroupingSpec, LoopOrderSpec, RangeSpec,
    ReductionLoopSpec, DEFAULT_STATIC_RANGE_LIMIT,
};
