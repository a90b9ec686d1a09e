//! Kernel runtime: binding, specialization, config resolution, caching, and
//! the reference executor.
//!
//! A [`Kernel`] wraps a trace closure plus [`Settings`]; each distinct
//! argument specialization gets a [`BoundKernel`] whose first execution
//! resolves a config (explicit, finite search, default, or evolutionary
//! autotune) and compiles it through a process-wide cache. The bundled
//! [`SimBackend`] interprets programs on host tensors, sharing the exact
//! pid-mapping arithmetic with the code generator.

pub mod backend;
pub mod benchmark;
pub mod demos;
pub mod error;
pub mod kernel;
pub mod kernel_cache;
pub mod settings;
pub mod sim;

#[cfg(test)]
mod test;

pub use backend::{CompiledKernel, KernelBackend, RunArg};
pub use benchmark::{benchmark, BenchmarkConfig, BenchmarkResult};
pub use error::{Error, Result};
pub use kernel::{BoundKernel, Kernel};
pub use settings::Settings;
pub use sim::SimBackend;
