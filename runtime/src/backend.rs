//! The JIT backend seam.
//!
//! The runtime is generic over how a `(program, config)` pair becomes
//! something executable. The reference implementation is [`crate::sim`];
//! a GPU-backed implementation would compile the generated kernel text
//! instead of interpreting the program.

use std::sync::Arc;

use tessel_compiler::Traced;
use tessel_config::Config;
use tessel_ir::Tensor;

use crate::error::Result;

/// One concrete argument at call time.
#[derive(Debug, Clone, Copy)]
pub enum RunArg<'a> {
    Tensor(&'a Tensor),
    Int(i64),
}

/// A compiled kernel variant, ready to execute.
pub trait CompiledKernel: Send + Sync {
    /// Execute against the bound arguments and return the result tensor.
    /// Input tensors are never mutated.
    fn execute(&self, args: &[RunArg<'_>]) -> Result<Tensor>;

    /// The generated kernel module text.
    fn source(&self) -> &str;

    /// The (normalized) config this variant was compiled under.
    fn config(&self) -> &Config;
}

pub trait KernelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether hardware tensor descriptors are available.
    fn supports_tensor_descriptors(&self) -> bool {
        false
    }

    fn compile(&self, traced: &Arc<Traced>, config: &Config) -> Result<Arc<dyn CompiledKernel>>;
}
