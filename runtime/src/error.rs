use std::time::Duration;

use snafu::Snafu;
use tessel_ir::Device;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between binding a kernel and reading its
/// result back.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("trace failed: {source}"))]
    Trace { source: tessel_compiler::Error },

    #[snafu(display("compilation failed: {source}"))]
    Compile { source: tessel_compiler::Error },

    #[snafu(display("config error: {source}"))]
    Config { source: tessel_config::Error },

    #[snafu(display("autotune failed: {source}"))]
    Autotune { source: tessel_autotune::Error },

    #[snafu(display("tensor error: {source}"))]
    Tensor { source: tessel_ir::Error },

    /// The reference backend only executes host tensors.
    #[snafu(display("argument `{name}` lives on {device}, which this backend cannot execute"))]
    UnsupportedDevice { name: String, device: Device },

    #[snafu(display("kernel takes {expected} arguments, got {got}"))]
    ArgumentCount { expected: usize, got: usize },

    #[snafu(display("argument `{name}`: {reason}"))]
    ArgumentMismatch { name: String, reason: String },

    /// A specializing dimension was bound to a different size than the one
    /// the kernel was traced with.
    #[snafu(display("argument `{name}` dimension {dim}: kernel specialized on {expected}, got {got}"))]
    ShapeMismatch { name: String, dim: usize, expected: i64, got: usize },

    #[snafu(display("gather index {index} out of bounds for axis of extent {extent} of `{tensor}`"))]
    GatherIndexOutOfBounds { index: i64, extent: i64, tensor: String },

    #[snafu(display("access to `{tensor}` at index {index} exceeds axis extent {extent}"))]
    AccessOutOfBounds { tensor: String, index: i64, extent: i64 },

    /// A symbolic size could not be resolved from the bound arguments.
    #[snafu(display("size `{name}` has no binding for this call"))]
    UnboundSize { name: String },

    #[snafu(display("kernel `{name}` never marked a return tensor"))]
    MissingReturn { name: String },

    /// A benchmark candidate ran past its time budget; the autotuner treats
    /// it as a failed config rather than waiting it out.
    #[snafu(display("benchmark exceeded its {limit:?} budget"))]
    BenchmarkTimeout { limit: Duration },
}
