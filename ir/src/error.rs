use snafu::Snafu;

use crate::dtype::DType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Shapes do not line up for an operation.
    #[snafu(display("shape mismatch between {lhs} and {rhs}"))]
    ShapeMismatch { lhs: String, rhs: String },

    /// No common element type for a binary operation.
    #[snafu(display("dtype mismatch: no common type for {lhs} and {rhs}"))]
    DTypeMismatch { lhs: DType, rhs: DType },

    /// Tensor constructed with the wrong number of elements.
    #[snafu(display("data length mismatch: shape wants {expected} elements, got {actual}"))]
    DataLengthMismatch { expected: usize, actual: usize },

    /// Linear index past the end of a tensor's storage.
    #[snafu(display("index {index} out of bounds for tensor with {numel} elements"))]
    IndexOutOfBounds { index: usize, numel: usize },
}
