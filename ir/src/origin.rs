//! Provenance for symbols and values.
//!
//! Every symbol allocated during tracing records where it came from, so that
//! diagnostics can name the offending argument instead of an internal id and
//! so the code generator can render host-side expressions for symbolic sizes.

use std::fmt;

/// Source location of user code, captured via `#[track_caller]` on the
/// tracer surface. Kept on every user-facing error so diagnostics stay
/// debuggable despite the rewriting indirection.
pub type Loc = &'static std::panic::Location<'static>;

/// Capture the caller's location.
#[track_caller]
pub fn here() -> Loc {
    std::panic::Location::caller()
}

/// Where a symbol or value came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A kernel argument, by parameter name.
    Argument { name: String },
    /// One dimension of a tensor argument's shape.
    TensorSize { arg: String, dim: usize },
    /// A tunable block size.
    BlockSize { block_id: usize },
    /// Derived from other symbols (e.g. `end - begin`).
    Derived,
    /// Allocated internally by the compiler.
    Internal,
}

impl Origin {
    /// Host-side expression that evaluates to this symbol in the generated
    /// launcher, when one exists.
    pub fn host_expr(&self) -> Option<String> {
        match self {
            Self::Argument { name } => Some(name.clone()),
            Self::TensorSize { arg, dim } => Some(format!("{arg}.size({dim})")),
            Self::BlockSize { block_id } => Some(format!("_BLOCK_SIZE_{block_id}")),
            Self::Derived | Self::Internal => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument { name } => write!(f, "argument `{name}`"),
            Self::TensorSize { arg, dim } => write!(f, "size {dim} of argument `{arg}`"),
            Self::BlockSize { block_id } => write!(f, "block size {block_id}"),
            Self::Derived => write!(f, "derived expression"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
