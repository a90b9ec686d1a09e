//! Scalar element types.

use std::fmt;

/// Element type of a tensor or device value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    F32,
    F16,
    BF16,
    I32,
    I64,
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F16 | Self::BF16 => 2,
            Self::I64 => 8,
            Self::Bool => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F16 | Self::BF16)
    }

    pub fn is_int(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    /// Name of this type in the generated kernel dialect.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::F32 => "tl.float32",
            Self::F16 => "tl.float16",
            Self::BF16 => "tl.bfloat16",
            Self::I32 => "tl.int32",
            Self::I64 => "tl.int64",
            Self::Bool => "tl.int1",
        }
    }

    /// Common type for a binary op between `self` and `other`, if any.
    pub fn promote(self, other: DType) -> Option<DType> {
        if self == other {
            return Some(self);
        }
        match (self, other) {
            (a, b) if a.is_float() && b.is_float() => Some(a.max(b).widest_float()),
            (a, b) if a.is_float() && b.is_int() => Some(a),
            (a, b) if a.is_int() && b.is_float() => Some(b),
            (Self::I32, Self::I64) | (Self::I64, Self::I32) => Some(Self::I64),
            (Self::Bool, b) => Some(b),
            (a, Self::Bool) => Some(a),
            _ => None,
        }
    }

    fn widest_float(self) -> DType {
        // F16/BF16 binary ops accumulate in f32.
        match self {
            Self::F16 | Self::BF16 => Self::F32,
            other => other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Bool => "bool",
        };
        write!(f, "{name}")
    }
}
