//! Flat tunable-axis view of a [`crate::ConfigSpec`].
//!
//! The evolutionary search operates on a vector of [`AxisValue`]s, one per
//! axis, mutated according to each axis's [`AxisDomain`]. The spec owns the
//! mapping between this flat encoding and the structured [`crate::Config`].

use serde::{Deserialize, Serialize};

/// The legal value set of one tunable axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisDomain {
    /// Powers of two in `[min, max]` (inclusive, both powers of two).
    Pow2 { min: i64, max: i64 },
    /// Any integer in `[min, max]`.
    Int { min: i64, max: i64 },
    Bool,
    /// `None`, `Some(false)`, or `Some(true)`.
    OptBool,
    /// `None` (persistent) or a power of two in `[min, max]`.
    OptPow2 { min: i64, max: i64 },
    /// One of `n` enumerated choices.
    Choice { n: usize },
    /// A permutation of `0..len`.
    Permutation { len: usize },
}

impl AxisDomain {
    /// Whether `value` is a member of this domain.
    pub fn contains(&self, value: &AxisValue) -> bool {
        match (self, value) {
            (Self::Pow2 { min, max }, AxisValue::Int(v)) => v.count_ones() == 1 && v >= min && v <= max,
            (Self::Int { min, max }, AxisValue::Int(v)) => v >= min && v <= max,
            (Self::Bool, AxisValue::Bool(_)) => true,
            (Self::OptBool, AxisValue::OptBool(_)) => true,
            (Self::OptPow2 { .. }, AxisValue::OptInt(None)) => true,
            (Self::OptPow2 { min, max }, AxisValue::OptInt(Some(v))) => {
                v.count_ones() == 1 && v >= min && v <= max
            }
            (Self::Choice { n }, AxisValue::Choice(c)) => c < n,
            (Self::Permutation { len }, AxisValue::Perm(p)) => {
                p.len() == *len && {
                    let mut seen = vec![false; *len];
                    p.iter().all(|&i| i < *len && !std::mem::replace(&mut seen[i], true))
                }
            }
            _ => false,
        }
    }
}

/// One concrete axis value in the flat encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisValue {
    Int(i64),
    OptInt(Option<i64>),
    Bool(bool),
    OptBool(Option<bool>),
    Choice(usize),
    Perm(Vec<usize>),
}

/// One tunable axis: a name (for logs) plus its domain and default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunableAxis {
    pub name: String,
    pub domain: AxisDomain,
    pub default: AxisValue,
}
