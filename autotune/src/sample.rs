//! Per-domain sampling and recombination of axis values.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tessel_config::{AxisDomain, AxisValue};

fn log2(v: i64) -> i64 {
    (63 - (v.max(1) as u64).leading_zeros()) as i64
}

/// Draw a uniformly random member of `domain`.
pub(crate) fn random_value(rng: &mut StdRng, domain: &AxisDomain) -> AxisValue {
    match domain {
        AxisDomain::Pow2 { min, max } => {
            AxisValue::Int(1 << rng.random_range(log2(*min)..=log2(*max)))
        }
        AxisDomain::Int { min, max } => AxisValue::Int(rng.random_range(*min..=*max)),
        AxisDomain::Bool => AxisValue::Bool(rng.random_bool(0.5)),
        AxisDomain::OptBool => {
            AxisValue::OptBool([None, Some(false), Some(true)][rng.random_range(0..3)])
        }
        AxisDomain::OptPow2 { min, max } => {
            if rng.random_bool(0.5) {
                AxisValue::OptInt(None)
            } else {
                AxisValue::OptInt(Some(1 << rng.random_range(log2(*min)..=log2(*max))))
            }
        }
        AxisDomain::Choice { n } => AxisValue::Choice(rng.random_range(0..*n)),
        AxisDomain::Permutation { len } => {
            let mut p: Vec<usize> = (0..*len).collect();
            p.shuffle(rng);
            AxisValue::Perm(p)
        }
    }
}

/// Differential donor from three population members. Numeric axes take the
/// classic `a + (b - c)` step, in exponent space for power-of-two axes.
/// Categorical axes reassort by picking one of the three parents.
pub(crate) fn donor_value(
    rng: &mut StdRng,
    domain: &AxisDomain,
    a: &AxisValue,
    b: &AxisValue,
    c: &AxisValue,
) -> AxisValue {
    match (domain, a, b, c) {
        (AxisDomain::Pow2 { min, max }, AxisValue::Int(a), AxisValue::Int(b), AxisValue::Int(c)) => {
            let exp = (log2(*a) + log2(*b) - log2(*c)).clamp(log2(*min), log2(*max));
            AxisValue::Int(1 << exp)
        }
        (AxisDomain::Int { min, max }, AxisValue::Int(a), AxisValue::Int(b), AxisValue::Int(c)) => {
            AxisValue::Int((a + b - c).clamp(*min, *max))
        }
        _ => match rng.random_range(0..3u8) {
            0 => a.clone(),
            1 => b.clone(),
            _ => c.clone(),
        },
    }
}
