//! Symbolic integers and the shape environment that owns them.
//!
//! A [`SymInt`] is either a concrete value or a variable allocated from a
//! [`ShapeEnv`]. Variables carry an integer *hint*: a plausible concrete
//! value recorded at allocation time (e.g. the example argument's actual
//! size). Static questions (`known_equal`, `known_multiple`) are answered
//! best-effort from structure alone; the hint, not a guess, is what drives
//! heuristic defaults when no static answer exists.

use smallvec::SmallVec;

use crate::origin::Origin;

/// Handle to one variable in a [`ShapeEnv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymVar(pub u32);

/// A size that is either concrete or symbolic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymInt {
    Const(i64),
    Sym(SymVar),
}

impl SymInt {
    pub fn is_const(self) -> bool {
        matches!(self, Self::Const(_))
    }

    pub fn as_const(self) -> Option<i64> {
        match self {
            Self::Const(v) => Some(v),
            Self::Sym(_) => None,
        }
    }

    pub fn as_var(self) -> Option<SymVar> {
        match self {
            Self::Const(_) => None,
            Self::Sym(v) => Some(v),
        }
    }
}

impl From<i64> for SymInt {
    fn from(value: i64) -> Self {
        Self::Const(value)
    }
}

impl From<usize> for SymInt {
    fn from(value: usize) -> Self {
        Self::Const(value as i64)
    }
}

/// How a derived variable was built from its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedExpr {
    Sub(SymInt, SymInt),
    Add(SymInt, SymInt),
    Mul(SymInt, SymInt),
}

#[derive(Debug, Clone)]
struct VarInfo {
    name: String,
    hint: i64,
    origin: Origin,
    derived: Option<DerivedExpr>,
}

/// Owns every symbolic variable allocated during one compilation.
#[derive(Debug, Default, Clone)]
pub struct ShapeEnv {
    vars: Vec<VarInfo>,
}

impl ShapeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh variable with a concrete hint.
    pub fn create_var(&mut self, name: impl Into<String>, hint: i64, origin: Origin) -> SymInt {
        let var = SymVar(self.vars.len() as u32);
        self.vars.push(VarInfo { name: name.into(), hint, origin, derived: None });
        SymInt::Sym(var)
    }

    fn create_derived(&mut self, name: String, hint: i64, expr: DerivedExpr) -> SymInt {
        let var = SymVar(self.vars.len() as u32);
        self.vars.push(VarInfo { name, hint, origin: Origin::Derived, derived: Some(expr) });
        SymInt::Sym(var)
    }

    /// Best-effort concrete value: the real value for constants, the
    /// recorded hint otherwise.
    pub fn size_hint(&self, s: SymInt) -> i64 {
        match s {
            SymInt::Const(v) => v,
            SymInt::Sym(var) => self.vars[var.0 as usize].hint,
        }
    }

    /// Refresh the hint of a variable once its true size becomes known.
    pub fn update_hint(&mut self, var: SymVar, hint: i64) {
        self.vars[var.0 as usize].hint = hint;
    }

    pub fn origin(&self, var: SymVar) -> &Origin {
        &self.vars[var.0 as usize].origin
    }

    pub fn var_name(&self, var: SymVar) -> &str {
        &self.vars[var.0 as usize].name
    }

    /// True only when the two sizes are provably equal. A `false` answer
    /// means "unknown", not "unequal".
    pub fn known_equal(&self, a: SymInt, b: SymInt) -> bool {
        match (a, b) {
            (SymInt::Const(x), SymInt::Const(y)) => x == y,
            (SymInt::Sym(x), SymInt::Sym(y)) => {
                if x == y {
                    return true;
                }
                // Structurally identical derivations are equal.
                match (self.vars[x.0 as usize].derived, self.vars[y.0 as usize].derived) {
                    (Some(dx), Some(dy)) => dx == dy,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// True only when `a` is provably a multiple of `b`.
    pub fn known_multiple(&self, a: SymInt, b: i64) -> bool {
        if b == 1 {
            return true;
        }
        match a {
            SymInt::Const(v) => b != 0 && v % b == 0,
            // Symbolic sizes are never provably multiples without guards.
            SymInt::Sym(_) => false,
        }
    }

    pub fn sub(&mut self, a: SymInt, b: SymInt) -> SymInt {
        match (a, b) {
            (SymInt::Const(x), SymInt::Const(y)) => SymInt::Const(x - y),
            (x, SymInt::Const(0)) => x,
            _ => {
                let hint = self.size_hint(a) - self.size_hint(b);
                let name = format!("({} - {})", self.render(a), self.render(b));
                self.create_derived(name, hint, DerivedExpr::Sub(a, b))
            }
        }
    }

    pub fn add(&mut self, a: SymInt, b: SymInt) -> SymInt {
        match (a, b) {
            (SymInt::Const(x), SymInt::Const(y)) => SymInt::Const(x + y),
            (x, SymInt::Const(0)) | (SymInt::Const(0), x) => x,
            _ => {
                let hint = self.size_hint(a) + self.size_hint(b);
                let name = format!("({} + {})", self.render(a), self.render(b));
                self.create_derived(name, hint, DerivedExpr::Add(a, b))
            }
        }
    }

    pub fn mul(&mut self, a: SymInt, b: SymInt) -> SymInt {
        match (a, b) {
            (SymInt::Const(x), SymInt::Const(y)) => SymInt::Const(x * y),
            (x, SymInt::Const(1)) | (SymInt::Const(1), x) => x,
            (_, SymInt::Const(0)) | (SymInt::Const(0), _) => SymInt::Const(0),
            _ => {
                let hint = self.size_hint(a) * self.size_hint(b);
                let name = format!("({} * {})", self.render(a), self.render(b));
                self.create_derived(name, hint, DerivedExpr::Mul(a, b))
            }
        }
    }

    /// Product of sizes, folding constants.
    pub fn prod(&mut self, sizes: &[SymInt]) -> SymInt {
        sizes.iter().copied().fold(SymInt::Const(1), |acc, s| self.mul(acc, s))
    }

    /// Debug rendering using variable names.
    pub fn render(&self, s: SymInt) -> String {
        match s {
            SymInt::Const(v) => v.to_string(),
            SymInt::Sym(var) => self.vars[var.0 as usize].name.clone(),
        }
    }

    /// Render a size as an expression, with `leaf` supplying the spelling of
    /// non-derived variables. Derived variables recurse into their operands.
    pub fn expr_with(
        &self,
        s: SymInt,
        leaf: &dyn Fn(SymVar, &Origin) -> Option<String>,
    ) -> Option<String> {
        match s {
            SymInt::Const(v) => Some(v.to_string()),
            SymInt::Sym(var) => {
                let info = &self.vars[var.0 as usize];
                if let Some(expr) = leaf(var, &info.origin) {
                    return Some(expr);
                }
                let op = |sep: &str, a, b| -> Option<String> {
                    Some(format!(
                        "({} {sep} {})",
                        self.expr_with(a, leaf)?,
                        self.expr_with(b, leaf)?
                    ))
                };
                match info.derived {
                    Some(DerivedExpr::Sub(a, b)) => op("-", a, b),
                    Some(DerivedExpr::Add(a, b)) => op("+", a, b),
                    Some(DerivedExpr::Mul(a, b)) => op("*", a, b),
                    None => None,
                }
            }
        }
    }

    /// Host-side expression for a size, when every leaf has one.
    pub fn host_expr(&self, s: SymInt) -> Option<String> {
        self.expr_with(s, &|_, origin| origin.host_expr())
    }

    /// Resolve a size to a concrete value given per-variable bindings.
    /// Derived variables are evaluated recursively.
    pub fn evaluate(&self, s: SymInt, bindings: &dyn Fn(SymVar) -> Option<i64>) -> Option<i64> {
        match s {
            SymInt::Const(v) => Some(v),
            SymInt::Sym(var) => {
                if let Some(v) = bindings(var) {
                    return Some(v);
                }
                match self.vars[var.0 as usize].derived {
                    Some(DerivedExpr::Sub(a, b)) => {
                        Some(self.evaluate(a, bindings)? - self.evaluate(b, bindings)?)
                    }
                    Some(DerivedExpr::Add(a, b)) => {
                        Some(self.evaluate(a, bindings)? + self.evaluate(b, bindings)?)
                    }
                    Some(DerivedExpr::Mul(a, b)) => {
                        Some(self.evaluate(a, bindings)? * self.evaluate(b, bindings)?)
                    }
                    None => None,
                }
            }
        }
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }
}

/// Key form of a shape for observation counters: stable across clones of the
/// same environment.
pub type ShapeKey = SmallVec<[SymInt; 4]>;

/// Round up to the next power of two, saturating at 2^62.
pub fn next_power_of_two(n: i64) -> i64 {
    if n <= 1 {
        return 1;
    }
    1i64 << (64 - (n - 1).leading_zeros()).min(62)
}

/// `ceil(a / b)` for positive `b`.
pub fn ceil_div(a: i64, b: i64) -> i64 {
    debug_assert!(b > 0);
    (a + b - 1).div_euclid(b)
}
