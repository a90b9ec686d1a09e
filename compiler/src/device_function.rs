//! Emission state for one generated kernel: source buffering, parameter
//! collection, and tile-variable bookkeeping.

use std::collections::HashMap;

use itertools::Itertools;
use tessel_config::Config;
use tessel_ir::origin::Origin;
use tessel_ir::program::{BlockId, Param, ParamKind, Program, ValueId, ValueKind};
use tessel_ir::sym::{ShapeEnv, SymInt, SymVar};

/// Indented line-oriented source buffer.
pub struct SourceWriter {
    buf: String,
    indent: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self { buf: String::new(), indent: 0 }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text.as_ref());
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        debug_assert!(self.indent > 0);
        self.indent -= 1;
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for SourceWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Write for SourceWriter {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.buf.write_str(s)
    }
}

/// One kernel parameter: its spelling inside the kernel and the host
/// expression the launcher passes for it.
#[derive(Debug, Clone)]
pub struct KernelParam {
    pub kernel_name: String,
    pub host_expr: String,
    pub constexpr: bool,
}

/// Spelling of a symbolic size inside the kernel, where tensor sizes arrive
/// as flat parameters rather than attribute accesses.
pub fn kernel_leaf(_var: SymVar, origin: &Origin) -> Option<String> {
    match origin {
        Origin::Argument { name } => Some(name.clone()),
        Origin::TensorSize { arg, dim } => Some(format!("{arg}_size_{dim}")),
        Origin::BlockSize { block_id } => Some(format!("_BLOCK_SIZE_{block_id}")),
        Origin::Derived | Origin::Internal => None,
    }
}

pub fn kernel_expr(shape: &ShapeEnv, s: SymInt) -> Option<String> {
    shape.expr_with(s, &kernel_leaf)
}

/// Collects the deduplicated kernel parameter list for one program: tensor
/// pointers, symbolic sizes, strides, int arguments, and block-size
/// constexprs, in that order.
pub struct ParamTable {
    params: Vec<KernelParam>,
    seen: HashMap<String, usize>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self { params: Vec::new(), seen: HashMap::new() }
    }

    pub fn add(&mut self, kernel_name: impl Into<String>, host_expr: impl Into<String>, constexpr: bool) {
        let kernel_name = kernel_name.into();
        if self.seen.contains_key(&kernel_name) {
            return;
        }
        self.seen.insert(kernel_name.clone(), self.params.len());
        self.params.push(KernelParam { kernel_name, host_expr: host_expr.into(), constexpr });
    }

    pub fn params(&self) -> &[KernelParam] {
        &self.params
    }

    /// The kernel's formal parameter list.
    pub fn signature(&self) -> String {
        self.params
            .iter()
            .map(|p| {
                if p.constexpr {
                    format!("{}: tl.constexpr", p.kernel_name)
                } else {
                    p.kernel_name.clone()
                }
            })
            .join(", ")
    }

    /// The actual arguments the launcher passes, same order.
    pub fn call_args(&self) -> String {
        self.params.iter().map(|p| p.host_expr.as_str()).join(", ")
    }
}

impl Default for ParamTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the parameter table for a program under one configuration.
///
/// Block-size constexprs come last so their values (which vary per config)
/// never perturb the stable prefix of the signature. The launcher assigns
/// each `_BLOCK_SIZE_*` to a local of the same name before the call.
pub fn collect_params(
    program: &Program,
    shape: &ShapeEnv,
    block_sizes: &[BlockId],
) -> ParamTable {
    let mut table = ParamTable::new();
    let tensors: Vec<(ValueId, String)> = program
        .values()
        .iter()
        .enumerate()
        .filter(|(_, info)| matches!(info.kind, ValueKind::HostTensor { .. }))
        .map(|(i, info)| (ValueId(i as u32), info.name.clone()))
        .collect();

    for (_, name) in &tensors {
        table.add(name.clone(), name.clone(), false);
    }
    for (id, name) in &tensors {
        if let ValueKind::HostTensor { fake } = &program.value(*id).kind {
            for &size in &fake.shape {
                if let SymInt::Sym(var) = size {
                    if let Some(kernel) = kernel_leaf(var, shape.origin(var)) {
                        let host = shape.host_expr(size).unwrap_or_else(|| kernel.clone());
                        table.add(kernel, host, false);
                    }
                }
            }
            for dim in 0..fake.shape.len() {
                table.add(format!("{name}_stride_{dim}"), format!("{name}.stride({dim})"), false);
            }
        }
    }
    for Param { name, kind, .. } in &program.params {
        match kind {
            ParamKind::Int => table.add(name.clone(), name.clone(), false),
            ParamKind::ConstInt => table.add(name.clone(), name.clone(), true),
            ParamKind::Tensor => {}
        }
    }
    for &block_id in block_sizes {
        let name = format!("_BLOCK_SIZE_{}", block_id.0);
        table.add(name.clone(), name, true);
    }
    table
}

/// Broadcast subscript for axis `pos` of an `ndim`-dimensional tile:
/// `[None, :, None]` style.
pub fn broadcast_suffix(pos: usize, ndim: usize) -> String {
    if ndim <= 1 {
        return String::new();
    }
    let parts = (0..ndim).map(|i| if i == pos { ":" } else { "None" }).join(", ");
    format!("[{parts}]")
}

/// `tl.range` keyword arguments for nested loop `range_idx` under `config`.
pub fn range_kwargs(config: &Config, range_idx: usize) -> String {
    let mut kwargs = Vec::new();
    if let Some(&unroll) = config.range_unroll_factors.get(range_idx) {
        if unroll > 1 {
            kwargs.push(format!("loop_unroll_factor={unroll}"));
        }
    }
    if let Some(&stages) = config.range_num_stages.get(range_idx) {
        if stages > 0 {
            kwargs.push(format!("num_stages={stages}"));
        }
    }
    if let Some(Some(ws)) = config.range_warp_specialize.get(range_idx) {
        kwargs.push(format!("warp_specialize={}", python_bool(*ws)));
    }
    if let Some(Some(mb)) = config.range_multi_buffers.get(range_idx) {
        kwargs.push(format!("disallow_acc_multi_buffer={}", python_bool(!*mb)));
    }
    if kwargs.is_empty() {
        String::new()
    } else {
        format!(", {}", kwargs.join(", "))
    }
}

pub fn python_bool(v: bool) -> &'static str {
    if v {
        "True"
    } else {
        "False"
    }
}
