//! Specialization keys, binding, and the compile cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessel_compiler::{Idx, TraceCtx, Traced};
use tessel_config::Config;
use tessel_ir::{DType, Device};

use crate::backend::{CompiledKernel, KernelBackend, RunArg};
use crate::demos;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::settings::Settings;
use crate::sim::SimBackend;
use crate::test::{assert_close, default_config_settings, naive_add, ramp, sim};

/// Delegates to the reference backend, counting compiles.
#[derive(Debug, Default)]
struct CountingBackend {
    inner: SimBackend,
    compiles: AtomicUsize,
}

impl KernelBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting-sim"
    }

    fn compile(&self, traced: &Arc<Traced>, config: &Config) -> Result<Arc<dyn CompiledKernel>> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(traced, config)
    }
}

#[test]
fn shapes_bucket_into_one_specialization_above_one() {
    let kernel = demos::vec_add(sim(), default_config_settings());
    let (a, b) = (ramp(&[512], 1.0), ramp(&[512], 2.0));
    kernel.call(&[RunArg::Tensor(&a), RunArg::Tensor(&b)]).unwrap();
    assert_eq!(kernel.bound_count(), 1);

    let (c, d) = (ramp(&[300], 1.0), ramp(&[300], 2.0));
    kernel.call(&[RunArg::Tensor(&c), RunArg::Tensor(&d)]).unwrap();
    assert_eq!(kernel.bound_count(), 1);

    // Size 1 changes broadcasting semantics, so it gets its own bound.
    let (e, f) = (ramp(&[1], 1.0), ramp(&[1], 2.0));
    kernel.call(&[RunArg::Tensor(&e), RunArg::Tensor(&f)]).unwrap();
    assert_eq!(kernel.bound_count(), 2);
}

#[test]
fn static_shapes_specialize_on_exact_sizes() {
    let settings = Settings::builder().static_shapes(true).use_default_config(true).build();
    let kernel = demos::vec_add(sim(), settings);
    let (a, b) = (ramp(&[512], 1.0), ramp(&[512], 2.0));
    let (c, d) = (ramp(&[300], 1.0), ramp(&[300], 2.0));
    kernel.call(&[RunArg::Tensor(&a), RunArg::Tensor(&b)]).unwrap();
    kernel.call(&[RunArg::Tensor(&c), RunArg::Tensor(&d)]).unwrap();
    assert_eq!(kernel.bound_count(), 2);
}

#[test]
fn reset_drops_every_specialization() {
    let kernel = demos::vec_add(sim(), default_config_settings());
    let (a, b) = (ramp(&[128], 1.0), ramp(&[128], 2.0));
    kernel.call(&[RunArg::Tensor(&a), RunArg::Tensor(&b)]).unwrap();
    assert_eq!(kernel.bound_count(), 1);
    kernel.reset();
    assert_eq!(kernel.bound_count(), 0);
    kernel.call(&[RunArg::Tensor(&a), RunArg::Tensor(&b)]).unwrap();
    assert_eq!(kernel.bound_count(), 1);
}

#[test]
fn repeated_calls_compile_once() {
    let backend = Arc::new(CountingBackend::default());
    let kernel =
        demos::vec_add(Arc::clone(&backend) as Arc<dyn KernelBackend>, default_config_settings());
    let (a, b) = (ramp(&[256], 1.0), ramp(&[256], 2.0));
    for _ in 0..3 {
        let out = kernel.call(&[RunArg::Tensor(&a), RunArg::Tensor(&b)]).unwrap();
        assert_close(&out, &naive_add(&a, &b));
    }
    assert_eq!(backend.compiles.load(Ordering::SeqCst), 1);
}

#[test]
fn explicit_config_is_used_verbatim() {
    let kernel = demos::vec_add(sim(), Settings::default())
        .with_configs(vec![Config::with_block_sizes(vec![32])]);
    let (a, b) = (ramp(&[256], 1.0), ramp(&[256], 2.0));
    let args = [RunArg::Tensor(&a), RunArg::Tensor(&b)];
    kernel.call(&args).unwrap();
    let bound = kernel.bind(&args).unwrap();
    assert_eq!(bound.config().unwrap().block_sizes, vec![32]);
}

#[test]
fn finite_search_settles_on_one_of_the_candidates() {
    let kernel = demos::vec_add(sim(), Settings::default()).with_configs(vec![
        Config::with_block_sizes(vec![32]),
        Config::with_block_sizes(vec![256]),
    ]);
    let (a, b) = (ramp(&[1000], 1.0), ramp(&[1000], 2.0));
    let args = [RunArg::Tensor(&a), RunArg::Tensor(&b)];
    let out = kernel.call(&args).unwrap();
    assert_close(&out, &naive_add(&a, &b));
    let bound = kernel.bind(&args).unwrap();
    let chosen = bound.config().unwrap().block_sizes[0];
    assert!(chosen == 32 || chosen == 256, "unexpected block size {chosen}");
}

fn iota(ctx: &mut TraceCtx) -> tessel_compiler::Result<()> {
    let n = ctx.int_arg("n")?;
    let n = ctx.scalar_value(n);
    let out = ctx.empty(&[n], DType::I32, Device::Cpu)?;
    ctx.ret(out);
    let grid = ctx.tile(&[n]);
    ctx.for_each(grid, |s, t| {
        let i = s.tile_index(t[0]);
        s.store(out, &[Idx::Tile(t[0])], i)
    })
}

#[test]
fn runtime_ints_share_one_specialization() {
    let kernel = Kernel::new("iota", sim(), default_config_settings(), iota);
    let out = kernel.call(&[RunArg::Int(100)]).unwrap();
    assert_eq!(out.numel(), 100);
    let out = kernel.call(&[RunArg::Int(200)]).unwrap();
    assert_eq!(out.numel(), 200);
    for i in 0..200 {
        assert_eq!(out.get(i).unwrap(), i as f64);
    }
    assert_eq!(kernel.bound_count(), 1);
}

fn copy_with_const_block(ctx: &mut TraceCtx) -> tessel_compiler::Result<()> {
    let x = ctx.tensor_arg("x")?;
    let bs = ctx.const_int_arg("bs")?;
    let out = ctx.empty_like(x)?;
    ctx.ret(out);
    let n = ctx.size(x, 0);
    let grid = ctx.fixed_tile(n, bs);
    ctx.for_each(grid, |s, t| {
        let v = s.load(x, &[Idx::Tile(t[0])])?;
        s.store(out, &[Idx::Tile(t[0])], v)
    })
}

#[test]
fn const_ints_specialize_by_value() {
    let kernel =
        Kernel::new("copy_with_const_block", sim(), default_config_settings(), copy_with_const_block);
    let x = ramp(&[200], 1.0);
    let out = kernel.call(&[RunArg::Tensor(&x), RunArg::Int(32)]).unwrap();
    assert_close(&out, &x);
    assert_eq!(kernel.bound_count(), 1);

    kernel.call(&[RunArg::Tensor(&x), RunArg::Int(64)]).unwrap();
    assert_eq!(kernel.bound_count(), 2);

    // Same constant again: no new specialization.
    kernel.call(&[RunArg::Tensor(&x), RunArg::Int(32)]).unwrap();
    assert_eq!(kernel.bound_count(), 2);
}

#[test]
fn resolved_source_is_exposed() {
    let kernel = demos::vec_add(sim(), default_config_settings());
    let (a, b) = (ramp(&[64], 1.0), ramp(&[64], 2.0));
    let args = [RunArg::Tensor(&a), RunArg::Tensor(&b)];
    kernel.call(&args).unwrap();
    let bound = kernel.bind(&args).unwrap();
    let source = bound.source().unwrap();
    assert!(source.contains("def vec_add"), "{source}");
    assert!(source.contains("triton"), "{source}");
}

#[test]
fn tensor_bound_to_int_parameter_is_rejected() {
    let kernel = Kernel::new("iota", sim(), default_config_settings(), iota);
    let x = ramp(&[8], 1.0);
    let err = kernel.call(&[RunArg::Tensor(&x)]).unwrap_err();
    assert!(err.to_string().contains("declared as int"), "{err}");
}
