//! Trace, autotune, and time the built-in demo kernels on the reference
//! backend, printing a small latency table.

use std::sync::Arc;
use std::time::Instant;

use tessel_autotune::EvolutionSettings;
use tessel_ir::Tensor;
use tessel_runtime::{demos, Error, Kernel, KernelBackend, RunArg, Settings, SimBackend};

fn settings() -> Settings {
    // A small fixed-seed search keeps the run quick and reproducible.
    Settings::builder()
        .autotune(EvolutionSettings::builder().population_size(8).generations(4).seed(0).build())
        .build()
}

fn ramp(shape: &[usize], scale: f32) -> Tensor {
    let numel = shape.iter().product();
    let data = (0..numel).map(|i| (i % 1013) as f32 * scale).collect();
    Tensor::from_f32(shape, data).unwrap_or_else(|_| unreachable!("shape matches data"))
}

fn bench(kernel: &Kernel, args: &[RunArg<'_>]) -> Result<(), Error> {
    let bound = kernel.bind(args)?;
    bound.call(args)?;
    let start = Instant::now();
    let runs = 10;
    for _ in 0..runs {
        bound.call(args)?;
    }
    let latency = start.elapsed() / runs;
    let config = bound.config().map(|c| c.summary()).unwrap_or_default();
    println!("{:<12} {:>12?}  {config}", kernel.name(), latency);
    Ok(())
}

#[snafu::report]
fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let backend: Arc<dyn KernelBackend> = Arc::new(SimBackend);
    println!("{:<12} {:>12}  config", "kernel", "latency");

    let x = ramp(&[4096], 0.5);
    let y = ramp(&[4096], 0.25);
    bench(&demos::vec_add(Arc::clone(&backend), settings()), &[
        RunArg::Tensor(&x),
        RunArg::Tensor(&y),
    ])?;

    let a = ramp(&[96, 64], 0.01);
    let b = ramp(&[64, 80], 0.02);
    bench(&demos::matmul(Arc::clone(&backend), settings()), &[
        RunArg::Tensor(&a),
        RunArg::Tensor(&b),
    ])?;

    let m = ramp(&[128, 500], 0.1);
    bench(&demos::row_sum(Arc::clone(&backend), settings()), &[RunArg::Tensor(&m)])?;

    let table = ramp(&[64, 32], 0.1);
    let numel = 200;
    let idx = Tensor::from_i64(&[numel], (0..numel as i64).map(|i| i * 7 % 64).collect())
        .unwrap_or_else(|_| unreachable!("shape matches data"));
    bench(&demos::gather_rows(Arc::clone(&backend), settings()), &[
        RunArg::Tensor(&table),
        RunArg::Tensor(&idx),
    ])?;

    Ok(())
}
