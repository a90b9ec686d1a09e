//! Kernel binding and per-specialization config resolution.
//!
//! A [`Kernel`] holds immutable policy: the trace closure, settings, an
//! optional explicit config list, and the backend. Calling it routes through
//! a [`BoundKernel`] per specialization key; the first call on a fresh key
//! traces the body, and the first execution resolves a config (explicitly,
//! by search, or by default) and compiles through the process-wide cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use smallvec::SmallVec;
use snafu::ResultExt;

use tessel_autotune::{BenchResult, DifferentialEvolutionSearch, FiniteSearch, TuneReport};
use tessel_compiler::{trace, ArgValue, TraceCtx, Traced};
use tessel_config::{Config, ConfigSpec, IndexingStrategy};
use tessel_ir::program::ParamKind;
use tessel_ir::{DType, Device, Tensor};

use crate::backend::{CompiledKernel, KernelBackend, RunArg};
use crate::benchmark::benchmark;
use crate::error::{self, Result};
use crate::kernel_cache;
use crate::settings::Settings;

/// One component of a specialization key.
///
/// Tensor shapes bucket each dimension into 0, 1, or "2 or more": sizes 0
/// and 1 change broadcasting and emptiness, every larger size shares one
/// symbolic kernel. Under `static_shapes` the exact size is the key.
/// Constexpr int arguments key by value; runtime ints stay opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ArgKey {
    Tensor { dtype: DType, device: Device, dims: SmallVec<[usize; 4]> },
    Int(i64),
    OpaqueInt,
}

type SpecKey = Vec<ArgKey>;

type KernelBody = dyn Fn(&mut TraceCtx) -> tessel_compiler::Result<()> + Send + Sync;

struct BindState {
    /// Parameter kinds learned from the first trace; before that, int
    /// arguments key by value (conservative, only ever over-specializes
    /// the very first lookup).
    kinds: Option<Vec<ParamKind>>,
    map: HashMap<SpecKey, Arc<BoundKernel>>,
}

pub struct Kernel {
    name: String,
    body: Arc<KernelBody>,
    settings: Settings,
    configs: Vec<Config>,
    backend: Arc<dyn KernelBackend>,
    bound: Mutex<BindState>,
}

impl Kernel {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn KernelBackend>,
        settings: Settings,
        body: impl Fn(&mut TraceCtx) -> tessel_compiler::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(body),
            settings,
            configs: Vec::new(),
            backend,
            bound: Mutex::new(BindState { kinds: None, map: HashMap::new() }),
        }
    }

    /// Restrict the kernel to an explicit config list: one config skips the
    /// search entirely, several are raced with [`FiniteSearch`].
    pub fn with_configs(mut self, configs: impl Into<Vec<Config>>) -> Self {
        self.configs = configs.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trace (if needed) and return the bound kernel for these arguments.
    pub fn bind(&self, args: &[RunArg<'_>]) -> Result<Arc<BoundKernel>> {
        let mut state = self.bound.lock();
        let key = self.spec_key(args, state.kinds.as_deref());
        if let Some(bound) = state.map.get(&key) {
            return Ok(Arc::clone(bound));
        }

        let traced = self.trace(args)?;
        if state.kinds.is_none() {
            state.kinds = Some(traced.program.params.iter().map(|p| p.kind).collect());
        }
        // Recompute under the learned kinds: the canonical key may collapse
        // onto an existing entry when a runtime int differed by value only.
        let key = self.spec_key(args, state.kinds.as_deref());
        let bound = state.map.entry(key).or_insert_with(|| {
            tracing::debug!(kernel = %self.name, "bound new specialization");
            Arc::new(BoundKernel::new(
                Arc::new(traced),
                self.settings.clone(),
                self.configs.clone(),
                Arc::clone(&self.backend),
            ))
        });
        Ok(Arc::clone(bound))
    }

    /// Bind and execute.
    pub fn call(&self, args: &[RunArg<'_>]) -> Result<Tensor> {
        self.bind(args)?.call(args)
    }

    /// Drop every bound kernel; the next call re-traces and re-resolves.
    pub fn reset(&self) {
        let mut state = self.bound.lock();
        state.map.clear();
        state.kinds = None;
    }

    /// Number of live specializations.
    pub fn bound_count(&self) -> usize {
        self.bound.lock().map.len()
    }

    fn trace(&self, args: &[RunArg<'_>]) -> Result<Traced> {
        let arg_values: Vec<ArgValue> = args
            .iter()
            .map(|arg| match arg {
                RunArg::Tensor(t) => ArgValue::Tensor {
                    shape: t.shape().to_vec(),
                    dtype: t.dtype(),
                    device: t.device(),
                },
                RunArg::Int(v) => ArgValue::Int(*v),
            })
            .collect();
        let body = Arc::clone(&self.body);
        trace(self.name.clone(), self.settings.trace_settings(), arg_values, move |ctx| body(ctx))
            .context(error::TraceSnafu)
    }

    fn spec_key(&self, args: &[RunArg<'_>], kinds: Option<&[ParamKind]>) -> SpecKey {
        args.iter()
            .enumerate()
            .map(|(i, arg)| match arg {
                RunArg::Tensor(t) => {
                    let dims = t
                        .shape()
                        .iter()
                        .map(|&s| if self.settings.static_shapes { s } else { s.min(2) })
                        .collect();
                    ArgKey::Tensor { dtype: t.dtype(), device: t.device(), dims }
                }
                RunArg::Int(v) => match kinds.and_then(|k| k.get(i)) {
                    Some(ParamKind::Int) => ArgKey::OpaqueInt,
                    _ => ArgKey::Int(*v),
                },
            })
            .collect()
    }
}

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(0);

/// One traced specialization with its resolved compiled kernel.
pub struct BoundKernel {
    traced: Arc<Traced>,
    /// Process-unique id; the compiled-kernel cache keys on it together
    /// with the config.
    program_id: u64,
    settings: Settings,
    configs: Vec<Config>,
    backend: Arc<dyn KernelBackend>,
    best: OnceLock<Arc<dyn CompiledKernel>>,
}

impl BoundKernel {
    fn new(
        traced: Arc<Traced>,
        settings: Settings,
        configs: Vec<Config>,
        backend: Arc<dyn KernelBackend>,
    ) -> Self {
        Self {
            traced,
            program_id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            settings,
            configs,
            backend,
            best: OnceLock::new(),
        }
    }

    pub fn spec(&self) -> &ConfigSpec {
        &self.traced.spec
    }

    /// The config the kernel settled on, once resolved.
    pub fn config(&self) -> Option<&Config> {
        self.best.get().map(|k| k.config())
    }

    /// Generated source of the resolved variant.
    pub fn source(&self) -> Option<&str> {
        self.best.get().map(|k| k.source())
    }

    pub fn call(&self, args: &[RunArg<'_>]) -> Result<Tensor> {
        self.compiled(args)?.execute(args)
    }

    fn compiled(&self, args: &[RunArg<'_>]) -> Result<Arc<dyn CompiledKernel>> {
        if let Some(kernel) = self.best.get() {
            return Ok(Arc::clone(kernel));
        }
        let chosen = self.resolve(args)?;
        let _ = self.best.set(Arc::clone(&chosen));
        // Another thread may have resolved first; both picked a valid
        // config, and the one in `best` wins for future calls.
        Ok(self.best.get().map_or(chosen, Arc::clone))
    }

    fn resolve(&self, args: &[RunArg<'_>]) -> Result<Arc<dyn CompiledKernel>> {
        let spec = &self.traced.spec;
        match self.configs.len() {
            1 => {
                let mut config = self.configs[0].clone();
                spec.normalize(&mut config, true).context(error::ConfigSnafu)?;
                self.compile(&config)
            }
            n if n >= 2 => {
                let search =
                    FiniteSearch::new(spec, self.configs.clone()).context(error::AutotuneSnafu)?;
                let report =
                    search.run(|c| self.measure(c, args)).context(error::AutotuneSnafu)?;
                self.report(&report);
                self.compile(&report.best)
            }
            _ if self.settings.use_default_config => self.compile(&spec.default_config()),
            _ => {
                let search = DifferentialEvolutionSearch::new(self.settings.autotune.clone());
                let report =
                    search.run(spec, |c| self.measure(c, args)).context(error::AutotuneSnafu)?;
                self.report(&report);
                self.compile(&report.best)
            }
        }
    }

    fn report(&self, report: &TuneReport) {
        tracing::info!(
            kernel = %self.traced.program.name,
            best = ?report.best_time,
            evaluated = report.evaluated,
            "autotune finished: {}",
            report.best.summary()
        );
    }

    /// The autotune objective: compile and time one candidate. Failures are
    /// reported to the search, never raised.
    fn measure(&self, config: &Config, args: &[RunArg<'_>]) -> BenchResult {
        let compiled = match self.compile(config) {
            Ok(k) => k,
            Err(e) => return BenchResult::Failure(e.to_string()),
        };
        match benchmark(|| compiled.execute(args).map(|_| ()), &self.settings.benchmark) {
            Ok(result) => BenchResult::Time(result.timing(&self.settings.benchmark)),
            Err(e) => BenchResult::Failure(e.to_string()),
        }
    }

    fn compile(&self, config: &Config) -> Result<Arc<dyn CompiledKernel>> {
        let mut config = config.clone();
        // Tensor descriptors need both the user's opt-in and backend
        // support; everything else degrades to plain pointers.
        if config.indexing == IndexingStrategy::TensorDescriptor
            && !(self.settings.tensor_descriptors && self.backend.supports_tensor_descriptors())
        {
            config.indexing = IndexingStrategy::Pointer;
        }
        kernel_cache::get_or_compile(self.program_id, &config, || {
            self.backend.compile(&self.traced, &config)
        })
    }
}
