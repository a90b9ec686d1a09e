//! User-facing kernel settings.
//!
//! One [`Settings`] value covers the whole pipeline: trace-time policy,
//! config resolution, and benchmarking. The compiler crate only sees the
//! [`TraceSettings`] slice of it.

use tessel_autotune::EvolutionSettings;
use tessel_compiler::{TraceSettings, WarningKind};

use crate::benchmark::BenchmarkConfig;

#[derive(Debug, Clone, bon::Builder)]
pub struct Settings {
    /// Specialize on exact shapes; every shape change recompiles.
    #[builder(default = false)]
    pub static_shapes: bool,
    /// Trip-count cap for offering fully static unrolling of nested loops.
    #[builder(default = tessel_config::DEFAULT_STATIC_RANGE_LIMIT)]
    pub static_range_limit: i64,
    #[builder(default)]
    pub suppress_warnings: Vec<WarningKind>,
    /// Skip the search entirely and compile the spec's default config when
    /// no explicit configs were supplied.
    #[builder(default = false)]
    pub use_default_config: bool,
    /// Allow the tensor-descriptor indexing strategy. Only honored when the
    /// backend also reports support; otherwise candidates fall back to
    /// pointer indexing.
    #[builder(default = false)]
    pub tensor_descriptors: bool,
    #[builder(default)]
    pub autotune: EvolutionSettings,
    #[builder(default)]
    pub benchmark: BenchmarkConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    pub(crate) fn trace_settings(&self) -> TraceSettings {
        TraceSettings {
            static_shapes: self.static_shapes,
            static_range_limit: self.static_range_limit,
            suppress_warnings: self.suppress_warnings.clone(),
        }
    }
}
