//! Process-wide cache of compiled kernel variants.
//!
//! Keyed by `(program id, config)`: one traced program under one config is
//! always the same artifact, so concurrent callers racing on a cold entry
//! should end up sharing a single compilation. The at-most-one-winner
//! discipline below guarantees that: whoever loses the `compute` race drops
//! its freshly compiled kernel and adopts the winner's.

use std::sync::{Arc, OnceLock};

use papaya::{Compute, Operation};
use tessel_config::Config;

use crate::backend::CompiledKernel;
use crate::error::Result;

type Key = (u64, Config);
type Cache = papaya::HashMap<Key, Arc<dyn CompiledKernel>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(papaya::HashMap::new)
}

/// Fetch the compiled kernel for `(program_id, config)`, compiling it with
/// `compile` on a miss.
pub fn get_or_compile(
    program_id: u64,
    config: &Config,
    compile: impl FnOnce() -> Result<Arc<dyn CompiledKernel>>,
) -> Result<Arc<dyn CompiledKernel>> {
    let pinned = cache().pin();
    let key = (program_id, config.clone());
    if let Some(existing) = pinned.get(&key) {
        return Ok(Arc::clone(existing));
    }

    // Compile outside `compute`: the closure may run more than once and
    // must stay cheap. Losing the race just wastes this one compilation.
    let fresh = compile()?;
    let kernel = match pinned.compute(key, |entry| match entry {
        Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
        None => Operation::Insert(Arc::clone(&fresh)),
    }) {
        Compute::Inserted(_, kernel) => Arc::clone(kernel),
        Compute::Aborted(kernel) => kernel,
        _ => unreachable!("insert/abort are the only operations issued"),
    };
    Ok(kernel)
}

/// Drop every cached kernel. Test isolation only.
pub fn clear() {
    cache().pin().clear();
}
