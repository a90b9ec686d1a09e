//! Built-in demo kernels: small, representative programs used by the bench
//! binary and the integration tests.

use std::sync::Arc;

use tessel_ir::DType;

use crate::backend::KernelBackend;
use crate::kernel::Kernel;
use crate::settings::Settings;

use tessel_compiler::Idx;

/// `out[i] = x[i] + y[i]`
pub fn vec_add(backend: Arc<dyn KernelBackend>, settings: Settings) -> Kernel {
    Kernel::new("vec_add", backend, settings, |ctx| {
        let x = ctx.tensor_arg("x")?;
        let y = ctx.tensor_arg("y")?;
        let out = ctx.empty_like(x)?;
        ctx.ret(out);
        let n = ctx.size(x, 0);
        let grid = ctx.tile(&[n]);
        ctx.for_each(grid, |s, t| {
            let a = s.load(x, &[Idx::Tile(t[0])])?;
            let b = s.load(y, &[Idx::Tile(t[0])])?;
            let c = s.add(a, b)?;
            s.store(out, &[Idx::Tile(t[0])], c)
        })
    })
}

/// `out = a @ b` with a 2-d launch grid and a sequential k loop.
pub fn matmul(backend: Arc<dyn KernelBackend>, settings: Settings) -> Kernel {
    Kernel::new("matmul", backend, settings, |ctx| {
        let a = ctx.tensor_arg("a")?;
        let b = ctx.tensor_arg("b")?;
        let (m, k, n) = (ctx.size(a, 0), ctx.size(a, 1), ctx.size(b, 1));
        let out = ctx.empty(&[m, n], ctx.dtype(a), ctx.device(a))?;
        ctx.ret(out);
        let grid = ctx.tile(&[m, n]);
        ctx.for_each(grid, |s, t| {
            let acc = s.zeros(&[t[0], t[1]], DType::F32);
            let inner = s.tile(&[k]);
            s.for_each(inner, |s, kt| {
                let at = s.load(a, &[Idx::Tile(t[0]), Idx::Tile(kt[0])])?;
                let bt = s.load(b, &[Idx::Tile(kt[0]), Idx::Tile(t[1])])?;
                s.dot_acc(at, bt, acc)?;
                Ok(())
            })?;
            s.store(out, &[Idx::Tile(t[0]), Idx::Tile(t[1])], acc)
        })
    })
}

/// `out[i] = sum_j x[i, j]`, reduction tunable between persistent and
/// looped.
pub fn row_sum(backend: Arc<dyn KernelBackend>, settings: Settings) -> Kernel {
    Kernel::new("row_sum", backend, settings, |ctx| {
        let x = ctx.tensor_arg("x")?;
        let (m, n) = (ctx.size(x, 0), ctx.size(x, 1));
        let out = ctx.empty(&[m], ctx.dtype(x), ctx.device(x))?;
        ctx.ret(out);
        let j = ctx.reduction(n);
        let grid = ctx.tile(&[m]);
        ctx.for_each(grid, |s, t| {
            let tile = s.load(x, &[Idx::Tile(t[0]), Idx::Tile(j)])?;
            let sum = s.reduce_sum(tile, 1)?;
            s.store(out, &[Idx::Tile(t[0])], sum)
        })
    })
}

/// `out[i, j] = table[idx[i], j]`: embedding-style row gather.
pub fn gather_rows(backend: Arc<dyn KernelBackend>, settings: Settings) -> Kernel {
    Kernel::new("gather_rows", backend, settings, |ctx| {
        let table = ctx.tensor_arg("table")?;
        let idx = ctx.tensor_arg("idx")?;
        let (n, d) = (ctx.size(idx, 0), ctx.size(table, 1));
        let out = ctx.empty(&[n, d], ctx.dtype(table), ctx.device(table))?;
        ctx.ret(out);
        let grid = ctx.tile(&[n, d]);
        ctx.for_each(grid, |s, t| {
            let ids = s.load(idx, &[Idx::Tile(t[0])])?;
            let rows = s.load(table, &[Idx::Gather(ids), Idx::Tile(t[1])])?;
            s.store(out, &[Idx::Tile(t[0]), Idx::Tile(t[1])], rows)
        })
    })
}
