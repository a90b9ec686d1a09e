mod unit;

use tessel_ir::{DType, Device};

use crate::env::TraceSettings;
use crate::trace::{trace, ArgValue, Idx, Traced};

pub(crate) fn tensor(shape: &[usize]) -> ArgValue {
    ArgValue::Tensor { shape: shape.to_vec(), dtype: DType::F32, device: Device::Cpu }
}

/// Elementwise add over one dimension.
pub(crate) fn trace_add(n: usize, settings: TraceSettings) -> Traced {
    trace("add", settings, vec![tensor(&[n]), tensor(&[n])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let y = ctx.tensor_arg("y")?;
        let out = ctx.empty_like(x)?;
        ctx.ret(out);
        let size = ctx.size(x, 0);
        let grid = ctx.tile(&[size]);
        ctx.for_each(grid, |s, tiles| {
            let t = tiles[0];
            let a = s.load(x, &[Idx::Tile(t)])?;
            let b = s.load(y, &[Idx::Tile(t)])?;
            let c = s.add(a, b)?;
            s.store(out, &[Idx::Tile(t)], c)
        })
    })
    .expect("add kernel traces")
}

/// Tiled matmul with a nested accumulation loop.
pub(crate) fn trace_matmul(m: usize, k: usize, n: usize) -> Traced {
    trace(
        "matmul",
        TraceSettings::default(),
        vec![tensor(&[m, k]), tensor(&[k, n])],
        |ctx| {
            let x = ctx.tensor_arg("x")?;
            let y = ctx.tensor_arg("y")?;
            let (sm, sk) = (ctx.size(x, 0), ctx.size(x, 1));
            let sn = ctx.size(y, 1);
            let out = ctx.empty(&[sm, sn], DType::F32, Device::Cpu)?;
            ctx.ret(out);
            let grid = ctx.tile(&[sm, sn]);
            ctx.for_each(grid, |s, tiles| {
                let (tm, tn) = (tiles[0], tiles[1]);
                let mut acc = s.zeros(&[tm, tn], DType::F32);
                let inner = s.tile(&[sk]);
                s.for_each(inner, |s, ktiles| {
                    let tk = ktiles[0];
                    let a = s.load(x, &[Idx::Tile(tm), Idx::Tile(tk)])?;
                    let b = s.load(y, &[Idx::Tile(tk), Idx::Tile(tn)])?;
                    acc = s.dot_acc(a, b, acc)?;
                    Ok(())
                })?;
                s.store(out, &[Idx::Tile(tm), Idx::Tile(tn)], acc)
            })
        },
    )
    .expect("matmul kernel traces")
}

/// Row-wise sum with a reduction dimension.
pub(crate) fn trace_row_sum(rows: usize, cols: usize) -> Traced {
    trace(
        "row_sum",
        TraceSettings::default(),
        vec![tensor(&[rows, cols])],
        |ctx| {
            let x = ctx.tensor_arg("x")?;
            let (r, c) = (ctx.size(x, 0), ctx.size(x, 1));
            let out = ctx.empty(&[r], DType::F32, Device::Cpu)?;
            ctx.ret(out);
            let rd = ctx.reduction(c);
            let grid = ctx.tile(&[r]);
            ctx.for_each(grid, |s, tiles| {
                let t = tiles[0];
                let v = s.load(x, &[Idx::Tile(t), Idx::Tile(rd)])?;
                let total = s.reduce_sum(v, 1)?;
                s.store(out, &[Idx::Tile(t)], total)
            })
        },
    )
    .expect("row_sum kernel traces")
}
