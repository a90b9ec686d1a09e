//! End-to-end runs through the reference backend, checked against naive
//! host loops.

use std::sync::Arc;

use proptest::prelude::*;
use test_case::test_case;

use tessel_compiler::{Idx, TraceCtx};
use tessel_config::{Config, IndexingStrategy};
use tessel_ir::Tensor;

use crate::backend::RunArg;
use crate::demos;
use crate::error::Error;
use crate::kernel::Kernel;
use crate::settings::Settings;
use crate::test::{assert_close, default_config_settings, naive_add, naive_matmul, naive_row_sum, ramp, sim};

fn add2d(ctx: &mut TraceCtx) -> tessel_compiler::Result<()> {
    let x = ctx.tensor_arg("x")?;
    let y = ctx.tensor_arg("y")?;
    let out = ctx.empty_like(x)?;
    ctx.ret(out);
    let (m, n) = (ctx.size(x, 0), ctx.size(x, 1));
    let grid = ctx.tile(&[m, n]);
    ctx.for_each(grid, |s, t| {
        let a = s.load(x, &[Idx::Tile(t[0]), Idx::Tile(t[1])])?;
        let b = s.load(y, &[Idx::Tile(t[0]), Idx::Tile(t[1])])?;
        let c = s.add(a, b)?;
        s.store(out, &[Idx::Tile(t[0]), Idx::Tile(t[1])], c)
    })
}

#[test]
fn vec_add_matches_reference() {
    let kernel = demos::vec_add(sim(), Settings::default())
        .with_configs(vec![Config::with_block_sizes(vec![128])]);
    let x = ramp(&[512], 0.5);
    let y = ramp(&[512], -0.25);
    let out = kernel.call(&[RunArg::Tensor(&x), RunArg::Tensor(&y)]).unwrap();
    assert_close(&out, &naive_add(&x, &y));
}

#[test]
fn vec_add_masks_the_ragged_last_tile() {
    let kernel = demos::vec_add(sim(), Settings::default())
        .with_configs(vec![Config::with_block_sizes(vec![128])]);
    let x = ramp(&[500], 1.0);
    let y = ramp(&[500], 2.0);
    let out = kernel.call(&[RunArg::Tensor(&x), RunArg::Tensor(&y)]).unwrap();
    assert_close(&out, &naive_add(&x, &y));
}

#[test]
fn flattened_and_nd_layouts_agree() {
    let nd_config =
        Config { block_sizes: vec![32, 16], flatten_loops: vec![false], ..Default::default() };
    let flat_config =
        Config { block_sizes: vec![32, 16], flatten_loops: vec![true], ..Default::default() };
    let nd = Kernel::new("add2d", sim(), Settings::default(), add2d).with_configs(vec![nd_config]);
    let flat =
        Kernel::new("add2d", sim(), Settings::default(), add2d).with_configs(vec![flat_config]);

    // Ragged in both dimensions so the flattened lane mask actually bites.
    let x = ramp(&[33, 20], 0.5);
    let y = ramp(&[33, 20], -1.5);
    let args = [RunArg::Tensor(&x), RunArg::Tensor(&y)];
    let want = naive_add(&x, &y);
    assert_close(&nd.call(&args).unwrap(), &want);
    assert_close(&flat.call(&args).unwrap(), &want);
}

#[test]
fn matmul_with_reordered_swizzled_grid() {
    let config = Config {
        block_sizes: vec![16, 16, 16],
        loop_orders: vec![vec![1, 0]],
        l2_groupings: vec![4],
        ..Default::default()
    };
    let kernel = demos::matmul(sim(), Settings::default()).with_configs(vec![config]);
    let a = ramp(&[33, 20], 0.05);
    let b = ramp(&[20, 17], 0.02);
    let out = kernel.call(&[RunArg::Tensor(&a), RunArg::Tensor(&b)]).unwrap();
    assert_close(&out, &naive_matmul(&a, &b));
}

#[test_case(None; "persistent")]
#[test_case(Some(64); "looped")]
fn row_sum_matches_reference(reduction: Option<i64>) {
    let config = Config {
        block_sizes: vec![32],
        reduction_loops: vec![reduction],
        ..Default::default()
    };
    let kernel = demos::row_sum(sim(), Settings::default()).with_configs(vec![config]);
    let x = ramp(&[37, 500], 0.1);
    let out = kernel.call(&[RunArg::Tensor(&x)]).unwrap();
    assert_close(&out, &naive_row_sum(&x));
}

#[test]
fn gather_rows_matches_reference() {
    let kernel = demos::gather_rows(sim(), Settings::default())
        .with_configs(vec![Config::with_block_sizes(vec![16, 16])]);
    let table = ramp(&[64, 32], 0.1);
    let idx = Tensor::from_i64(&[50], (0..50).map(|i| i * 7 % 64).collect()).unwrap();
    let out = kernel.call(&[RunArg::Tensor(&table), RunArg::Tensor(&idx)]).unwrap();

    let ids = idx.as_i64().unwrap();
    let mut want = Tensor::zeros(&[50, 32], table.dtype(), table.device());
    for (i, &row) in ids.iter().enumerate() {
        for j in 0..32 {
            want.set(i * 32 + j, table.get(row as usize * 32 + j).unwrap()).unwrap();
        }
    }
    assert_close(&out, &want);
}

#[test]
fn out_of_range_gather_index_is_reported() {
    let kernel = demos::gather_rows(sim(), Settings::default())
        .with_configs(vec![Config::with_block_sizes(vec![16, 16])]);
    let table = ramp(&[64, 32], 0.1);
    let idx = Tensor::from_i64(&[4], vec![0, 3, 64, 1]).unwrap();
    let err = kernel.call(&[RunArg::Tensor(&table), RunArg::Tensor(&idx)]).unwrap_err();
    assert!(matches!(err, Error::GatherIndexOutOfBounds { index: 64, extent: 64, .. }), "{err}");
}

/// Two sequential roots over the same input: the pid rebasing in the launch
/// mapping must route programs past the first root's grid.
#[test]
fn second_root_output_is_returned() {
    let kernel = Kernel::new("relu_then_neg", sim(), default_config_settings(), |ctx| {
        let x = ctx.tensor_arg("x")?;
        let n = ctx.size(x, 0);
        let clamped = ctx.empty_like(x)?;
        let negated = ctx.empty_like(x)?;
        ctx.ret(negated);
        let first = ctx.tile(&[n]);
        ctx.for_each(first, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            let r = s.relu(v)?;
            s.store(clamped, &[Idx::Tile(t[0])], r)
        })?;
        let second = ctx.tile(&[n]);
        ctx.for_each(second, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            let neg = s.neg(v)?;
            s.store(negated, &[Idx::Tile(t[0])], neg)
        })
    });
    let x = ramp(&[300], 1.0);
    let out = kernel.call(&[RunArg::Tensor(&x)]).unwrap();
    for i in 0..300 {
        assert_eq!(out.get(i).unwrap(), -x.get(i).unwrap());
    }
}

#[test]
fn block_pointer_indexing_executes() {
    let config =
        Config { indexing: IndexingStrategy::BlockPtr, ..Config::with_block_sizes(vec![64]) };
    let kernel = demos::vec_add(sim(), Settings::default()).with_configs(vec![config]);
    let x = ramp(&[200], 1.0);
    let y = ramp(&[200], 0.5);
    let args = [RunArg::Tensor(&x), RunArg::Tensor(&y)];
    let out = kernel.call(&args).unwrap();
    assert_close(&out, &naive_add(&x, &y));
    let bound = kernel.bind(&args).unwrap();
    assert_eq!(bound.config().unwrap().indexing, IndexingStrategy::BlockPtr);
}

#[test]
fn tensor_descriptors_degrade_to_pointers_without_backend_support() {
    let config = Config {
        indexing: IndexingStrategy::TensorDescriptor,
        ..Config::with_block_sizes(vec![64])
    };
    let kernel = demos::vec_add(sim(), Settings::default()).with_configs(vec![config]);
    let x = ramp(&[200], 1.0);
    let y = ramp(&[200], 0.5);
    let args = [RunArg::Tensor(&x), RunArg::Tensor(&y)];
    let out = kernel.call(&args).unwrap();
    assert_close(&out, &naive_add(&x, &y));
    let bound = kernel.bind(&args).unwrap();
    assert_eq!(bound.config().unwrap().indexing, IndexingStrategy::Pointer);
}

proptest! {
    #[test]
    fn vec_add_matches_reference_for_any_length(n in 1usize..400) {
        let kernel = demos::vec_add(sim(), default_config_settings());
        let x = ramp(&[n], 0.5);
        let y = ramp(&[n], -0.75);
        let out = kernel.call(&[RunArg::Tensor(&x), RunArg::Tensor(&y)]).unwrap();
        prop_assert!(out.allclose(&naive_add(&x, &y), 1e-5, 1e-5));
    }
}
