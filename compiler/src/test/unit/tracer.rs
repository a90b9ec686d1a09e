use tessel_ir::{DType, Device};

use crate::env::TraceSettings;
use crate::error::Error;
use crate::test::{tensor, trace_add, trace_matmul, trace_row_sum};
use crate::trace::{trace, ArgValue, Idx};

#[test]
fn add_registers_one_tunable_block_size() {
    let traced = trace_add(1000, TraceSettings::default());
    assert_eq!(traced.spec.block_sizes.len(), 1);
    assert_eq!(traced.spec.block_sizes[0].size_hint, 1000);
    assert_eq!(traced.program.roots.len(), 1);
    assert!(traced.program.ret.is_some());
}

#[test]
fn static_shapes_make_sizes_constant() {
    let traced = trace_add(512, TraceSettings { static_shapes: true, ..Default::default() });
    let x = &traced.program.value(traced.program.params[0].value);
    match &x.kind {
        tessel_ir::program::ValueKind::HostTensor { fake } => {
            assert!(fake.shape[0].is_const());
        }
        other => panic!("unexpected kind {other:?}"),
    }
}

#[test]
fn matmul_registers_order_flatten_and_range_axes() {
    let traced = trace_matmul(128, 64, 96);
    assert_eq!(traced.spec.block_sizes.len(), 3);
    assert_eq!(traced.spec.loop_orders.len(), 1);
    assert_eq!(traced.spec.l2_groupings.len(), 1);
    assert_eq!(traced.spec.ranges.len(), 1);
    // Loads touch only one of the two grid dimensions at a time, so the
    // grid group cannot be linearized.
    assert!(!traced.spec.flatten_loops[0].allowed);
}

#[test]
fn elementwise_2d_keeps_flattening_available() {
    let traced = trace(
        "add2d",
        TraceSettings::default(),
        vec![tensor(&[64, 48]), tensor(&[64, 48])],
        |ctx| {
            let x = ctx.tensor_arg("x")?;
            let y = ctx.tensor_arg("y")?;
            let out = ctx.empty_like(x)?;
            ctx.ret(out);
            let (d0, d1) = (ctx.size(x, 0), ctx.size(x, 1));
            let grid = ctx.tile(&[d0, d1]);
            ctx.for_each(grid, |s, t| {
                let a = s.load(x, &[Idx::Tile(t[0]), Idx::Tile(t[1])])?;
                let b = s.load(y, &[Idx::Tile(t[0]), Idx::Tile(t[1])])?;
                let c = s.add(a, b)?;
                s.store(out, &[Idx::Tile(t[0]), Idx::Tile(t[1])], c)
            })
        },
    )
    .unwrap();
    assert!(traced.spec.flatten_loops[0].allowed);
    assert_eq!(traced.spec.allow_use_yz_grid, Some(true));
}

#[test]
fn row_sum_registers_a_reduction_loop() {
    let traced = trace_row_sum(64, 1000);
    assert_eq!(traced.spec.reduction_loops.len(), 1);
    assert_eq!(traced.spec.reduction_loops[0].size_hint, 1000);
}

#[test]
fn registered_block_size_binds_its_extent_on_first_tile() {
    let traced = trace("reg", TraceSettings::default(), vec![tensor(&[300])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let out = ctx.empty_like(x)?;
        ctx.ret(out);
        let axis = ctx.register_block_size(16, 128);
        let size = ctx.size(x, 0);
        let grid = ctx.tile_sized(&[size], &[axis]);
        ctx.for_each(grid, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            s.store(out, &[Idx::Tile(t[0])], v)
        })
    })
    .unwrap();
    assert_eq!(traced.spec.block_sizes.len(), 1);
    assert_eq!(traced.spec.block_sizes[0].min, 16);
    // The hint stays within the registered maximum even though the
    // observed extent is larger.
    assert_eq!(traced.spec.block_sizes[0].size_hint, 128);
    assert!(traced.env.block_sizes()[0].is_tunable());
}

#[test]
fn zeroed_allocations_are_recorded() {
    let traced = trace("zed", TraceSettings::default(), vec![tensor(&[32])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let size = ctx.size(x, 0);
        let out = ctx.zeros_host(&[size], DType::F32, Device::Cpu)?;
        ctx.ret(out);
        let grid = ctx.tile(&[size]);
        ctx.for_each(grid, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            s.atomic_add(out, &[Idx::Tile(t[0])], v)
        })
    })
    .unwrap();
    let [tessel_ir::program::HostStmt::Alloc { zeroed, .. }] = traced.program.host.as_slice()
    else {
        panic!("expected exactly one allocation");
    };
    assert!(zeroed);
}

#[test]
fn unconsumed_group_is_rejected() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[16])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let size = ctx.size(x, 0);
        let _unused = ctx.tile(&[size]);
        let grid = ctx.grid(&[size]);
        ctx.for_each(grid, |_, _| Ok(()))
    })
    .unwrap_err();
    assert!(matches!(err, Error::LoopFunctionNotInFor { .. }), "{err}");
}

#[test]
fn host_alloc_between_loops_is_rejected() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[16])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let size = ctx.size(x, 0);
        let g1 = ctx.tile(&[size]);
        ctx.for_each(g1, |_, _| Ok(()))?;
        let _mid = ctx.empty(&[size], DType::F32, Device::Cpu)?;
        let g2 = ctx.tile(&[size]);
        ctx.for_each(g2, |_, _| Ok(()))
    })
    .unwrap_err();
    assert!(matches!(err, Error::TopLevelStatementBetweenLoops { .. }), "{err}");
}

#[test]
fn reading_an_earlier_loops_output_is_rejected() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[16])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let out = ctx.empty_like(x)?;
        let size = ctx.size(x, 0);
        let g1 = ctx.tile(&[size]);
        ctx.for_each(g1, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            s.store(out, &[Idx::Tile(t[0])], v)
        })?;
        let g2 = ctx.tile(&[size]);
        ctx.for_each(g2, |s, t| {
            let v = s.load(out, &[Idx::Tile(t[0])])?;
            s.store(out, &[Idx::Tile(t[0])], v)
        })
    })
    .unwrap_err();
    assert!(matches!(err, Error::LoopDependency { .. }), "{err}");
}

#[test]
fn rewriting_an_earlier_loops_output_is_rejected() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[16])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let out = ctx.empty_like(x)?;
        let size = ctx.size(x, 0);
        let g1 = ctx.tile(&[size]);
        ctx.for_each(g1, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            s.store(out, &[Idx::Tile(t[0])], v)
        })?;
        // No read of `out` here; the second write alone is a race.
        let g2 = ctx.tile(&[size]);
        ctx.for_each(g2, |s, t| {
            let v = s.load(x, &[Idx::Tile(t[0])])?;
            s.store(out, &[Idx::Tile(t[0])], v)
        })
    })
    .unwrap_err();
    assert!(matches!(err, Error::LoopDependency { .. }), "{err}");
}

#[test]
fn mixed_operand_dtypes_promote_toward_float() {
    let ints = ArgValue::Tensor { shape: vec![32], dtype: DType::I32, device: Device::Cpu };
    let traced = trace("mix", TraceSettings::default(), vec![tensor(&[32]), ints], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let y = ctx.tensor_arg("y")?;
        let out = ctx.empty_like(x)?;
        ctx.ret(out);
        let size = ctx.size(x, 0);
        let grid = ctx.tile(&[size]);
        ctx.for_each(grid, |s, t| {
            let a = s.load(x, &[Idx::Tile(t[0])])?;
            let b = s.load(y, &[Idx::Tile(t[0])])?;
            let c = s.add(a, b)?;
            s.store(out, &[Idx::Tile(t[0])], c)
        })
    })
    .unwrap();
    let sum = traced.program.roots[0]
        .inner
        .body
        .iter()
        .find_map(|stmt| match stmt {
            tessel_ir::program::DeviceStmt::Define {
                dst,
                expr: tessel_ir::program::DeviceExpr::Binary { .. },
                ..
            } => Some(*dst),
            _ => None,
        })
        .expect("one binary op in the root body");
    match &traced.program.value(sum).kind {
        tessel_ir::program::ValueKind::DeviceTile { dtype, .. } => assert_eq!(*dtype, DType::F32),
        other => panic!("unexpected kind {other:?}"),
    }
}

#[test]
fn tile_escaping_its_loop_is_rejected() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[16])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let size = ctx.size(x, 0);
        let mut escaped = None;
        let g1 = ctx.tile(&[size]);
        ctx.for_each(g1, |_, t| {
            escaped = Some(t[0]);
            Ok(())
        })?;
        let g2 = ctx.tile(&[size]);
        ctx.for_each(g2, |s, _| {
            s.load(x, &[Idx::Tile(escaped.unwrap())])?;
            Ok(())
        })
    })
    .unwrap_err();
    assert!(matches!(err, Error::IncorrectTileUsage { .. }), "{err}");
}

#[test]
fn duplicate_parameter_names_are_rejected() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[8]), tensor(&[8])], |ctx| {
        ctx.tensor_arg("x")?;
        ctx.tensor_arg("x")?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, Error::NamingConflict { .. }), "{err}");
}

#[test]
fn subscript_arity_is_checked() {
    let err = trace("bad", TraceSettings::default(), vec![tensor(&[8, 8])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let size = ctx.size(x, 0);
        let grid = ctx.tile(&[size]);
        ctx.for_each(grid, |s, t| {
            s.load(x, &[Idx::Tile(t[0])])?;
            Ok(())
        })
    })
    .unwrap_err();
    assert!(matches!(err, Error::RankMismatch { .. }), "{err}");
}

#[test]
fn int_argument_kind_is_checked() {
    let err = trace("bad", TraceSettings::default(), vec![ArgValue::Int(3)], |ctx| {
        ctx.tensor_arg("x")?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch { .. }), "{err}");
}

#[test]
fn size_one_dimensions_specialize() {
    let traced = trace("unit", TraceSettings::default(), vec![tensor(&[1, 100])], |ctx| {
        let x = ctx.tensor_arg("x")?;
        let d1 = ctx.size(x, 1);
        let grid = ctx.tile(&[d1]);
        ctx.for_each(grid, |_, _| Ok(()))
    })
    .unwrap();
    let fake = match &traced.program.value(traced.program.params[0].value).kind {
        tessel_ir::program::ValueKind::HostTensor { fake } => fake.clone(),
        other => panic!("unexpected kind {other:?}"),
    };
    assert!(fake.shape[0].is_const());
    assert!(!fake.shape[1].is_const());
}
