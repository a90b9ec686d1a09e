mod unit;

use std::sync::Arc;

use tessel_ir::Tensor;

use crate::backend::KernelBackend;
use crate::settings::Settings;
use crate::sim::SimBackend;

pub(crate) fn sim() -> Arc<dyn KernelBackend> {
    Arc::new(SimBackend)
}

pub(crate) fn default_config_settings() -> Settings {
    Settings::builder().use_default_config(true).build()
}

/// Deterministic non-trivial test data, mixing signs.
pub(crate) fn ramp(shape: &[usize], scale: f32) -> Tensor {
    let numel: usize = shape.iter().product();
    let data = (0..numel).map(|i| ((i * 37 + 11) % 101) as f32 * scale - 25.0 * scale).collect();
    Tensor::from_f32(shape, data).unwrap()
}

pub(crate) fn assert_close(got: &Tensor, want: &Tensor) {
    assert_eq!(got.shape(), want.shape());
    assert!(got.allclose(want, 1e-5, 1e-5), "tensors differ\ngot:  {got:?}\nwant: {want:?}");
}

pub(crate) fn naive_add(x: &Tensor, y: &Tensor) -> Tensor {
    let mut out = Tensor::zeros(x.shape(), x.dtype(), x.device());
    for i in 0..x.numel() {
        out.set(i, x.get(i).unwrap() + y.get(i).unwrap()).unwrap();
    }
    out
}

pub(crate) fn naive_matmul(a: &Tensor, b: &Tensor) -> Tensor {
    let (m, k, n) = (a.size(0), a.size(1), b.size(1));
    let mut out = Tensor::zeros(&[m, n], a.dtype(), a.device());
    for i in 0..m {
        for j in 0..n {
            let mut s = 0.0;
            for kk in 0..k {
                s += a.get(i * k + kk).unwrap() * b.get(kk * n + j).unwrap();
            }
            out.set(i * n + j, s).unwrap();
        }
    }
    out
}

pub(crate) fn naive_row_sum(x: &Tensor) -> Tensor {
    let (m, n) = (x.size(0), x.size(1));
    let mut out = Tensor::zeros(&[m], x.dtype(), x.device());
    for i in 0..m {
        let s: f64 = (0..n).map(|j| x.get(i * n + j).unwrap()).sum();
        out.set(i, s).unwrap();
    }
    out
}
