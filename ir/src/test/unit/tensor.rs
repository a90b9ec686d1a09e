use crate::dtype::DType;
use crate::tensor::{Device, Tensor};

#[test]
fn strides_are_row_major() {
    let t = Tensor::zeros(&[2, 3, 4], DType::F32, Device::Cpu);
    assert_eq!(t.strides(), &[12, 4, 1]);
    assert_eq!(t.numel(), 24);
}

#[test]
fn data_length_checked() {
    assert!(Tensor::from_f32(&[2, 2], vec![1.0, 2.0, 3.0]).is_err());
    assert!(Tensor::from_f32(&[2, 2], vec![0.0; 4]).is_ok());
}

#[test]
fn get_set_round_trip() {
    let mut t = Tensor::zeros(&[4], DType::F32, Device::Cpu);
    t.set(2, 1.5).unwrap();
    assert_eq!(t.get(2).unwrap(), 1.5);
    assert!(t.set(4, 0.0).is_err());
    assert!(t.get(17).is_err());
}

#[test]
fn int_storage_casts() {
    let mut t = Tensor::zeros(&[2], DType::I64, Device::Cpu);
    t.set(0, 7.9).unwrap();
    assert_eq!(t.as_i64().unwrap()[0], 7);
}

#[test]
fn allclose_tolerances() {
    let a = Tensor::from_f32(&[2], vec![1.0, 2.0]).unwrap();
    let b = Tensor::from_f32(&[2], vec![1.0 + 1e-6, 2.0]).unwrap();
    assert!(a.allclose(&b, 1e-4, 1e-5));
    let c = Tensor::from_f32(&[2], vec![1.5, 2.0]).unwrap();
    assert!(!a.allclose(&c, 1e-4, 1e-5));
    let d = Tensor::from_f32(&[1], vec![1.0]).unwrap();
    assert!(!a.allclose(&d, 1e-4, 1e-5));
}

#[test]
fn promote_rules() {
    assert_eq!(DType::F32.promote(DType::I32), Some(DType::F32));
    assert_eq!(DType::I32.promote(DType::I64), Some(DType::I64));
    assert_eq!(DType::F16.promote(DType::BF16), Some(DType::F32));
    assert_eq!(DType::Bool.promote(DType::F32), Some(DType::F32));
}
