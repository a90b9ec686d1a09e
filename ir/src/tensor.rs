//! Minimal dense host tensors.
//!
//! The compiler core treats the numeric tensor library as an external
//! collaborator; this module is the small slice of it the example kernels,
//! reference checks, and the simulator backend need: contiguous row-major
//! tensors with scalar get/set through a dtype-erased f64/i64 view.

use smallvec::SmallVec;
use snafu::ensure;

use crate::dtype::DType;
use crate::error::{DataLengthMismatchSnafu, IndexOutOfBoundsSnafu, Result};

/// Where a tensor lives. The reference backend only executes on `Cpu`;
/// `Cuda` exists so specialization keys and settings carry a real device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(i) => write!(f, "cuda:{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl TensorData {
    fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
        }
    }
}

/// A contiguous row-major tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: SmallVec<[usize; 4]>,
    strides: SmallVec<[usize; 4]>,
    device: Device,
    data: TensorData,
}

fn contiguous_strides(shape: &[usize]) -> SmallVec<[usize; 4]> {
    let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(1, shape.len());
    let mut acc = 1;
    for (i, &s) in shape.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= s;
    }
    strides
}

impl Tensor {
    pub fn new(shape: &[usize], data: TensorData, device: Device) -> Result<Self> {
        let numel: usize = shape.iter().product();
        ensure!(data.len() == numel, DataLengthMismatchSnafu { expected: numel, actual: data.len() });
        Ok(Self { shape: SmallVec::from_slice(shape), strides: contiguous_strides(shape), device, data })
    }

    pub fn zeros(shape: &[usize], dtype: DType, device: Device) -> Self {
        let numel: usize = shape.iter().product();
        let data = match dtype {
            DType::I32 => TensorData::I32(vec![0; numel]),
            DType::I64 => TensorData::I64(vec![0; numel]),
            // F16/BF16/Bool values are held in f32 storage on the host.
            _ => TensorData::F32(vec![0.0; numel]),
        };
        Self { shape: SmallVec::from_slice(shape), strides: contiguous_strides(shape), device, data }
    }

    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        Self::new(shape, TensorData::F32(data), Device::Cpu)
    }

    pub fn from_i64(shape: &[usize], data: Vec<i64>) -> Result<Self> {
        Self::new(shape, TensorData::I64(data), Device::Cpu)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self, dim: usize) -> usize {
        self.shape[dim]
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Read one element through an f64 view.
    pub fn get(&self, linear: usize) -> Result<f64> {
        ensure!(linear < self.data.len(), IndexOutOfBoundsSnafu { index: linear, numel: self.data.len() });
        Ok(match &self.data {
            TensorData::F32(v) => v[linear] as f64,
            TensorData::I32(v) => v[linear] as f64,
            TensorData::I64(v) => v[linear] as f64,
        })
    }

    /// Write one element through an f64 view, casting to the storage dtype.
    pub fn set(&mut self, linear: usize, value: f64) -> Result<()> {
        ensure!(linear < self.data.len(), IndexOutOfBoundsSnafu { index: linear, numel: self.data.len() });
        match &mut self.data {
            TensorData::F32(v) => v[linear] = value as f32,
            TensorData::I32(v) => v[linear] = value as i32,
            TensorData::I64(v) => v[linear] = value as i64,
        }
        Ok(())
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Elementwise closeness with relative + absolute tolerance.
    pub fn allclose(&self, other: &Tensor, rtol: f64, atol: f64) -> bool {
        if self.shape != other.shape {
            return false;
        }
        (0..self.numel()).all(|i| {
            let (a, b) = (self.get(i).unwrap_or(f64::NAN), other.get(i).unwrap_or(f64::NAN));
            (a - b).abs() <= atol + rtol * b.abs()
        })
    }
}
