//! Shape-only tensors used during tracing.

use smallvec::SmallVec;

use crate::dtype::DType;
use crate::origin::Origin;
use crate::sym::SymInt;
use crate::tensor::Device;

/// A tensor with symbolic shape and no storage. Created by
/// `Environment::to_fake` from a real argument; every symbol it introduces
/// records its provenance.
#[derive(Debug, Clone)]
pub struct FakeTensor {
    pub shape: SmallVec<[SymInt; 4]>,
    pub dtype: DType,
    pub device: Device,
    pub origin: Origin,
}

impl FakeTensor {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self, dim: usize) -> SymInt {
        self.shape[dim]
    }
}
