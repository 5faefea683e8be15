//! In-process CPU backend.

use super::{Array, Backend, DType};

/// Evaluates everything on the host in `f64`, rounding results to the
/// configured precision.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackend {
    dtype: DType,
}

impl CpuBackend {
    pub fn new(dtype: DType) -> Self {
        Self { dtype }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(DType::F64)
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        match self.dtype {
            DType::F64 => "cpu",
            DType::F32 => "cpu32",
        }
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn unary(&self, array: &Array, f: fn(f64) -> f64) -> Array {
        let dtype = self.dtype;
        array.map(|v| dtype.round(f(v))).cast(dtype)
    }
}
