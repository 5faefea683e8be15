//! Array Backend
//!
//! The graph never does arithmetic itself. Parameter reparameterization,
//! dtype transfer and checkpoint conversion all go through the [`Backend`]
//! trait, so the numeric implementation can be swapped without changing
//! any graph-level behavior.
//!
//! # Selection
//!
//! One backend is active per process. It is chosen from the
//! `SIMGRAPH_BACKEND` environment variable on first use (default `cpu`) and
//! can be replaced at runtime with [`set_backend`]:
//!
//! - `cpu`: double precision
//! - `cpu32`: single precision, every result rounded to `f32`

mod array;
mod cpu;

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

pub use array::{numel, Array, DType, Shape};
pub use cpu::CpuBackend;

use crate::error::{Error, Result};

/// Environment variable consulted for the initial backend.
pub const BACKEND_ENV: &str = "SIMGRAPH_BACKEND";

/// Uniform array operations consumed by parameters and modules.
pub trait Backend: Send + Sync {
    /// Registered name of this backend.
    fn name(&self) -> &str;

    /// Precision of arrays produced by this backend.
    fn dtype(&self) -> DType;

    /// Apply a scalar function elementwise, producing this backend's precision.
    fn unary(&self, array: &Array, f: fn(f64) -> f64) -> Array;

    /// Construct an array from a literal buffer.
    fn make_array(&self, data: Vec<f64>, shape: &[usize]) -> Result<Array> {
        Ok(Array::new(data, shape)?.cast(self.dtype()))
    }

    /// Convert an array to this backend's precision (or an explicit one).
    fn as_array(&self, array: &Array, dtype: Option<DType>) -> Array {
        let dtype = dtype.unwrap_or_else(|| self.dtype());
        if array.dtype() == dtype {
            array.clone()
        } else {
            array.cast(dtype)
        }
    }

    fn reshape(&self, array: &Array, shape: &[usize]) -> Result<Array> {
        array.reshape(shape)
    }

    /// Concatenate along the last axis.
    fn concatenate(&self, arrays: &[Array]) -> Result<Array> {
        Array::concat_last(arrays)
    }

    fn any(&self, array: &Array) -> bool {
        array.data().iter().any(|v| *v != 0.0)
    }

    fn all(&self, array: &Array) -> bool {
        array.data().iter().all(|v| *v != 0.0)
    }

    fn log(&self, array: &Array) -> Array {
        self.unary(array, f64::ln)
    }

    fn exp(&self, array: &Array) -> Array {
        self.unary(array, f64::exp)
    }

    fn tan(&self, array: &Array) -> Array {
        self.unary(array, f64::tan)
    }

    fn atan(&self, array: &Array) -> Array {
        self.unary(array, f64::atan)
    }

    fn sigmoid(&self, array: &Array) -> Array {
        self.unary(array, |x| 1.0 / (1.0 + (-x).exp()))
    }

    fn logit(&self, array: &Array) -> Array {
        self.unary(array, |p| (p / (1.0 - p)).ln())
    }

    /// Host representation: shape plus flat row-major values.
    fn to_host(&self, array: &Array) -> (Vec<usize>, Vec<f64>) {
        (array.shape().to_vec(), array.data().to_vec())
    }

    fn from_host(&self, shape: &[usize], data: Vec<f64>) -> Result<Array> {
        self.make_array(data, shape)
    }
}

static BACKEND: OnceLock<RwLock<Arc<dyn Backend>>> = OnceLock::new();

fn slot() -> &'static RwLock<Arc<dyn Backend>> {
    BACKEND.get_or_init(|| {
        let backend = std::env::var(BACKEND_ENV)
            .ok()
            .and_then(|name| match backend_by_name(&name) {
                Ok(backend) => Some(backend),
                Err(err) => {
                    tracing::warn!(%name, %err, "ignoring SIMGRAPH_BACKEND, using the cpu backend");
                    None
                }
            })
            .unwrap_or_else(|| Arc::new(CpuBackend::new(DType::F64)));
        RwLock::new(backend)
    })
}

/// Look up a backend by its registered name.
pub fn backend_by_name(name: &str) -> Result<Arc<dyn Backend>> {
    match name {
        "cpu" => Ok(Arc::new(CpuBackend::new(DType::F64))),
        "cpu32" => Ok(Arc::new(CpuBackend::new(DType::F32))),
        other => Err(Error::Backend(format!(
            "unsupported backend \"{other}\", expected one of: cpu, cpu32"
        ))),
    }
}

/// The process-wide backend.
pub fn current() -> Arc<dyn Backend> {
    Arc::clone(&*slot().read())
}

/// Replace the process-wide backend.
pub fn set_backend(name: &str) -> Result<()> {
    let backend = backend_by_name(name)?;
    tracing::debug!(backend = backend.name(), "switching array backend");
    *slot().write() = backend;
    Ok(())
}
