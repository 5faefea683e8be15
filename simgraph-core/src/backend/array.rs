//! Dense row-major arrays.
//!
//! `Array` is the value type that parameters hold and bundles carry. It is
//! deliberately small: a flat `f64` buffer, a shape and a dtype tag. All
//! elementwise arithmetic broadcasts the way array libraries do (shapes are
//! right-aligned; a dimension of 1 stretches).

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::error::{Error, Result};

/// Array shape. Most parameters are rank four or less.
pub type Shape = SmallVec<[usize; 4]>;

/// Element precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Round a value to this precision.
    #[inline]
    pub fn round(self, value: f64) -> f64 {
        match self {
            DType::F32 => value as f32 as f64,
            DType::F64 => value,
        }
    }
}

/// Number of elements for a shape. The empty shape is a scalar.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// A dense array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    data: Vec<f64>,
    shape: Shape,
    dtype: DType,
}

impl Array {
    /// Create an array from a flat buffer and a shape.
    pub fn new(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        if data.len() != numel(shape) {
            return Err(Error::Shape(format!(
                "buffer of {} elements cannot have shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            data,
            shape: Shape::from_slice(shape),
            dtype: DType::F64,
        })
    }

    /// A rank-0 array.
    pub fn scalar(value: f64) -> Self {
        Self {
            data: vec![value],
            shape: Shape::new(),
            dtype: DType::F64,
        }
    }

    /// A rank-1 array.
    pub fn vector(values: Vec<f64>) -> Self {
        let len = values.len();
        Self {
            data: values,
            shape: smallvec![len],
            dtype: DType::F64,
        }
    }

    pub fn full(shape: &[usize], value: f64) -> Self {
        Self {
            data: vec![value; numel(shape)],
            shape: Shape::from_slice(shape),
            dtype: DType::F64,
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// `n` evenly spaced values over `[start, end]`.
    pub fn linspace(start: f64, end: f64, n: usize) -> Self {
        let step = if n > 1 {
            (end - start) / (n - 1) as f64
        } else {
            0.0
        };
        Self::vector((0..n).map(|i| start + step * i as f64).collect())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The single element of a one-element array.
    pub fn item(&self) -> Option<f64> {
        match self.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// Convert to another precision.
    pub fn cast(&self, dtype: DType) -> Self {
        Self {
            data: self.data.iter().map(|v| dtype.round(*v)).collect(),
            shape: self.shape.clone(),
            dtype,
        }
    }

    /// Same data, new shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if numel(shape) != self.data.len() {
            return Err(Error::Shape(format!(
                "cannot reshape {:?} into {:?}",
                self.shape, shape
            )));
        }
        Ok(Self {
            data: self.data.clone(),
            shape: Shape::from_slice(shape),
            dtype: self.dtype,
        })
    }

    /// Collapse to rank 1.
    pub fn flatten(&self) -> Self {
        Self {
            data: self.data.clone(),
            shape: smallvec![self.data.len()],
            dtype: self.dtype,
        }
    }

    /// Split the shape into everything-but-last and the last dimension.
    /// Rank-0 arrays behave as a single element along the last axis.
    fn rows_and_last(&self) -> (&[usize], usize) {
        match self.shape.split_last() {
            Some((last, prefix)) => (prefix, *last),
            None => (&[], 1),
        }
    }

    /// Take `len` entries of the last axis starting at `start`.
    pub fn slice_last(&self, start: usize, len: usize) -> Result<Self> {
        let (prefix, last) = self.rows_and_last();
        if start + len > last {
            return Err(Error::Shape(format!(
                "slice {}..{} out of range for last dimension {}",
                start,
                start + len,
                last
            )));
        }
        let rows = numel(prefix);
        let mut data = Vec::with_capacity(rows * len);
        for row in 0..rows {
            let base = row * last + start;
            data.extend_from_slice(&self.data[base..base + len]);
        }
        let mut shape = Shape::from_slice(prefix);
        shape.push(len);
        Ok(Self {
            data,
            shape,
            dtype: self.dtype,
        })
    }

    /// Concatenate along the last axis. All leading dimensions must agree.
    pub fn concat_last(arrays: &[Array]) -> Result<Self> {
        let Some(first) = arrays.first() else {
            return Ok(Self::vector(Vec::new()));
        };
        let prefix = first.rows_and_last().0;
        let mut total = 0;
        for array in arrays {
            let (other, last) = array.rows_and_last();
            if other != prefix {
                return Err(Error::Shape(format!(
                    "cannot concatenate {:?} with {:?} along the last axis",
                    first.shape, array.shape
                )));
            }
            total += last;
        }
        let rows = numel(prefix);
        let mut data = Vec::with_capacity(rows * total);
        for row in 0..rows {
            for array in arrays {
                let last = array.rows_and_last().1;
                data.extend_from_slice(&array.data[row * last..(row + 1) * last]);
            }
        }
        let mut shape = Shape::from_slice(prefix);
        shape.push(total);
        Ok(Self {
            data,
            shape,
            dtype: first.dtype,
        })
    }

    /// Stack equally shaped arrays along a new leading axis.
    pub fn stack(arrays: &[Array]) -> Result<Self> {
        let Some(first) = arrays.first() else {
            return Ok(Self::vector(Vec::new()));
        };
        let mut data = Vec::with_capacity(first.len() * arrays.len());
        for array in arrays {
            if array.shape != first.shape {
                return Err(Error::Shape(format!(
                    "cannot stack {:?} with {:?}",
                    first.shape, array.shape
                )));
            }
            data.extend_from_slice(&array.data);
        }
        let mut shape: Shape = smallvec![arrays.len()];
        shape.extend_from_slice(&first.shape);
        Ok(Self {
            data,
            shape,
            dtype: first.dtype,
        })
    }

    /// Apply `f` to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            data: self.data.iter().map(|v| f(*v)).collect(),
            shape: self.shape.clone(),
            dtype: self.dtype,
        }
    }

    /// Combine two arrays elementwise with broadcasting.
    pub fn zip_with(&self, other: &Array, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| f(*a, *b))
                .collect();
            return Ok(Self {
                data,
                shape: self.shape.clone(),
                dtype: self.dtype,
            });
        }

        let shape = broadcast_shape(&self.shape, &other.shape).ok_or_else(|| {
            Error::Shape(format!(
                "shapes {:?} and {:?} do not broadcast",
                self.shape, other.shape
            ))
        })?;
        let lhs = broadcast_strides(&self.shape, &shape);
        let rhs = broadcast_strides(&other.shape, &shape);

        let total = numel(&shape);
        let mut data = Vec::with_capacity(total);
        let mut index: Shape = smallvec![0; shape.len()];
        for _ in 0..total {
            let a: usize = index.iter().zip(&lhs).map(|(i, s)| i * s).sum();
            let b: usize = index.iter().zip(&rhs).map(|(i, s)| i * s).sum();
            data.push(f(self.data[a], other.data[b]));

            // Advance the row-major counter.
            for axis in (0..shape.len()).rev() {
                index[axis] += 1;
                if index[axis] < shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Ok(Self {
            data,
            shape,
            dtype: self.dtype,
        })
    }

    pub fn add(&self, other: &Array) -> Result<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Array) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Array) -> Result<Self> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Array) -> Result<Self> {
        self.zip_with(other, |a, b| a / b)
    }

    /// Floored modulo, the result takes the sign of the divisor.
    pub fn rem_euclid(&self, other: &Array) -> Result<Self> {
        self.zip_with(other, f64::rem_euclid)
    }

    /// True when every element is within `tol` of the broadcast counterpart.
    pub fn allclose(&self, other: &Array, tol: f64) -> bool {
        self.zip_with(other, |a, b| {
            if a == b || (a - b).abs() <= tol * (1.0 + b.abs()) {
                1.0
            } else {
                0.0
            }
        })
        .map(|close| close.data.iter().all(|v| *v == 1.0))
        .unwrap_or(false)
    }
}

impl From<f64> for Array {
    fn from(value: f64) -> Self {
        Array::scalar(value)
    }
}

impl From<Vec<f64>> for Array {
    fn from(values: Vec<f64>) -> Self {
        Array::vector(values)
    }
}

fn broadcast_dim(shape: &[usize], rank: usize, axis: usize) -> usize {
    let offset = rank - shape.len();
    if axis < offset {
        1
    } else {
        shape[axis - offset]
    }
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let mut out = Shape::with_capacity(rank);
    for axis in 0..rank {
        let da = broadcast_dim(a, rank, axis);
        let db = broadcast_dim(b, rank, axis);
        out.push(match (da, db) {
            _ if da == db => da,
            (1, _) => db,
            (_, 1) => da,
            _ => return None,
        });
    }
    Some(out)
}

/// Row-major strides of `shape` viewed as `target`, zero on stretched axes.
fn broadcast_strides(shape: &[usize], target: &[usize]) -> Shape {
    let rank = target.len();
    let mut strides: Shape = smallvec![0; rank];
    let mut step = 1;
    for axis in (0..rank).rev() {
        let dim = broadcast_dim(shape, rank, axis);
        if dim != 1 {
            strides[axis] = step;
        }
        step *= dim;
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_is_rank_zero() {
        let a = Array::scalar(2.5);
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.len(), 1);
        assert_eq!(a.item(), Some(2.5));
    }

    #[test]
    fn new_checks_buffer_length() {
        assert!(Array::new(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
        assert!(Array::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).is_ok());
    }

    #[test]
    fn slice_and_concat_last_axis() {
        let a = Array::new((0..6).map(f64::from).collect(), &[2, 3]).unwrap();
        let left = a.slice_last(0, 1).unwrap();
        let right = a.slice_last(1, 2).unwrap();
        assert_eq!(left.shape(), &[2, 1]);
        assert_eq!(left.data(), &[0.0, 3.0]);
        assert_eq!(right.data(), &[1.0, 2.0, 4.0, 5.0]);

        let joined = Array::concat_last(&[left, right]).unwrap();
        assert_eq!(joined, a);
    }

    #[test]
    fn concat_rejects_mismatched_prefix() {
        let a = Array::zeros(&[2, 3]);
        let b = Array::zeros(&[3, 3]);
        assert!(Array::concat_last(&[a, b]).is_err());
    }

    #[test]
    fn broadcasting_scalar_and_rows() {
        let a = Array::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let s = Array::scalar(1.0);
        assert_eq!(a.add(&s).unwrap().data(), &[2.0, 3.0, 4.0, 5.0]);

        let row = Array::vector(vec![10.0, 20.0]);
        assert_eq!(a.add(&row).unwrap().data(), &[11.0, 22.0, 13.0, 24.0]);

        let col = Array::new(vec![10.0, 20.0], &[2, 1]).unwrap();
        assert_eq!(a.add(&col).unwrap().data(), &[11.0, 12.0, 23.0, 24.0]);

        assert!(a.add(&Array::zeros(&[3])).is_err());
    }

    #[test]
    fn stack_adds_leading_axis() {
        let a = Array::vector(vec![1.0, 2.0]);
        let b = Array::vector(vec![3.0, 4.0]);
        let s = Array::stack(&[a, b]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn rem_euclid_is_floored() {
        let a = Array::vector(vec![-0.25, 1.25]);
        let m = a.rem_euclid(&Array::scalar(1.0)).unwrap();
        assert!(m.allclose(&Array::vector(vec![0.75, 0.25]), 1e-12));
    }

    #[test]
    fn cast_rounds_to_f32() {
        let a = Array::scalar(0.1).cast(DType::F32);
        assert_eq!(a.dtype(), DType::F32);
        assert_eq!(a.item(), Some(0.1f32 as f64));
    }
}
