//! Valid-range reparameterization.
//!
//! Maps values between their bounded physical range and an unconstrained
//! representation. The map depends on which bounds are present:
//!
//! | bounds      | `to_valid`            | `from_valid`              |
//! |-------------|-----------------------|---------------------------|
//! | none        | identity              | identity                  |
//! | both        | `logit((v-l)/(u-l))`  | `sigmoid(x)*(u-l)+l`      |
//! | both cyclic | `(v-l) mod (u-l) + l` | `(x-l) mod (u-l) + l`     |
//! | lower       | `ln(v-l)`             | `exp(x)+l`                |
//! | upper       | `ln(u-v)`             | `u-exp(x)`                |

use crate::backend::{self, Array};
use crate::error::{Error, Result};

/// Optional lower and upper bounds of a parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidRange {
    pub lower: Option<Array>,
    pub upper: Option<Array>,
}

impl ValidRange {
    pub fn new(lower: Option<Array>, upper: Option<Array>) -> Self {
        Self { lower, upper }
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Reject malformed ranges.
    pub(crate) fn check(&self, cyclic: bool) -> Result<()> {
        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            let ordered = lower.zip_with(upper, |l, u| if l < u { 1.0 } else { 0.0 })?;
            if !backend::current().all(&ordered) {
                return Err(Error::ParamConfiguration(
                    "valid range lower bound must be less than upper bound".to_string(),
                ));
            }
        } else if cyclic {
            return Err(Error::ParamConfiguration(
                "cyclic parameters need both a lower and an upper bound".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether every element of `value` lies inside the range.
    ///
    /// Cyclic ranges contain everything.
    pub(crate) fn contains(&self, value: &Array, cyclic: bool) -> Result<bool> {
        if cyclic {
            return Ok(true);
        }
        let backend = backend::current();
        if let Some(lower) = &self.lower {
            let below = value.zip_with(lower, |v, l| if v < l { 1.0 } else { 0.0 })?;
            if backend.any(&below) {
                return Ok(false);
            }
        }
        if let Some(upper) = &self.upper {
            let above = value.zip_with(upper, |v, u| if v > u { 1.0 } else { 0.0 })?;
            if backend.any(&above) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Physical value to unconstrained representation.
    pub(crate) fn to_valid(&self, value: &Array, cyclic: bool) -> Result<Array> {
        let backend = backend::current();
        match (&self.lower, &self.upper) {
            (None, None) => Ok(value.clone()),
            (Some(lower), Some(upper)) if cyclic => wrap(value, lower, upper),
            (Some(lower), Some(upper)) => {
                let width = upper.sub(lower)?;
                Ok(backend.logit(&value.sub(lower)?.div(&width)?))
            }
            (Some(lower), None) => Ok(backend.log(&value.sub(lower)?)),
            (None, Some(upper)) => Ok(backend.log(&upper.sub(value)?)),
        }
    }

    /// Unconstrained representation back to the physical range.
    pub(crate) fn from_valid(&self, value: &Array, cyclic: bool) -> Result<Array> {
        let backend = backend::current();
        match (&self.lower, &self.upper) {
            (None, None) => Ok(value.clone()),
            (Some(lower), Some(upper)) if cyclic => wrap(value, lower, upper),
            (Some(lower), Some(upper)) => {
                let width = upper.sub(lower)?;
                backend.sigmoid(value).mul(&width)?.add(lower)
            }
            (Some(lower), None) => backend.exp(value).add(lower),
            (None, Some(upper)) => upper.sub(&backend.exp(value)),
        }
    }
}

fn wrap(value: &Array, lower: &Array, upper: &Array) -> Result<Array> {
    let width = upper.sub(lower)?;
    value.sub(lower)?.rem_euclid(&width)?.add(lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(range: &ValidRange, cyclic: bool, value: &Array) {
        let there = range.to_valid(value, cyclic).unwrap();
        let back = range.from_valid(&there, cyclic).unwrap();
        assert!(back.allclose(value, 1e-9), "{back:?} != {value:?}");
    }

    #[test]
    fn unbounded_is_identity() {
        let range = ValidRange::default();
        let v = Array::vector(vec![-5.0, 0.0, 7.5]);
        assert_eq!(range.to_valid(&v, false).unwrap(), v);
    }

    #[test]
    fn both_bounds_round_trip() {
        let range = ValidRange::new(Some(Array::scalar(-1.0)), Some(Array::scalar(3.0)));
        round_trip(&range, false, &Array::vector(vec![-0.5, 0.0, 2.9]));
        let mid = range.to_valid(&Array::scalar(1.0), false).unwrap();
        assert!(mid.item().unwrap().abs() < 1e-12);
    }

    #[test]
    fn single_bound_round_trip() {
        let lower = ValidRange::new(Some(Array::scalar(2.0)), None);
        round_trip(&lower, false, &Array::vector(vec![2.5, 10.0]));
        let upper = ValidRange::new(None, Some(Array::scalar(2.0)));
        round_trip(&upper, false, &Array::vector(vec![-3.0, 1.5]));
    }

    #[test]
    fn cyclic_wraps_into_range() {
        let range = ValidRange::new(Some(Array::scalar(0.0)), Some(Array::scalar(1.0)));
        let wrapped = range.to_valid(&Array::vector(vec![1.25, -0.25]), true).unwrap();
        assert!(wrapped.allclose(&Array::vector(vec![0.25, 0.75]), 1e-12));
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        let reversed = ValidRange::new(Some(Array::scalar(1.0)), Some(Array::scalar(0.0)));
        assert!(reversed.check(false).is_err());
        let open = ValidRange::new(Some(Array::scalar(0.0)), None);
        assert!(open.check(true).is_err());
        assert!(open.check(false).is_ok());
    }

    #[test]
    fn containment() {
        let range = ValidRange::new(Some(Array::scalar(0.0)), Some(Array::scalar(1.0)));
        assert!(range.contains(&Array::scalar(0.5), false).unwrap());
        assert!(!range.contains(&Array::scalar(1.5), false).unwrap());
        assert!(range.contains(&Array::scalar(1.5), true).unwrap());
    }
}
