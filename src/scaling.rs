//! Mapping from the unit hypercube to the physical parameter domain.
//!
//! Sequence sources draw points in `[0,1)^k`; a [`Scaling`] maps each point
//! to the ranges the objective function expects. Linear and log-uniform
//! helpers cover the common cases (log-uniform in particular for rate
//! constants spanning orders of magnitude).

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{GsaError, Result};

/// Maps unit-hypercube points to the physical parameter domain.
///
/// The returned vector must have the same length as the input; the sample
/// builder applies the mapping row by row and stores the result in place of
/// the raw draw.
pub trait Scaling {
    /// Map a single `k`-length point from `[0,1)^k` to the target domain.
    fn scale_point(&self, point: ArrayView1<f64>) -> Array1<f64>;

    /// Map every row of a `rows x k` matrix.
    fn scale_matrix(&self, points: ArrayView2<f64>) -> Array2<f64> {
        let mut scaled = Array2::zeros(points.raw_dim());
        for (i, row) in points.rows().into_iter().enumerate() {
            scaled.row_mut(i).assign(&self.scale_point(row));
        }
        scaled
    }
}

impl<F> Scaling for F
where
    F: Fn(ArrayView1<f64>) -> Array1<f64>,
{
    fn scale_point(&self, point: ArrayView1<f64>) -> Array1<f64> {
        self(point)
    }
}

/// Leaves points on the unit hypercube untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityScaling;

impl Scaling for IdentityScaling {
    fn scale_point(&self, point: ArrayView1<f64>) -> Array1<f64> {
        point.to_owned()
    }
}

/// Per-coordinate affine map from `[0,1)` to `[lower_i, upper_i)`.
#[derive(Debug, Clone)]
pub struct LinearScaling {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl LinearScaling {
    /// Create a linear scaling from per-parameter bounds.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::Config` if the bound vectors differ in length or
    /// any upper bound is below its lower bound.
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(GsaError::Config {
                message: format!(
                    "bound vectors differ in length: lower={}, upper={}",
                    lower.len(),
                    upper.len()
                ),
            });
        }
        if let Some(i) = (0..lower.len()).find(|&i| upper[i] < lower[i]) {
            return Err(GsaError::Config {
                message: format!(
                    "upper bound {} is below lower bound {} for parameter {}",
                    upper[i], lower[i], i
                ),
            });
        }
        Ok(Self { lower, upper })
    }
}

impl Scaling for LinearScaling {
    fn scale_point(&self, point: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(point.len(), |i| {
            self.lower[i] + point[i] * (self.upper[i] - self.lower[i])
        })
    }
}

/// Per-coordinate log-uniform map from `[0,1)` to `[lower_i, upper_i)`.
#[derive(Debug, Clone)]
pub struct LogScaling {
    log_lower: Array1<f64>,
    log_span: Array1<f64>,
}

impl LogScaling {
    /// Create a log-uniform scaling from strictly positive per-parameter bounds.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::Config` if the bound vectors differ in length or
    /// any bound is not strictly positive and ordered.
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(GsaError::Config {
                message: format!(
                    "bound vectors differ in length: lower={}, upper={}",
                    lower.len(),
                    upper.len()
                ),
            });
        }
        if let Some(i) = (0..lower.len()).find(|&i| lower[i] <= 0.0 || upper[i] < lower[i]) {
            return Err(GsaError::Config {
                message: format!(
                    "log scaling requires 0 < lower <= upper, got [{}, {}] for parameter {}",
                    lower[i], upper[i], i
                ),
            });
        }
        let log_lower = lower.mapv(f64::ln);
        let log_span = upper.mapv(f64::ln) - &log_lower;
        Ok(Self {
            log_lower,
            log_span,
        })
    }
}

impl Scaling for LogScaling {
    fn scale_point(&self, point: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(point.len(), |i| {
            (self.log_lower[i] + point[i] * self.log_span[i]).exp()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_scaling_maps_bounds() {
        let scaling = LinearScaling::new(array![0.0, -10.0], array![2.0, 10.0]).unwrap();
        let scaled = scaling.scale_point(array![0.5, 0.0].view());
        assert_eq!(scaled, array![1.0, -10.0]);
    }

    #[test]
    fn test_linear_scaling_rejects_mismatched_bounds() {
        let err = LinearScaling::new(array![0.0], array![1.0, 2.0]).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_log_scaling_endpoints() {
        let scaling = LogScaling::new(array![1e-3], array![1e3]).unwrap();
        let low = scaling.scale_point(array![0.0].view());
        let mid = scaling.scale_point(array![0.5].view());
        let high = scaling.scale_point(array![1.0].view());
        assert!((low[0] - 1e-3).abs() < 1e-12);
        assert!((mid[0] - 1.0).abs() < 1e-12);
        assert!((high[0] - 1e3).abs() < 1e-9);
    }

    #[test]
    fn test_log_scaling_rejects_nonpositive_bounds() {
        let err = LogScaling::new(array![0.0], array![1.0]).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_closure_scaling() {
        let double = |p: ArrayView1<f64>| p.mapv(|v| 2.0 * v);
        let scaled = double.scale_matrix(array![[0.5, 1.0], [0.25, 0.75]].view());
        assert_eq!(scaled, array![[1.0, 2.0], [0.5, 1.5]]);
    }
}
