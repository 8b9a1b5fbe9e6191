//! Closed-form Saltelli estimators.
//!
//! Turns a reconciled [`EvaluationSet`] into variance, squared-mean and
//! sensitivity indices, per output component. The squared mean is
//! estimated as the cross product of the two base-matrix outputs, which
//! avoids the bias of squaring a sample mean, and the `U` terms average
//! two equivalent single-matrix formulas to reduce estimator variance.
//!
//! All quantities are pure functions of the evaluation set, computed once
//! at construction; nothing here mutates its input.

use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

use crate::error::{GsaError, Result};
use crate::objective::{EvaluationSet, ObjectiveFn};
use crate::sample::SampleSpace;
use crate::scaling::Scaling;
use crate::sequence::SequenceSource;

/// Variance decomposition of one evaluated design.
///
/// First- and total-order indices are `k x m` (parameter by output
/// component); the raw second-order estimators are `k x k x m`. The raw
/// second-order values measure joint variance contributions; isolating a
/// pure interaction term by subtracting the two first-order terms is left
/// to the consumer.
#[derive(Debug, Clone)]
pub struct Sensitivity {
    k: usize,
    outputs: usize,
    n_effective: usize,
    var_y: Array1<f64>,
    e2: Array1<f64>,
    first_order: Array2<f64>,
    total_order: Array2<f64>,
    second_order: Array3<f64>,
    second_order_same: Array3<f64>,
}

impl Sensitivity {
    /// Compute the sensitivity indices of a reconciled evaluation set.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::Config` when fewer than two base rows survived
    /// reconciliation and `GsaError::DegenerateVariance` when any output
    /// component has (near-)zero variance: a constant objective cannot be
    /// decomposed and dividing by its variance would only produce noise.
    pub fn from_evaluations(evals: &EvaluationSet) -> Result<Self> {
        let k = evals.k();
        let outputs = evals.outputs();
        let n = evals.n_effective();
        if n < 2 {
            return Err(GsaError::Config {
                message: format!(
                    "sensitivity estimation needs at least two base rows, {} left after reconciliation",
                    n
                ),
            });
        }
        debug!(
            "estimating indices for k = {}, m = {}, n' = {}",
            k, outputs, n
        );

        let f_m1 = evals.f_m1();
        let f_m2 = evals.f_m2();
        let nf = n as f64;

        let e2 = (f_m1 * f_m2).sum_axis(Axis(0)) / nf;
        let var_y = pooled_variance(f_m1.view(), f_m2.view());
        for (component, (&var, &e2_c)) in var_y.iter().zip(e2.iter()).enumerate() {
            if var <= f64::EPSILON * (1.0 + e2_c.abs()) {
                return Err(GsaError::DegenerateVariance {
                    component,
                    variance: var,
                });
            }
        }

        let half_pairs = 2.0 * (nf - 1.0);
        let mut first_order = Array2::zeros((k, outputs));
        let mut total_order = Array2::zeros((k, outputs));
        for p in 0..k {
            let f_n_j = &evals.f_n_j()[p];
            let f_n_nj = &evals.f_n_nj()[p];
            for c in 0..outputs {
                let u_j = (f_m1.column(c).dot(&f_n_j.column(c))
                    + f_m2.column(c).dot(&f_n_nj.column(c)))
                    / half_pairs;
                let u_nj = (f_m1.column(c).dot(&f_n_nj.column(c))
                    + f_m2.column(c).dot(&f_n_j.column(c)))
                    / half_pairs;
                first_order[[p, c]] = (u_j - e2[c]) / var_y[c];
                total_order[[p, c]] = 1.0 - (u_nj - e2[c]) / var_y[c];
            }
        }

        let mut second_order = Array3::zeros((k, k, outputs));
        let mut second_order_same = Array3::zeros((k, k, outputs));
        for p in 0..k {
            for q in 0..k {
                for c in 0..outputs {
                    let nj_p = evals.f_n_j()[p].column(c);
                    let nj_q = evals.f_n_j()[q].column(c);
                    let nnj_p = evals.f_n_nj()[p].column(c);
                    let nnj_q = evals.f_n_nj()[q].column(c);
                    let cross = (nnj_p.dot(&nj_q) + nj_p.dot(&nnj_q)) / half_pairs;
                    second_order[[p, q, c]] = (cross - e2[c]) / var_y[c];
                    let same = (nnj_p.dot(&nnj_q) + nj_p.dot(&nj_q)) / half_pairs;
                    second_order_same[[p, q, c]] = (same - e2[c]) / var_y[c];
                }
            }
        }

        Ok(Self {
            k,
            outputs,
            n_effective: n,
            var_y,
            e2,
            first_order,
            total_order,
            second_order,
            second_order_same,
        })
    }

    /// Evaluate `objective` over a prebuilt sample space, then estimate.
    pub fn from_sample(sample: &SampleSpace, objective: &dyn ObjectiveFn) -> Result<Self> {
        let evals = EvaluationSet::evaluate(sample, objective)?;
        Self::from_evaluations(&evals)
    }

    /// Build a fresh design from `(k, n, scaling, sequence)`, evaluate
    /// `objective` over it, and estimate.
    pub fn from_design(
        k: usize,
        n: usize,
        scaling: &dyn Scaling,
        sequence: &mut dyn SequenceSource,
        objective: &dyn ObjectiveFn,
    ) -> Result<Self> {
        let sample = SampleSpace::generate(k, n, scaling, sequence, 0)?;
        Self::from_sample(&sample, objective)
    }

    /// Number of parameters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of objective output components.
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Base rows the estimate was computed from.
    pub fn n_effective(&self) -> usize {
        self.n_effective
    }

    /// Bessel-corrected output variance, pooled over both base matrices,
    /// per output component.
    pub fn var_y(&self) -> &Array1<f64> {
        &self.var_y
    }

    /// Cross-product estimate of the squared mean, per output component.
    pub fn e2(&self) -> &Array1<f64> {
        &self.e2
    }

    /// First-order indices, `k x m`: variance fraction explained by each
    /// parameter alone.
    pub fn first_order(&self) -> &Array2<f64> {
        &self.first_order
    }

    /// Total-order indices, `k x m`: variance fraction explained by each
    /// parameter including all its interactions.
    pub fn total_order(&self) -> &Array2<f64> {
        &self.total_order
    }

    /// Raw second-order estimator from cross-family pairs, `k x k x m`.
    pub fn second_order(&self) -> &Array3<f64> {
        &self.second_order
    }

    /// Raw second-order estimator from same-family pairs, `k x k x m`.
    pub fn second_order_same(&self) -> &Array3<f64> {
        &self.second_order_same
    }
}

/// Sample variance (divisor `rows - 1`) of the row-concatenation of two
/// equally shaped tables, per column.
fn pooled_variance(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array1<f64> {
    let rows = (a.nrows() + b.nrows()) as f64;
    let mean = (a.sum_axis(Axis(0)) + b.sum_axis(Axis(0))) / rows;
    let mut sum_sq = Array1::zeros(a.ncols());
    for row in a.rows().into_iter().chain(b.rows()) {
        sum_sq += &(&row - &mean).mapv(|d| d * d);
    }
    sum_sq / (rows - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_pooled_variance_matches_direct_formula() {
        let a = array![[1.0], [2.0]];
        let b = array![[3.0], [4.0]];
        // Sample variance of {1,2,3,4} with divisor 3.
        let var = pooled_variance(a.view(), b.view());
        assert!(close(var[0], 5.0 / 3.0));
    }

    #[test]
    fn test_constant_objective_is_degenerate() {
        let k = 2;
        let n = 4;
        let values = Array2::from_elem((2 * n * (1 + k), 1), 3.0);
        let evals = EvaluationSet::from_values(k, n, values).unwrap();
        let err = Sensitivity::from_evaluations(&evals).unwrap_err();
        assert!(matches!(
            err,
            GsaError::DegenerateVariance { component: 0, .. }
        ));
    }

    #[test]
    fn test_too_few_rows_rejected() {
        let k = 1;
        let n = 2;
        let mut values = Array2::from_shape_fn((2 * n * (1 + k), 1), |(r, _)| r as f64);
        // Poison one of the two base rows to leave a single survivor.
        values[[0, 0]] = f64::NAN;
        let evals = EvaluationSet::from_values(k, n, values).unwrap();
        let err = Sensitivity::from_evaluations(&evals).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_second_order_is_symmetric() {
        let k = 3;
        let n = 16;
        let values =
            Array2::from_shape_fn((2 * n * (1 + k), 2), |(r, c)| ((r * 7 + c * 3) % 11) as f64);
        let evals = EvaluationSet::from_values(k, n, values).unwrap();
        let sens = Sensitivity::from_evaluations(&evals).unwrap();
        for p in 0..k {
            for q in 0..k {
                for c in 0..2 {
                    assert!(close(
                        sens.second_order()[[p, q, c]],
                        sens.second_order()[[q, p, c]]
                    ));
                    assert!(close(
                        sens.second_order_same()[[p, q, c]],
                        sens.second_order_same()[[q, p, c]]
                    ));
                }
            }
        }
    }
}
