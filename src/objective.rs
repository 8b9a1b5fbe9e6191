//! Objective evaluation over a sample space.
//!
//! An [`EvaluationSet`] pairs every row of the sample space with the
//! objective's (possibly vector-valued) output, stored in four tables
//! `fM1`, `fM2`, `fN_j`, `fN_nj` that stay index-aligned with the sample
//! matrices. The set can be produced by driving the objective directly, by
//! adopting a precomputed value array, or by reloading exported results,
//! which is how campaigns against an expensive external simulator are split
//! into resumable batches.
//!
//! Rows for which any output component in any family is non-finite are
//! removed from all four tables together, so the remaining sample index
//! space stays contiguous and identical across families. The removal is a
//! reported diagnostic, not an error; the estimator proceeds with the
//! reduced row count.

use std::path::PathBuf;

use log::{debug, warn};
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::checkpoint::{CheckpointRepository, LoadConfig};
use crate::error::{GsaError, Result};
use crate::sample::SampleSpace;

/// A black-box objective mapping a `k`-length parameter vector to a
/// fixed-size vector of outputs.
///
/// The output arity is probed on the first call and every later call must
/// return the same number of values; a mismatch aborts the evaluation with
/// `GsaError::ObjectiveShape`. Implementations must be `Sync` so rows can
/// be evaluated from a parallel loop.
pub trait ObjectiveFn: Sync {
    /// Evaluate the objective at one parameter vector.
    fn evaluate(&self, params: ArrayView1<f64>) -> Vec<f64>;
}

impl<F> ObjectiveFn for F
where
    F: Fn(ArrayView1<f64>) -> Vec<f64> + Sync,
{
    fn evaluate(&self, params: ArrayView1<f64>) -> Vec<f64> {
        self(params)
    }
}

/// Action returned by an evaluation progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep evaluating.
    Continue,
    /// Abort the evaluation with `GsaError::Cancelled`.
    Stop,
}

/// Progress snapshot passed to an evaluation callback.
#[derive(Debug, Clone, Copy)]
pub struct EvalProgress {
    /// Objective calls completed so far.
    pub completed: usize,
    /// Total number of calls the evaluation will make, `2n(1+k)`.
    pub total: usize,
}

/// Progress/cancellation hook invoked at roughly 1% cadence in the serial
/// path and at batch boundaries in the parallel path.
pub type EvalCallback<'a> = &'a (dyn Fn(&EvalProgress) -> CallbackAction + Sync);

/// Knobs for [`EvaluationSet::evaluate_with`].
#[derive(Default)]
pub struct EvalOptions<'a> {
    /// Evaluate sample rows through a rayon parallel loop. Results are
    /// scattered back by absolute row index, so the tables come out
    /// identical to a serial run.
    pub parallel: bool,
    /// Optional progress/cancellation hook.
    pub callback: Option<EvalCallback<'a>>,
}

/// Outcome of the non-finite row reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NanReport {
    /// Sample rows removed from every table.
    pub removed: usize,
    /// Sample rows scanned (the pre-reconciliation base count).
    pub scanned: usize,
}

impl NanReport {
    /// Removed rows as a fraction of scanned rows.
    pub fn fraction(&self) -> f64 {
        if self.scanned == 0 {
            0.0
        } else {
            self.removed as f64 / self.scanned as f64
        }
    }
}

/// Per-row objective outputs for every matrix of a sample space.
#[derive(Debug, Clone)]
pub struct EvaluationSet {
    k: usize,
    n: usize,
    outputs: usize,
    f_m1: Array2<f64>,
    f_m2: Array2<f64>,
    f_n_j: Vec<Array2<f64>>,
    f_n_nj: Vec<Array2<f64>>,
    nan_report: NanReport,
}

impl EvaluationSet {
    /// Evaluate `objective` over every row of `sample`, serially.
    pub fn evaluate(sample: &SampleSpace, objective: &dyn ObjectiveFn) -> Result<Self> {
        Self::evaluate_with(sample, objective, &EvalOptions::default())
    }

    /// Evaluate `objective` over every row of `sample`.
    ///
    /// The output arity is probed on the first `M1` row. Rows are then
    /// evaluated in the fixed order `M1`, `M2`, `N_j[0..k]`, `N_nj[0..k]`,
    /// `2n(1+k)` calls in total, and non-finite rows are reconciled away
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::ObjectiveShape` if a call returns a different
    /// arity than probed and `GsaError::Cancelled` if the callback asks to
    /// stop.
    pub fn evaluate_with(
        sample: &SampleSpace,
        objective: &dyn ObjectiveFn,
        options: &EvalOptions,
    ) -> Result<Self> {
        let k = sample.k();
        let n = sample.n();
        let total = 2 * n * (1 + k);

        let probe = objective.evaluate(sample.m1().row(0));
        let outputs = probe.len();
        if outputs == 0 {
            return Err(GsaError::Config {
                message: "objective returned an empty output vector".to_string(),
            });
        }
        debug!("objective produces {} output component(s)", outputs);

        let mut driver = EvalDriver {
            objective,
            outputs,
            total,
            completed: 1,
            report_every: (total / 100).max(1),
            callback: options.callback,
            parallel: options.parallel,
        };

        debug!("evaluating f(M1), {} rows", n);
        let mut f_m1 = Array2::zeros((n, outputs));
        f_m1.row_mut(0).assign(&ArrayView1::from(&probe[..]));
        driver.fill(sample.m1().view(), &mut f_m1, 1, 0)?;

        debug!("evaluating f(M2), {} rows", n);
        let mut f_m2 = Array2::zeros((n, outputs));
        driver.fill(sample.m2().view(), &mut f_m2, 0, n)?;

        let mut f_n_j = Vec::with_capacity(k);
        for (j, block) in sample.n_j().iter().enumerate() {
            debug!("evaluating f(N_j), parameter {}", j);
            let mut out = Array2::zeros((n, outputs));
            driver.fill(block.view(), &mut out, 0, (2 + j) * n)?;
            f_n_j.push(out);
        }

        let mut f_n_nj = Vec::with_capacity(k);
        for (j, block) in sample.n_nj().iter().enumerate() {
            debug!("evaluating f(N_nj), parameter {}", j);
            let mut out = Array2::zeros((n, outputs));
            driver.fill(block.view(), &mut out, 0, (2 + k + j) * n)?;
            f_n_nj.push(out);
        }

        let mut set = Self {
            k,
            n,
            outputs,
            f_m1,
            f_m2,
            f_n_j,
            f_n_nj,
            nan_report: NanReport::default(),
        };
        set.reconcile();
        Ok(set)
    }

    /// Adopt a precomputed flattened value array of `2n(1+k)` rows.
    pub fn from_values(k: usize, n: usize, values: Array2<f64>) -> Result<Self> {
        Self::from_flat(k, n, values, 1.0)
    }

    /// Reload objective values exported earlier.
    pub fn load(k: usize, n: usize, config: &LoadConfig) -> Result<Self> {
        Self::load_with_divisor(k, n, config, 1.0)
    }

    /// Reload objective values, dividing every value by `divisor`, for
    /// normalizing outputs that were scaled before export.
    pub fn load_with_divisor(
        k: usize,
        n: usize,
        config: &LoadConfig,
        divisor: f64,
    ) -> Result<Self> {
        let table = config.read()?;
        Self::from_flat(k, n, table, divisor)
    }

    fn from_flat(k: usize, n: usize, mut flat: Array2<f64>, divisor: f64) -> Result<Self> {
        if k == 0 || n == 0 {
            return Err(GsaError::Config {
                message: format!("k and n must be positive, got k = {}, n = {}", k, n),
            });
        }
        let expected_rows = 2 * n * (1 + k);
        if flat.nrows() != expected_rows {
            return Err(GsaError::ShapeMismatch {
                expected: format!("({}, m)", expected_rows),
                actual: format!("({}, {})", flat.nrows(), flat.ncols()),
            });
        }
        let outputs = flat.ncols();
        if outputs == 0 {
            return Err(GsaError::Config {
                message: "objective table has no columns".to_string(),
            });
        }
        if divisor != 1.0 {
            flat.mapv_inplace(|v| v / divisor);
        }

        let f_m1 = flat.slice(s![..n, ..]).to_owned();
        let f_m2 = flat.slice(s![n..2 * n, ..]).to_owned();
        let mut f_n_j = Vec::with_capacity(k);
        let mut f_n_nj = Vec::with_capacity(k);
        let mut row = 2 * n;
        for _ in 0..k {
            f_n_j.push(flat.slice(s![row..row + n, ..]).to_owned());
            row += n;
        }
        for _ in 0..k {
            f_n_nj.push(flat.slice(s![row..row + n, ..]).to_owned());
            row += n;
        }

        let mut set = Self {
            k,
            n,
            outputs,
            f_m1,
            f_m2,
            f_n_j,
            f_n_nj,
            nan_report: NanReport::default(),
        };
        set.reconcile();
        Ok(set)
    }

    /// Drop every sample row that carries a non-finite value in any output
    /// component of any family, from all four tables at once.
    fn reconcile(&mut self) {
        let scanned = self.f_m1.nrows();
        let keep: Vec<usize> = (0..scanned).filter(|&i| self.row_is_finite(i)).collect();
        let removed = scanned - keep.len();
        if removed > 0 {
            for table in self.tables_mut() {
                *table = table.select(Axis(0), &keep);
            }
            warn!(
                "{} of {} sample rows had non-finite objective values ({:.2}% loss)",
                removed,
                scanned,
                100.0 * removed as f64 / scanned as f64
            );
        }
        self.nan_report = NanReport { removed, scanned };
    }

    fn row_is_finite(&self, i: usize) -> bool {
        self.tables()
            .all(|table| table.row(i).iter().all(|v| v.is_finite()))
    }

    fn tables(&self) -> impl Iterator<Item = &Array2<f64>> + '_ {
        std::iter::once(&self.f_m1)
            .chain(std::iter::once(&self.f_m2))
            .chain(self.f_n_j.iter())
            .chain(self.f_n_nj.iter())
    }

    fn tables_mut(&mut self) -> impl Iterator<Item = &mut Array2<f64>> + '_ {
        std::iter::once(&mut self.f_m1)
            .chain(std::iter::once(&mut self.f_m2))
            .chain(self.f_n_j.iter_mut())
            .chain(self.f_n_nj.iter_mut())
    }

    /// Number of parameters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Base draw count of the originating design.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Base rows remaining after reconciliation.
    pub fn n_effective(&self) -> usize {
        self.f_m1.nrows()
    }

    /// Number of objective output components.
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Outputs over `M1`, `n' x m`.
    pub fn f_m1(&self) -> &Array2<f64> {
        &self.f_m1
    }

    /// Outputs over `M2`, `n' x m`.
    pub fn f_m2(&self) -> &Array2<f64> {
        &self.f_m2
    }

    /// Outputs over the `N_j` family, `k` tables of `n' x m`.
    pub fn f_n_j(&self) -> &[Array2<f64>] {
        &self.f_n_j
    }

    /// Outputs over the `N_nj` family, `k` tables of `n' x m`.
    pub fn f_n_nj(&self) -> &[Array2<f64>] {
        &self.f_n_nj
    }

    /// Reconciliation diagnostic from construction.
    pub fn nan_report(&self) -> NanReport {
        self.nan_report
    }

    /// Flatten to a single table in the block order
    /// `[fM1; fM2; fN_j[0..k]; fN_nj[0..k]]`, the same wire format as the
    /// sample side, with one column per output component.
    pub fn flatten(&self) -> Array2<f64> {
        let rows = self.f_m1.nrows();
        let mut flat = Array2::zeros((rows * (2 + 2 * self.k), self.outputs));
        let mut row = 0;
        for table in self.tables() {
            flat.slice_mut(s![row..row + rows, ..]).assign(table);
            row += rows;
        }
        flat
    }

    /// Export the flattened table through `repo`, optionally split into
    /// blocks of `block_size` rows. Returns the paths written.
    pub fn export(
        &self,
        repo: &CheckpointRepository,
        block_size: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        repo.export(self.flatten().view(), block_size)
    }
}

/// Shared state for filling one evaluation table at a time.
struct EvalDriver<'a> {
    objective: &'a dyn ObjectiveFn,
    outputs: usize,
    total: usize,
    completed: usize,
    report_every: usize,
    callback: Option<EvalCallback<'a>>,
    parallel: bool,
}

impl EvalDriver<'_> {
    /// Evaluate rows `start..` of `rows` into the matching rows of `out`.
    ///
    /// `base_row` is the absolute index of the block's first row within the
    /// flattened ordering, used for error reporting.
    fn fill(
        &mut self,
        rows: ArrayView2<f64>,
        out: &mut Array2<f64>,
        start: usize,
        base_row: usize,
    ) -> Result<()> {
        if self.parallel {
            return self.fill_parallel(rows, out, start, base_row);
        }
        for i in start..rows.nrows() {
            let y = self.objective.evaluate(rows.row(i));
            if y.len() != self.outputs {
                return Err(GsaError::ObjectiveShape {
                    expected: self.outputs,
                    actual: y.len(),
                    row: base_row + i,
                });
            }
            out.row_mut(i).assign(&ArrayView1::from(&y[..]));
            self.completed += 1;
            if self.completed % self.report_every == 0 {
                self.notify()?;
            }
        }
        Ok(())
    }

    /// Parallel variant: rows are evaluated out of order and scattered
    /// back by explicit row index. The cancellation hook runs at the batch
    /// boundary, before the batch is launched.
    fn fill_parallel(
        &mut self,
        rows: ArrayView2<f64>,
        out: &mut Array2<f64>,
        start: usize,
        base_row: usize,
    ) -> Result<()> {
        self.notify()?;
        let objective = self.objective;
        let outputs = self.outputs;
        let results: std::result::Result<Vec<(usize, Vec<f64>)>, GsaError> = (start..rows.nrows())
            .into_par_iter()
            .map(|i| {
                let y = objective.evaluate(rows.row(i));
                if y.len() != outputs {
                    Err(GsaError::ObjectiveShape {
                        expected: outputs,
                        actual: y.len(),
                        row: base_row + i,
                    })
                } else {
                    Ok((i, y))
                }
            })
            .collect();
        for (i, y) in results? {
            out.row_mut(i).assign(&ArrayView1::from(&y[..]));
        }
        self.completed += rows.nrows() - start;
        Ok(())
    }

    fn notify(&self) -> Result<()> {
        if let Some(callback) = self.callback {
            let progress = EvalProgress {
                completed: self.completed,
                total: self.total,
            };
            if callback(&progress) == CallbackAction::Stop {
                return Err(GsaError::Cancelled {
                    completed: self.completed,
                    total: self.total,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::IdentityScaling;
    use crate::sequence::Halton;
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(k: usize, n: usize) -> SampleSpace {
        let mut seq = Halton::new(k);
        SampleSpace::generate(k, n, &IdentityScaling, &mut seq, 0).unwrap()
    }

    /// Row sum keeps outputs traceable to their input row.
    fn row_sum(params: ArrayView1<f64>) -> Vec<f64> {
        vec![params.sum()]
    }

    #[test]
    fn test_rows_stay_aligned_with_sample() {
        let space = sample(3, 8);
        let set = EvaluationSet::evaluate(&space, &row_sum).unwrap();
        assert_eq!(set.outputs(), 1);
        assert_eq!(set.n_effective(), 8);
        for i in 0..8 {
            assert_eq!(set.f_m1()[[i, 0]], space.m1().row(i).sum());
            assert_eq!(set.f_m2()[[i, 0]], space.m2().row(i).sum());
            for j in 0..3 {
                assert_eq!(set.f_n_j()[j][[i, 0]], space.n_j()[j].row(i).sum());
                assert_eq!(set.f_n_nj()[j][[i, 0]], space.n_nj()[j].row(i).sum());
            }
        }
    }

    #[test]
    fn test_parallel_matches_serial() {
        let space = sample(4, 16);
        let objective = |p: ArrayView1<f64>| vec![p.sum(), p.product()];
        let serial = EvaluationSet::evaluate(&space, &objective).unwrap();
        let options = EvalOptions {
            parallel: true,
            ..EvalOptions::default()
        };
        let parallel = EvaluationSet::evaluate_with(&space, &objective, &options).unwrap();
        assert_eq!(serial.f_m1(), parallel.f_m1());
        assert_eq!(serial.f_m2(), parallel.f_m2());
        for j in 0..4 {
            assert_eq!(serial.f_n_j()[j], parallel.f_n_j()[j]);
            assert_eq!(serial.f_n_nj()[j], parallel.f_n_nj()[j]);
        }
    }

    #[test]
    fn test_inconsistent_arity_is_fatal() {
        let space = sample(2, 4);
        let calls = AtomicUsize::new(0);
        let objective = move |_p: ArrayView1<f64>| {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                vec![1.0]
            } else {
                vec![1.0, 2.0]
            }
        };
        let err = EvaluationSet::evaluate(&space, &objective).unwrap_err();
        assert!(matches!(
            err,
            GsaError::ObjectiveShape {
                expected: 1,
                actual: 2,
                row: 3
            }
        ));
    }

    #[test]
    fn test_callback_can_cancel() {
        let space = sample(2, 4);
        let callback = |_p: &EvalProgress| CallbackAction::Stop;
        let options = EvalOptions {
            parallel: false,
            callback: Some(&callback),
        };
        let err = EvaluationSet::evaluate_with(&space, &row_sum, &options).unwrap_err();
        assert!(matches!(err, GsaError::Cancelled { .. }));
    }

    #[test]
    fn test_nan_rows_pruned_from_every_table() {
        let k = 2;
        let n = 4;
        let rows = 2 * n * (1 + k);
        let mut values = Array2::from_shape_fn((rows, 1), |(r, _)| r as f64);
        // Poison base row 1 inside the fN_j[1] block.
        values[[2 * n + n + 1, 0]] = f64::NAN;
        let set = EvaluationSet::from_values(k, n, values).unwrap();
        assert_eq!(set.n_effective(), 3);
        assert_eq!(set.nan_report().removed, 1);
        for table in [set.f_m1(), set.f_m2()]
            .into_iter()
            .chain(set.f_n_j().iter())
            .chain(set.f_n_nj().iter())
        {
            assert_eq!(table.nrows(), 3);
        }
        // Row 1 disappeared; rows 0, 2, 3 remain in order.
        assert_eq!(set.f_m1()[[0, 0]], 0.0);
        assert_eq!(set.f_m1()[[1, 0]], 2.0);
        assert_eq!(set.f_m1()[[2, 0]], 3.0);
    }

    #[test]
    fn test_wrong_row_count_is_rejected() {
        let err = EvaluationSet::from_values(2, 4, Array2::zeros((10, 1))).unwrap_err();
        match err {
            GsaError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, "(24, m)");
                assert_eq!(actual, "(10, 1)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_divisor_rescales() {
        let k = 1;
        let n = 2;
        let rows = 2 * n * (1 + k);
        let values = Array2::from_elem((rows, 1), 10.0);
        let set = EvaluationSet::from_flat(k, n, values, 4.0).unwrap();
        assert_eq!(set.f_m1()[[0, 0]], 2.5);
    }

    #[test]
    fn test_flatten_matches_from_values() {
        let k = 2;
        let n = 3;
        let rows = 2 * n * (1 + k);
        let values = Array2::from_shape_fn((rows, 2), |(r, c)| (r * 2 + c) as f64);
        let set = EvaluationSet::from_values(k, n, values.clone()).unwrap();
        assert_eq!(set.flatten(), values);
    }
}
