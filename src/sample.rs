//! Sample-space construction for the Saltelli estimator.
//!
//! A sample space holds the two independent base matrices `M1` and `M2`
//! (`n x k` each, already scaled to the physical domain) and the two
//! resample families `N_j` and `N_nj`, where `N_j[j]` is `M2` with column
//! `j` taken from `M1` and `N_nj[j]` is `M1` with column `j` taken from
//! `M2`. This column-swap design lets one matrix pair estimate all `k`
//! conditional variances from `2n(1+k)` objective evaluations.
//!
//! Statistical independence of `M1` and `M2` is what keeps the estimator
//! unbiased; when the two halves come from a caller-supplied array the rows
//! of `M2` are reshuffled with a fixed seed to break any residual
//! correlation between them.

use std::path::PathBuf;

use log::debug;
use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::checkpoint::{CheckpointRepository, LoadConfig};
use crate::error::{GsaError, Result};
use crate::scaling::Scaling;
use crate::sequence::SequenceSource;

/// Multiplier for the burn-in prefix discarded from the sequence source.
///
/// The first points of a Halton-type sequence carry a linear-correlation
/// artifact across dimensions; dropping `20 * k` points clears it.
pub const BURN_IN_FACTOR: usize = 20;

/// Seed for the deterministic `M2` row shuffle on the raw-array path.
const DECORRELATION_SEED: u64 = 1;

/// The scaled sample matrices and resample families for one analysis.
///
/// Immutable once built; an evaluation run reads it without modifying it.
#[derive(Debug, Clone)]
pub struct SampleSpace {
    k: usize,
    n: usize,
    m1: Array2<f64>,
    m2: Array2<f64>,
    n_j: Vec<Array2<f64>>,
    n_nj: Vec<Array2<f64>>,
}

impl SampleSpace {
    /// Build a sample space from fresh low-discrepancy draws.
    ///
    /// Discards `BURN_IN_FACTOR * k + discard` points from `sequence`, draws
    /// `2n` more, splits them into the two base matrices and applies
    /// `scaling` to both before deriving the resample families. `discard`
    /// extends the burn-in so a campaign can continue past a previous one.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::Config` for zero `k`/`n` or a sequence of the
    /// wrong dimension, and `GsaError::ShapeMismatch` if the source returns
    /// a malformed block.
    pub fn generate(
        k: usize,
        n: usize,
        scaling: &dyn Scaling,
        sequence: &mut dyn SequenceSource,
        discard: usize,
    ) -> Result<Self> {
        validate_dimensions(k, n)?;
        if sequence.dimension() != k {
            return Err(GsaError::Config {
                message: format!(
                    "sequence source has dimension {}, expected k = {}",
                    sequence.dimension(),
                    k
                ),
            });
        }

        debug!("discarding {} burn-in points", BURN_IN_FACTOR * k + discard);
        sequence.discard(BURN_IN_FACTOR * k + discard);

        debug!("drawing {} points", 2 * n);
        let draws = sequence.take(2 * n);
        if draws.dim() != (2 * n, k) {
            return Err(GsaError::ShapeMismatch {
                expected: format!("({}, {})", 2 * n, k),
                actual: format!("({}, {})", draws.nrows(), draws.ncols()),
            });
        }

        let m1 = scaling.scale_matrix(draws.slice(s![..n, ..]));
        let m2 = scaling.scale_matrix(draws.slice(s![n.., ..]));
        Ok(Self::from_halves(k, n, m1, m2))
    }

    /// Build a sample space from a caller-supplied unscaled `2n x k` array.
    ///
    /// The rows of the second half are reshuffled with a fixed seed after
    /// scaling, so two halves cut from one externally generated stream do
    /// not stay correlated. Without `scaling` the array is used as-is.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::ShapeMismatch` when `raw` is not `(2n, k)`.
    pub fn from_raw(
        k: usize,
        n: usize,
        raw: &Array2<f64>,
        scaling: Option<&dyn Scaling>,
    ) -> Result<Self> {
        validate_dimensions(k, n)?;
        if raw.dim() != (2 * n, k) {
            return Err(GsaError::ShapeMismatch {
                expected: format!("({}, {})", 2 * n, k),
                actual: format!("({}, {})", raw.nrows(), raw.ncols()),
            });
        }
        let (m1, m2) = scale_halves(n, raw, scaling);
        debug!("reshuffling M2 rows to break half-to-half correlation");
        let m2 = decorrelate(&m2);
        Ok(Self::from_halves(k, n, m1, m2))
    }

    /// Reload a sample space exported earlier, or adopt an externally
    /// generated design.
    ///
    /// Two shapes are accepted: `(2n, k)` is treated as a raw unscaled
    /// design (requires `scaling`, which is applied before the resample
    /// derivation), and `(2n(1+k), k)` as a fully flattened, already-scaled
    /// space that is sliced directly into its blocks.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::Config` when the file set is under-specified or a
    /// `(2n, k)` design arrives without `scaling`, `GsaError::MissingFile`
    /// for absent inputs, and `GsaError::ShapeMismatch` for any other shape.
    pub fn load(
        k: usize,
        n: usize,
        config: &LoadConfig,
        scaling: Option<&dyn Scaling>,
    ) -> Result<Self> {
        validate_dimensions(k, n)?;
        let table = config.read()?;

        if table.dim() == (2 * n, k) {
            if scaling.is_none() {
                return Err(GsaError::Config {
                    message: "loading an unscaled (2n, k) design requires a scaling function"
                        .to_string(),
                });
            }
            let (m1, m2) = scale_halves(n, &table, scaling);
            return Ok(Self::from_halves(k, n, m1, m2));
        }

        if table.dim() == (2 * n * (1 + k), k) {
            debug!("flattened sample detected");
            return Ok(Self::from_flattened(k, n, &table));
        }

        Err(GsaError::ShapeMismatch {
            expected: format!("({}, {}) or ({}, {})", 2 * n, k, 2 * n * (1 + k), k),
            actual: format!("({}, {})", table.nrows(), table.ncols()),
        })
    }

    /// Slice a flattened `(2n(1+k), k)` table back into its blocks.
    fn from_flattened(k: usize, n: usize, flat: &Array2<f64>) -> Self {
        let m1 = flat.slice(s![..n, ..]).to_owned();
        let m2 = flat.slice(s![n..2 * n, ..]).to_owned();
        let mut n_j = Vec::with_capacity(k);
        let mut n_nj = Vec::with_capacity(k);
        let mut row = 2 * n;
        for _ in 0..k {
            n_j.push(flat.slice(s![row..row + n, ..]).to_owned());
            row += n;
        }
        for _ in 0..k {
            n_nj.push(flat.slice(s![row..row + n, ..]).to_owned());
            row += n;
        }
        Self {
            k,
            n,
            m1,
            m2,
            n_j,
            n_nj,
        }
    }

    /// Derive the resample families from scaled base matrices.
    fn from_halves(k: usize, n: usize, m1: Array2<f64>, m2: Array2<f64>) -> Self {
        let mut n_j = Vec::with_capacity(k);
        let mut n_nj = Vec::with_capacity(k);
        for j in 0..k {
            let mut with_j = m2.clone();
            with_j.column_mut(j).assign(&m1.column(j));
            n_j.push(with_j);

            let mut without_j = m1.clone();
            without_j.column_mut(j).assign(&m2.column(j));
            n_nj.push(without_j);
        }
        Self {
            k,
            n,
            m1,
            m2,
            n_j,
            n_nj,
        }
    }

    /// Number of parameters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of base draws per matrix.
    pub fn n(&self) -> usize {
        self.n
    }

    /// First base matrix, `n x k`.
    pub fn m1(&self) -> &Array2<f64> {
        &self.m1
    }

    /// Second base matrix, `n x k`.
    pub fn m2(&self) -> &Array2<f64> {
        &self.m2
    }

    /// Resample family `N_j`: `N_j[j]` is `M2` with column `j` from `M1`.
    pub fn n_j(&self) -> &[Array2<f64>] {
        &self.n_j
    }

    /// Resample family `N_nj`: `N_nj[j]` is `M1` with column `j` from `M2`.
    pub fn n_nj(&self) -> &[Array2<f64>] {
        &self.n_nj
    }

    /// Total number of sample rows, `2n(1+k)`.
    pub fn total_rows(&self) -> usize {
        2 * self.n * (1 + self.k)
    }

    /// Flatten to a single `(2n(1+k), k)` table in the fixed block order
    /// `[M1; M2; N_j[0..k]; N_nj[0..k]]`, each block in original row order.
    ///
    /// This ordering is the wire format; export and load preserve it
    /// exactly.
    pub fn flatten(&self) -> Array2<f64> {
        let mut flat = Array2::zeros((self.total_rows(), self.k));
        let n = self.n;
        flat.slice_mut(s![..n, ..]).assign(&self.m1);
        flat.slice_mut(s![n..2 * n, ..]).assign(&self.m2);
        let mut row = 2 * n;
        for block in self.n_j.iter().chain(self.n_nj.iter()) {
            flat.slice_mut(s![row..row + n, ..]).assign(block);
            row += n;
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

fn validate_dimensions(k: usize, n: usize) -> Result<()> {
    if k == 0 || n == 0 {
        return Err(GsaError::Config {
            message: format!("k and n must be positive, got k = {}, n = {}", k, n),
        });
    }
    Ok(())
}

fn scale_halves(
    n: usize,
    raw: &Array2<f64>,
    scaling: Option<&dyn Scaling>,
) -> (Array2<f64>, Array2<f64>) {
    match scaling {
        Some(scaling) => (
            scaling.scale_matrix(raw.slice(s![..n, ..])),
            scaling.scale_matrix(raw.slice(s![n.., ..])),
        ),
        None => (
            raw.slice(s![..n, ..]).to_owned(),
            raw.slice(s![n.., ..]).to_owned(),
        ),
    }
}

/// Reorder the rows of `m2` with a fixed-seed permutation.
fn decorrelate(m2: &Array2<f64>) -> Array2<f64> {
    let mut order: Vec<usize> = (0..m2.nrows()).collect();
    let mut rng = StdRng::seed_from_u64(DECORRELATION_SEED);
    order.shuffle(&mut rng);
    m2.select(Axis(0), &order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::IdentityScaling;
    use crate::sequence::Halton;

    fn build(k: usize, n: usize) -> SampleSpace {
        let mut seq = Halton::new(k);
        SampleSpace::generate(k, n, &IdentityScaling, &mut seq, 0).unwrap()
    }

    /// Count columns on which two matrices differ anywhere.
    fn differing_columns(a: &Array2<f64>, b: &Array2<f64>) -> Vec<usize> {
        (0..a.ncols())
            .filter(|&c| a.column(c) != b.column(c))
            .collect()
    }

    #[test]
    fn test_resamples_differ_in_exactly_one_column() {
        let sample = build(4, 16);
        for j in 0..4 {
            assert_eq!(differing_columns(&sample.n_j()[j], sample.m2()), vec![j]);
            assert_eq!(differing_columns(&sample.n_nj()[j], sample.m1()), vec![j]);
            assert_eq!(sample.n_j()[j].column(j), sample.m1().column(j));
            assert_eq!(sample.n_nj()[j].column(j), sample.m2().column(j));
        }
    }

    #[test]
    fn test_flatten_shape_and_block_order() {
        let sample = build(3, 8);
        let flat = sample.flatten();
        assert_eq!(flat.dim(), (2 * 8 * (1 + 3), 3));
        assert_eq!(flat.slice(s![..8, ..]), sample.m1().view());
        assert_eq!(flat.slice(s![8..16, ..]), sample.m2().view());
        assert_eq!(flat.slice(s![16..24, ..]), sample.n_j()[0].view());
        let last = 2 * 8 * (1 + 3);
        assert_eq!(flat.slice(s![last - 8..last, ..]), sample.n_nj()[2].view());
    }

    #[test]
    fn test_from_raw_rejects_wrong_shape() {
        let raw = Array2::zeros((5, 3));
        let err = SampleSpace::from_raw(3, 4, &raw, None).unwrap_err();
        match err {
            GsaError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, "(8, 3)");
                assert_eq!(actual, "(5, 3)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_raw_shuffle_is_deterministic() {
        let raw = Array2::from_shape_fn((12, 2), |(r, c)| (r * 2 + c) as f64);
        let a = SampleSpace::from_raw(2, 6, &raw, None).unwrap();
        let b = SampleSpace::from_raw(2, 6, &raw, None).unwrap();
        assert_eq!(a.m2(), b.m2());
        // M1 is never shuffled.
        assert_eq!(a.m1(), &raw.slice(s![..6, ..]).to_owned());
        // The shuffle permutes rows without changing their contents.
        let mut seen: Vec<f64> = a.m2().column(0).to_vec();
        seen.sort_by(|x, y| x.partial_cmp(y).unwrap());
        let expected: Vec<f64> = raw.slice(s![6.., ..]).column(0).to_vec();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_generate_requires_matching_sequence_dimension() {
        let mut seq = Halton::new(2);
        let err = SampleSpace::generate(3, 4, &IdentityScaling, &mut seq, 0).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let mut seq = Halton::new(2);
        let err = SampleSpace::generate(0, 4, &IdentityScaling, &mut seq, 0).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_discard_offsets_the_sequence() {
        // With n extra discards, the new M1 starts where the old M2 did.
        let mut seq = Halton::new(2);
        let a = SampleSpace::generate(2, 4, &IdentityScaling, &mut seq, 0).unwrap();
        let mut seq = Halton::new(2);
        let b = SampleSpace::generate(2, 4, &IdentityScaling, &mut seq, 4).unwrap();
        assert_eq!(b.m1(), a.m2());
    }
}
