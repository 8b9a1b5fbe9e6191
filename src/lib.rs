//! Variance-based global sensitivity analysis via the Sobol-Saltelli
//! method.
//!
//! Given a black-box objective `f : R^k -> R^m` and a budget of `2n(1+k)`
//! evaluations, this crate builds the Saltelli sample design (two
//! independent quasi-random base matrices plus their column-swapped
//! resample families), drives the objective over every row, and computes
//! first-order, total-order and second-order sensitivity indices per
//! output component.
//!
//! The three stages (sample space, evaluation set, estimator) can each
//! be exported to delimited-text blocks and reloaded, so a single logical
//! computation can be split across many batches against an expensive
//! external evaluator (the motivating use case being ODE/stochastic
//! simulators run on batch GPU solvers) and resumed without losing row
//! correspondence.
//!
//! ```
//! use gsa::{Halton, SampleSpace, Sensitivity, SequenceSource};
//!
//! // Fraction of output variance attributable to each of two parameters.
//! let objective = |p: ndarray::ArrayView1<f64>| vec![2.0 * p[0] + 0.1 * p[1]];
//! let mut sequence = Halton::new(2);
//! sequence.discard(40);
//! let draws = sequence.take(2 * 1024);
//! let sample = SampleSpace::from_raw(2, 1024, &draws, None)?;
//! let sens = Sensitivity::from_sample(&sample, &objective)?;
//! assert!(sens.first_order()[[0, 0]] > sens.first_order()[[1, 0]]);
//! # Ok::<(), gsa::GsaError>(())
//! ```

/// Error types for gsa operations.
pub mod error;
pub use error::{GsaError, Result};

/// Block export/import and load configuration.
pub mod checkpoint;
/// Saltelli estimators.
pub mod estimator;
/// Objective evaluation bookkeeping.
pub mod objective;
/// Sample-space construction.
pub mod sample;
/// Unit-hypercube to parameter-domain mappings.
pub mod scaling;
/// Low-discrepancy sequence sources.
pub mod sequence;
/// Delimited-text numeric tables.
pub mod table;

// Re-export the main types.
pub use checkpoint::{CheckpointManifest, CheckpointRepository, LoadConfig};
pub use estimator::Sensitivity;
pub use objective::{
    CallbackAction, EvalCallback, EvalOptions, EvalProgress, EvaluationSet, NanReport, ObjectiveFn,
};
pub use sample::SampleSpace;
pub use scaling::{IdentityScaling, LinearScaling, LogScaling, Scaling};
pub use sequence::{Halton, SequenceSource};
