//! Temporal normalization: per-(variable, grid-cell) standardization
//! across the time axis of a training dataset.
//!
//! Stats are fit once on the training dataset, persisted inside the model
//! artifact, and re-applied verbatim at inference time. Inference never
//! refits. A constant (zero-variance) cell is rejected explicitly rather
//! than letting a divide-by-zero leak NaN into training.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::types::{Dataset, FeatureVector, GridShape};

/// Preprocessing method applied before training/inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocess {
    /// Identity pass-through, no stats produced or required.
    None,
    /// Per-(variable, cell) standardization over the time axis.
    TemporalNorm,
}

impl std::fmt::Display for Preprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::TemporalNorm => write!(f, "temporal_norm"),
        }
    }
}

/// Per-cell mean and standard deviation over the training time axis.
///
/// `mean` and `std` have length `shape.feature_len()` and share the
/// feature-vector layout exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub shape: GridShape,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl NormalizationStats {
    fn check_vector_len(&self, len: usize) -> Result<()> {
        if len != self.shape.feature_len() {
            return Err(EngineError::DataShape(format!(
                "vector length {} does not match normalization stats layout {}",
                len,
                self.shape.feature_len()
            )));
        }
        Ok(())
    }
}

/// Fit/apply/invert standardization over a dataset's time axis.
pub struct Normalizer;

impl Normalizer {
    /// Fit per-cell mean and population standard deviation across time.
    ///
    /// Fails with [`EngineError::NumericDegeneracy`] naming the variable
    /// and cell if any cell is constant over the whole training period.
    pub fn fit(dataset: &Dataset) -> Result<NormalizationStats> {
        if dataset.is_empty() {
            return Err(EngineError::DataShape(
                "cannot fit normalization stats on an empty dataset".to_string(),
            ));
        }

        let n = dataset.len() as f64;
        let len = dataset.shape().feature_len();

        let mut mean = vec![0.0; len];
        for v in dataset.vectors() {
            for (m, x) in mean.iter_mut().zip(v) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0; len];
        for v in dataset.vectors() {
            for ((s, x), m) in var.iter_mut().zip(v).zip(&mean) {
                let d = x - m;
                *s += d * d;
            }
        }

        let mut std = vec![0.0; len];
        for (i, (s, out)) in var.iter().zip(std.iter_mut()).enumerate() {
            let sd = (s / n).sqrt();
            if sd == 0.0 {
                let (variable, row, col) = dataset.shape().locate(i);
                return Err(EngineError::NumericDegeneracy {
                    variable: variable.to_string(),
                    row,
                    col,
                });
            }
            *out = sd;
        }

        debug!(
            samples = dataset.len(),
            features = len,
            "fitted temporal normalization stats"
        );

        Ok(NormalizationStats {
            shape: dataset.shape().clone(),
            mean,
            std,
        })
    }

    /// Standardize every vector: `(value - mean) / std`.
    pub fn apply(dataset: &Dataset, stats: &NormalizationStats) -> Result<Dataset> {
        if dataset.shape() != &stats.shape {
            return Err(EngineError::DataShape(format!(
                "dataset grid {:?} {}x{} does not match normalization stats grid {:?} {}x{}",
                dataset.shape().variables,
                dataset.shape().nrow,
                dataset.shape().ncol,
                stats.shape.variables,
                stats.shape.nrow,
                stats.shape.ncol
            )));
        }
        let vectors = dataset
            .vectors()
            .iter()
            .map(|v| {
                v.iter()
                    .zip(&stats.mean)
                    .zip(&stats.std)
                    .map(|((x, m), s)| (x - m) / s)
                    .collect()
            })
            .collect();
        dataset.with_vectors(vectors)
    }

    /// Invert standardization on a single vector: `value * std + mean`.
    ///
    /// Used to export centroids back into physical units.
    pub fn invert_vector(vector: &[f64], stats: &NormalizationStats) -> Result<FeatureVector> {
        stats.check_vector_len(vector.len())?;
        Ok(vector
            .iter()
            .zip(&stats.mean)
            .zip(&stats.std)
            .map(|((x, m), s)| x * s + m)
            .collect())
    }

    /// Invert standardization on a whole dataset.
    pub fn invert(dataset: &Dataset, stats: &NormalizationStats) -> Result<Dataset> {
        let vectors = dataset
            .vectors()
            .iter()
            .map(|v| Self::invert_vector(v, stats))
            .collect::<Result<Vec<_>>>()?;
        dataset.with_vectors(vectors)
    }
}
