//! Model quality metrics bundled with the training configuration.
//!
//! Two metrics: quantization error (representation fidelity) and a
//! silhouette-style separation score over the winner labels. The report
//! carries a snapshot of the training configuration so an archived
//! evaluation can always be traced back to the run that produced it.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainingConfig;
use crate::error::{EngineError, Result};
use crate::som::{euclidean, SomGrid};
use crate::types::{Dataset, WinnerAssignment};

/// Evaluation metrics plus the configuration that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Mean sample-to-winner distance, >= 0.
    pub quantization_error: f64,
    /// Silhouette-style cluster separation score in [-1, 1].
    pub separation_score: f64,
    /// Training configuration snapshot for reproducibility.
    pub config: TrainingConfig,
}

/// Computes the evaluation report for a trained engine.
pub struct Evaluator;

impl Evaluator {
    /// Evaluate a trained engine against its (normalized) training dataset.
    pub fn evaluate(
        som: &SomGrid,
        dataset: &Dataset,
        assignments: &[WinnerAssignment],
        config: &TrainingConfig,
    ) -> Result<EvaluationReport> {
        if assignments.len() != dataset.len() {
            return Err(EngineError::DataShape(format!(
                "{} assignments for {} samples",
                assignments.len(),
                dataset.len()
            )));
        }

        let quantization_error = som.quantization_error(dataset)?;
        let labels: Vec<usize> = assignments.iter().map(|a| a.type_id).collect();
        let separation_score = silhouette_score(dataset.vectors(), &labels)?;

        info!(
            quantization_error,
            separation_score, "evaluated trained model"
        );

        Ok(EvaluationReport {
            quantization_error,
            separation_score,
            config: config.clone(),
        })
    }
}

/// Mean silhouette coefficient over all samples.
///
/// For sample `i` with cluster label `L`: `a(i)` is the mean distance to
/// other members of `L`, `b(i)` the minimum over other clusters of the
/// mean distance to that cluster, and the coefficient is
/// `(b - a) / max(a, b)`. Samples in singleton clusters score 0.
///
/// Fails when fewer than 2 samples or fewer than 2 distinct labels are
/// present.
pub fn silhouette_score(vectors: &[Vec<f64>], labels: &[usize]) -> Result<f64> {
    if vectors.len() != labels.len() {
        return Err(EngineError::DataShape(format!(
            "{} labels for {} vectors",
            labels.len(),
            vectors.len()
        )));
    }
    if vectors.len() < 2 {
        return Err(EngineError::Evaluation(format!(
            "separation score needs at least 2 samples, got {}",
            vectors.len()
        )));
    }
    let mut distinct: Vec<usize> = labels.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(EngineError::Evaluation(format!(
            "separation score needs at least 2 distinct labels, got {}",
            distinct.len()
        )));
    }

    let cluster_sizes: Vec<usize> = distinct
        .iter()
        .map(|l| labels.iter().filter(|x| *x == l).count())
        .collect();

    let total: f64 = (0..vectors.len())
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            // Mean distance from i to every cluster. Labels always resolve:
            // `distinct` was built from this same label slice.
            let mut sums = vec![0.0; distinct.len()];
            for (j, v) in vectors.iter().enumerate() {
                if i == j {
                    continue;
                }
                if let Ok(k) = distinct.binary_search(&labels[j]) {
                    sums[k] += euclidean(&vectors[i], v);
                }
            }

            let Ok(own_k) = distinct.binary_search(&own) else {
                return 0.0;
            };
            if cluster_sizes[own_k] < 2 {
                // Singleton cluster: coefficient defined as 0.
                return 0.0;
            }
            let a = sums[own_k] / (cluster_sizes[own_k] - 1) as f64;
            let b = distinct
                .iter()
                .enumerate()
                .filter(|(k, _)| *k != own_k)
                .map(|(k, _)| sums[k] / cluster_sizes[k] as f64)
                .fold(f64::INFINITY, f64::min);

            let denom = a.max(b);
            if denom == 0.0 {
                0.0
            } else {
                (b - a) / denom
            }
        })
        .sum();

    Ok(total / vectors.len() as f64)
}
