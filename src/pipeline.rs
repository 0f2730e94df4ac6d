//! Training and inference entrypoints.
//!
//! `run_training` takes an assembled dataset through normalization, SOM
//! training, winner assignment, evaluation, and artifact construction.
//! `run_inference` validates a loaded artifact against the current run,
//! restores the engine, classifies, optionally matches historical analogs,
//! and aggregates the output table.

use tracing::info;

use crate::archive::{HistoryArchive, ModelArchive, ModelArtifact};
use crate::classify::Classifier;
use crate::config::{InferenceConfig, TrainingConfig};
use crate::error::{EngineError, Result};
use crate::evaluate::{EvaluationReport, Evaluator};
use crate::matcher::HistoricalMatcher;
use crate::normalize::{Normalizer, Preprocess};
use crate::som::SomGrid;
use crate::types::{Dataset, TypeRecord, WinnerAssignment};

/// Everything a training run produces.
pub struct TrainingOutput {
    pub artifact: ModelArtifact,
    pub report: EvaluationReport,
    /// One row per training timestamp.
    pub assignments: Vec<WinnerAssignment>,
}

/// Train a new weather-typing model on an assembled dataset.
pub fn run_training(dataset: &Dataset, config: &TrainingConfig) -> Result<TrainingOutput> {
    config.validate()?;

    info!(
        samples = dataset.len(),
        features = dataset.shape().feature_len(),
        preprocess = %config.preprocess,
        "starting training run"
    );

    let (normalized, stats) = match config.preprocess {
        Preprocess::TemporalNorm => {
            let stats = Normalizer::fit(dataset)?;
            (Normalizer::apply(dataset, &stats)?, Some(stats))
        }
        Preprocess::None => (dataset.clone(), None),
    };

    let mut som = SomGrid::new(
        config.n_nodex,
        config.n_nodey,
        dataset.shape().feature_len(),
        config.sigma,
        config.learning_rate,
        config.iterations,
        config.neighborhood,
        config.seed,
    )?;
    som.train(&normalized)?;

    let assignments = Classifier::assign(&som, &normalized)?;
    let report = Evaluator::evaluate(&som, &normalized, &assignments, config)?;

    let history = config.archive_history.then(|| HistoryArchive {
        timestamps: normalized.timestamps().to_vec(),
        vectors: normalized.vectors().to_vec(),
    });

    let artifact = ModelArchive::build(
        &som,
        dataset.shape(),
        config.preprocess,
        stats.as_ref(),
        assignments.clone(),
        history,
    )?;

    info!(
        quantization_error = report.quantization_error,
        separation_score = report.separation_score,
        "training run complete"
    );

    Ok(TrainingOutput {
        artifact,
        report,
        assignments,
    })
}

/// Classify an assembled dataset against a loaded artifact.
///
/// The artifact is validated against the current run before anything else;
/// an incompatible artifact never classifies a single sample.
pub fn run_inference(
    dataset: &Dataset,
    artifact: &ModelArtifact,
    config: &InferenceConfig,
) -> Result<Vec<TypeRecord>> {
    config.validate()?;
    ModelArchive::validate(artifact, dataset.shape(), config.preprocess)?;

    let som = ModelArchive::restore_engine(artifact)?;

    info!(
        samples = dataset.len(),
        nodes = som.n_nodex() * som.n_nodey(),
        match_history = config.match_history,
        "starting inference run"
    );

    let normalized = match artifact.metadata.preprocess {
        Preprocess::TemporalNorm => {
            let stats = artifact.stats.as_ref().ok_or_else(|| {
                EngineError::ArtifactVersion(
                    "temporal_norm artifact is missing its normalization stats".to_string(),
                )
            })?;
            Normalizer::apply(dataset, stats)?
        }
        Preprocess::None => dataset.clone(),
    };

    let assignments = Classifier::assign(&som, &normalized)?;

    let analog_dates = if config.match_history {
        let history = artifact.history.clone().ok_or_else(|| {
            EngineError::ArtifactVersion(
                "artifact has no history archive; retrain with archive_history = true"
                    .to_string(),
            )
        })?;
        let matcher = HistoricalMatcher::new(history)?;
        let matches = matcher.match_all(&normalized)?;
        Some(matches.into_iter().map(|(ts, _)| ts).collect::<Vec<_>>())
    } else {
        None
    };

    Classifier::aggregate(
        &assignments,
        analog_dates.as_deref(),
        config.resample_period()?,
        som.n_nodey(),
    )
}
