//! Model persistence: a versioned, self-describing JSON artifact.
//!
//! The artifact is the only state crossing the training/inference run
//! boundary. It carries an explicit metadata block (preprocess method,
//! neighborhood kind, grid shape, ordered variable list) so
//! [`ModelArchive::validate`] can reject a mismatched inference
//! configuration instead of silently misclassifying. Prototypes are stored
//! in training space; a denormalized centroid grid in physical units is
//! stored alongside for human interpretation.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::normalize::{NormalizationStats, Normalizer, Preprocess};
use crate::som::{Neighborhood, SomGrid};
use crate::types::{FeatureVector, GridShape, WinnerAssignment};

/// Bump on any incompatible artifact layout change.
pub const SCHEMA_VERSION: u32 = 1;

/// Self-describing artifact header, checked before any inference run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub schema_version: u32,
    pub preprocess: Preprocess,
    pub neighborhood: Neighborhood,
    pub n_nodex: usize,
    pub n_nodey: usize,
    pub nrow: usize,
    pub ncol: usize,
    /// Ordered variable list; order is part of the contract.
    pub variables: Vec<String>,
}

/// Archived historical feature vectors for analog matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryArchive {
    pub timestamps: Vec<DateTime<Utc>>,
    pub vectors: Vec<FeatureVector>,
}

/// Persisted form of a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ArtifactMetadata,
    pub sigma: f64,
    pub learning_rate: f64,
    pub iterations: usize,
    pub seed: u64,
    /// Prototype grid in training (normalized) space, indexed
    /// `x * n_nodey + y`.
    pub prototypes: Vec<FeatureVector>,
    /// Prototype grid denormalized into physical units, same indexing.
    pub centroids: Vec<FeatureVector>,
    /// Normalization stats; present iff preprocess is `temporal_norm`.
    pub stats: Option<NormalizationStats>,
    /// Training assignment table, one row per training timestamp.
    pub assignments: Vec<WinnerAssignment>,
    /// Optional full training-vector archive for analog matching.
    pub history: Option<HistoryArchive>,
}

/// Builds, persists, loads, and validates model artifacts.
pub struct ModelArchive;

impl ModelArchive {
    /// Assemble an artifact from a trained engine and its training outputs.
    ///
    /// Denormalizes the prototype grid into physical units when
    /// normalization was used.
    pub fn build(
        som: &SomGrid,
        shape: &GridShape,
        preprocess: Preprocess,
        stats: Option<&NormalizationStats>,
        assignments: Vec<WinnerAssignment>,
        history: Option<HistoryArchive>,
    ) -> Result<ModelArtifact> {
        if !som.is_trained() {
            return Err(EngineError::config(
                "archive",
                "cannot archive an untrained engine",
            ));
        }
        if shape.feature_len() != som.dim() {
            return Err(EngineError::DataShape(format!(
                "grid shape implies feature length {}, engine dimension is {}",
                shape.feature_len(),
                som.dim()
            )));
        }
        if preprocess == Preprocess::TemporalNorm && stats.is_none() {
            return Err(EngineError::config(
                "archive",
                "temporal_norm artifact requires normalization stats",
            ));
        }

        let prototypes: Vec<FeatureVector> = som.prototypes().to_vec();
        let centroids = match stats {
            Some(s) => prototypes
                .iter()
                .map(|p| Normalizer::invert_vector(p, s))
                .collect::<Result<Vec<_>>>()?,
            None => prototypes.clone(),
        };

        Ok(ModelArtifact {
            metadata: ArtifactMetadata {
                schema_version: SCHEMA_VERSION,
                preprocess,
                neighborhood: som.neighborhood(),
                n_nodex: som.n_nodex(),
                n_nodey: som.n_nodey(),
                nrow: shape.nrow,
                ncol: shape.ncol,
                variables: shape.variables.clone(),
            },
            sigma: som.sigma(),
            learning_rate: som.learning_rate(),
            iterations: som.iterations(),
            seed: som.seed(),
            prototypes,
            centroids,
            stats: stats.cloned(),
            assignments,
            history,
        })
    }

    /// Write an artifact to disk as JSON, creating parent directories.
    pub fn save(artifact: &ModelArtifact, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), artifact)?;
        info!(
            path = %path.display(),
            nodes = artifact.prototypes.len(),
            with_history = artifact.history.is_some(),
            "archived trained model"
        );
        Ok(())
    }

    /// Load an artifact from disk, rejecting unknown schema versions.
    pub fn load(path: &Path) -> Result<ModelArtifact> {
        let file = File::open(path)?;
        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))?;
        if artifact.metadata.schema_version != SCHEMA_VERSION {
            return Err(EngineError::ArtifactVersion(format!(
                "artifact schema version {} is not supported (expected {})",
                artifact.metadata.schema_version, SCHEMA_VERSION
            )));
        }
        info!(path = %path.display(), "loaded model artifact");
        Ok(artifact)
    }

    /// Check an artifact against the current run's configuration.
    ///
    /// Mandatory before any inference run. Fails when the variable list
    /// (including order), grid shape, or pinned preprocessing method
    /// disagree with the archived metadata.
    pub fn validate(
        artifact: &ModelArtifact,
        shape: &GridShape,
        expected_preprocess: Option<Preprocess>,
    ) -> Result<()> {
        let meta = &artifact.metadata;
        if meta.variables != shape.variables {
            return Err(EngineError::ArtifactVersion(format!(
                "archived variable list {:?} does not match current run {:?}",
                meta.variables, shape.variables
            )));
        }
        if meta.nrow != shape.nrow || meta.ncol != shape.ncol {
            return Err(EngineError::ArtifactVersion(format!(
                "archived grid {}x{} does not match current run {}x{}",
                meta.nrow, meta.ncol, shape.nrow, shape.ncol
            )));
        }
        if let Some(p) = expected_preprocess {
            if p != meta.preprocess {
                return Err(EngineError::ArtifactVersion(format!(
                    "archived preprocess method '{}' does not match configured '{}'",
                    meta.preprocess, p
                )));
            }
        }
        if meta.preprocess == Preprocess::TemporalNorm && artifact.stats.is_none() {
            return Err(EngineError::ArtifactVersion(
                "temporal_norm artifact is missing its normalization stats".to_string(),
            ));
        }
        Ok(())
    }

    /// Rebuild a ready-to-use engine from an artifact, without retraining.
    pub fn restore_engine(artifact: &ModelArtifact) -> Result<SomGrid> {
        let meta = &artifact.metadata;
        let dim = meta.variables.len() * meta.nrow * meta.ncol;
        SomGrid::from_parts(
            meta.n_nodex,
            meta.n_nodey,
            dim,
            artifact.sigma,
            artifact.learning_rate,
            artifact.iterations,
            meta.neighborhood,
            artifact.seed,
            artifact.prototypes.clone(),
        )
    }
}
