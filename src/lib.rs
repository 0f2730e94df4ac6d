//! Synoptic: SOM-based weather typing
//!
//! Clusters gridded atmospheric states (multi-variable spatial snapshots
//! from regional model output or reanalysis sources) into a small set of
//! recurring weather types, classifies new snapshots against the learned
//! types, and optionally finds the closest historical analog day.
//!
//! ## Architecture
//!
//! - **Ingest**: chunked parallel snapshot loading and feature assembly
//! - **Normalize**: per-(variable, cell) temporal standardization
//! - **SOM**: competitive-learning prototype grid (the cluster engine)
//! - **Classify**: winner assignment and majority-vote resampling
//! - **Evaluate**: quantization error + cluster separation score
//! - **Archive**: versioned, self-describing model persistence
//! - **Matcher**: nearest-neighbor historical analog search

pub mod archive;
pub mod classify;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod ingest;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod som;
pub mod types;

// Re-export commonly used types
pub use types::{
    Dataset, FeatureVector, GridShape, LatOrder, NodeId, TypeRecord, WinnerAssignment,
};

// Re-export the engine and its configuration surface
pub use config::{EngineConfig, InferenceConfig, ShareConfig, TrainingConfig};
pub use error::{EngineError, Result};
pub use normalize::{NormalizationStats, Normalizer, Preprocess};
pub use som::{Neighborhood, SomGrid};

// Re-export run products
pub use archive::{HistoryArchive, ModelArchive, ModelArtifact};
pub use evaluate::EvaluationReport;
pub use pipeline::{run_inference, run_training, TrainingOutput};
