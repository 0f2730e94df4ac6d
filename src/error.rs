//! Central error taxonomy for the weather-typing engine.
//!
//! Every fallible operation in the crate returns [`EngineError`]. Variants
//! carry the offending variable, timestamp, or grid cell so a failed run
//! names what broke instead of a bare "invalid input".

use thiserror::Error;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or out-of-range hyperparameter / config field.
    #[error("invalid configuration: {field}: {message}")]
    Configuration { field: String, message: String },

    /// Inconsistent grid shapes, variable-list mismatch, or vector
    /// dimensionality that disagrees with the engine.
    #[error("data shape mismatch: {0}")]
    DataShape(String),

    /// Loaded model artifact is incompatible with the current run.
    #[error("archived model incompatible with current run: {0}")]
    ArtifactVersion(String),

    /// Zero-variance grid cell hit during normalization fit. Dividing by
    /// this std would propagate NaN/Inf into training.
    #[error(
        "zero variance at variable '{variable}' cell ({row},{col}): \
         temporal normalization undefined for a constant cell"
    )]
    NumericDegeneracy {
        variable: String,
        row: usize,
        col: usize,
    },

    /// Separation metric cannot be computed (too few samples or labels).
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Contiguity or completeness violation in the assembled dataset.
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// Filesystem failure while reading snapshots or writing artifacts.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact or snapshot (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Shorthand for a configuration error on a named field.
    pub fn config(field: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degeneracy_message_names_cell() {
        let err = EngineError::NumericDegeneracy {
            variable: "h500".to_string(),
            row: 3,
            col: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("h500"));
        assert!(msg.contains("(3,7)"));
    }

    #[test]
    fn test_config_shorthand() {
        let err = EngineError::config("training.sigma", "must be > 0");
        assert!(err.to_string().contains("training.sigma"));
        assert!(err.to_string().contains("must be > 0"));
    }
}
