//! Run configuration loaded from a TOML file.
//!
//! Mirrors the `[share]` / `[training]` / `[inference]` sections of the
//! original tool's config. Every field has a `Default` so a partial file is
//! valid; `validate()` range-checks hyperparameters and names the offending
//! field in the error. No ambient working-directory state: all paths are
//! explicit config values.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::normalize::Preprocess;
use crate::som::Neighborhood;

/// Settings shared between training and inference runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Ordered variable list; fixes the feature-vector layout.
    pub variables: Vec<String>,
    /// Ingestion worker-pool size.
    pub workers: usize,
    /// Directory of per-timestamp snapshot files.
    pub input_dir: PathBuf,
    /// Path of the persisted model artifact.
    pub archive_path: PathBuf,
    /// Directory for CSV/JSON outputs.
    pub output_dir: PathBuf,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            variables: vec!["h500".to_string(), "h200".to_string()],
            workers: 4,
            input_dir: PathBuf::from("input"),
            archive_path: PathBuf::from("db/som_model.json"),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Training-run hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub preprocess: Preprocess,
    pub n_nodex: usize,
    pub n_nodey: usize,
    pub sigma: f64,
    pub learning_rate: f64,
    pub iterations: usize,
    pub neighborhood: Neighborhood,
    pub seed: u64,
    /// Archive the full training feature-vector set for analog matching.
    pub archive_history: bool,
    /// First training timestamp, `YYYY-MM-DD` (valid at 12:00 UTC).
    pub training_start: String,
    /// Last training timestamp, `YYYY-MM-DD` (inclusive).
    pub training_end: String,
    /// Spacing of training snapshots, e.g. `"1d"` or `"6h"`.
    pub sample_freq: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            preprocess: Preprocess::TemporalNorm,
            n_nodex: 3,
            n_nodey: 3,
            sigma: 1.0,
            learning_rate: 0.5,
            iterations: 5000,
            neighborhood: Neighborhood::Gaussian,
            seed: 42,
            archive_history: true,
            training_start: "2015-01-01".to_string(),
            training_end: "2015-12-31".to_string(),
            sample_freq: "1d".to_string(),
        }
    }
}

impl TrainingConfig {
    /// Range-check every hyperparameter, naming the field on failure.
    pub fn validate(&self) -> Result<()> {
        if self.n_nodex == 0 {
            return Err(EngineError::config("training.n_nodex", "must be >= 1"));
        }
        if self.n_nodey == 0 {
            return Err(EngineError::config("training.n_nodey", "must be >= 1"));
        }
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(EngineError::config(
                "training.sigma",
                format!("must be a positive finite number, got {}", self.sigma),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(EngineError::config(
                "training.learning_rate",
                format!("must be a positive finite number, got {}", self.learning_rate),
            ));
        }
        if self.iterations == 0 {
            return Err(EngineError::config("training.iterations", "must be >= 1"));
        }
        parse_date(&self.training_start, "training.training_start")?;
        parse_date(&self.training_end, "training.training_end")?;
        parse_freq(&self.sample_freq)
            .map_err(|e| EngineError::config("training.sample_freq", e.to_string()))?;
        Ok(())
    }
}

/// Inference-run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Aggregation period for the output table, e.g. `"1d"`.
    pub resample_freq: String,
    /// Look up the closest historical analog per sample.
    pub match_history: bool,
    /// When set, the archived preprocess method must match this value.
    #[serde(default)]
    pub preprocess: Option<Preprocess>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            resample_freq: "1d".to_string(),
            match_history: false,
            preprocess: None,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        parse_freq(&self.resample_freq)
            .map_err(|e| EngineError::config("inference.resample_freq", e.to_string()))?;
        Ok(())
    }

    /// Parsed resampling period.
    pub fn resample_period(&self) -> Result<Duration> {
        parse_freq(&self.resample_freq)
            .map_err(|e| EngineError::config("inference.resample_freq", e.to_string()))
    }
}

/// Root configuration for one engine deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl EngineConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            EngineError::config(&path.display().to_string(), e.to_string())
        })?;
        config.validate()?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.share.variables.is_empty() {
            return Err(EngineError::config("share.variables", "must not be empty"));
        }
        if self.share.workers == 0 {
            return Err(EngineError::config("share.workers", "must be >= 1"));
        }
        self.training.validate()?;
        self.inference.validate()?;
        Ok(())
    }

    /// Training timestamps: daily-or-finer series over the configured
    /// range, inclusive, valid at 12:00 UTC on the start date.
    pub fn training_dateseries(&self) -> Result<Vec<DateTime<Utc>>> {
        let start = parse_date(&self.training.training_start, "training.training_start")?;
        let end = parse_date(&self.training.training_end, "training.training_end")?;
        if end < start {
            return Err(EngineError::config(
                "training.training_end",
                "end date precedes start date",
            ));
        }
        let step = parse_freq(&self.training.sample_freq)
            .map_err(|e| EngineError::config("training.sample_freq", e.to_string()))?;
        let mut series = Vec::new();
        let mut t = start;
        while t <= end {
            series.push(t);
            t += step;
        }
        Ok(series)
    }
}

/// Parse a `YYYY-MM-DD` config date into its 12:00 UTC valid time.
fn parse_date(s: &str, field: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| EngineError::config(field, format!("bad date '{s}': {e}")))?;
    let naive = date
        .and_hms_opt(12, 0, 0)
        .ok_or_else(|| EngineError::config(field, format!("bad date '{s}'")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Parse a resampling/sampling frequency string: `<count><unit>` with unit
/// one of `min`, `h`, `d` (case-insensitive).
pub fn parse_freq(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| EngineError::config("freq", format!("missing unit in '{s}'")))?;
    let (count_str, unit) = s.split_at(split);
    let count: i64 = if count_str.is_empty() {
        1
    } else {
        count_str
            .parse()
            .map_err(|e| EngineError::config("freq", format!("bad count in '{s}': {e}")))?
    };
    if count <= 0 {
        return Err(EngineError::config("freq", format!("count must be positive in '{s}'")));
    }
    match unit.to_ascii_lowercase().as_str() {
        "min" => Ok(Duration::minutes(count)),
        "h" => Ok(Duration::hours(count)),
        "d" => Ok(Duration::days(count)),
        other => Err(EngineError::config(
            "freq",
            format!("unknown unit '{other}' in '{s}' (expected min, h, or d)"),
        )),
    }
}
