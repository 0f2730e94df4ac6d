//! Snapshot ingestion and feature assembly (boundary collaborator).
//!
//! A [`SnapshotSource`] yields one multi-variable [`Snapshot`] per
//! timestamp. The [`FeatureAssembler`] partitions the requested date range
//! into contiguous chunks, loads chunks on a fixed-size worker pool, and
//! merges results strictly in chunk-index order so the assembled dataset
//! stays chronologically contiguous. One failing chunk fails the whole
//! ingestion; a gapped dataset never reaches normalization or training.
//!
//! Vertical interpolation of derived variables (e.g. geopotential height
//! at a fixed pressure level) is the source's responsibility; the
//! assembler only validates and flattens ready 2D fields.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::{Dataset, FeatureVector, GridShape, LatOrder};

/// One variable's 2D field at one timestamp, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid2d {
    pub nrow: usize,
    pub ncol: usize,
    /// Latitude orientation of the rows; drives the canonical fix-up.
    #[serde(default)]
    pub lat_order: LatOrder,
    pub values: Vec<f64>,
}

impl Grid2d {
    /// Values reordered to the canonical north-to-south row order.
    fn canonical_values(&self) -> Vec<f64> {
        match self.lat_order {
            LatOrder::NorthToSouth => self.values.clone(),
            LatOrder::SouthToNorth => {
                let mut out = Vec::with_capacity(self.values.len());
                for row in (0..self.nrow).rev() {
                    out.extend_from_slice(&self.values[row * self.ncol..(row + 1) * self.ncol]);
                }
                out
            }
        }
    }
}

/// All variables for one timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub variables: HashMap<String, Grid2d>,
}

/// Per-timestamp snapshot provider.
///
/// Implementations must be `Sync`: the assembler calls `load` from
/// multiple worker threads with no shared mutable state.
pub trait SnapshotSource: Sync {
    fn load(&self, timestamp: DateTime<Utc>) -> Result<Snapshot>;
}

/// Snapshot directory with one JSON file per timestamp.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name convention: `snapshot_YYYY-MM-DD_HHMM.json`.
    pub fn file_name(timestamp: DateTime<Utc>) -> String {
        format!("snapshot_{}.json", timestamp.format("%Y-%m-%d_%H%M"))
    }

    fn path_for(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.dir.join(Self::file_name(timestamp))
    }

    /// All snapshot timestamps present in the directory, sorted.
    ///
    /// Used by inference runs, which classify whatever the feed delivered
    /// rather than a configured range.
    pub fn list_timestamps(&self) -> Result<Vec<DateTime<Utc>>> {
        let mut timestamps = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = name
                .strip_prefix("snapshot_")
                .and_then(|s| s.strip_suffix(".json"))
            else {
                continue;
            };
            let parsed = chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H%M")
                .map_err(|e| {
                    EngineError::Ingestion(format!("unparseable snapshot file '{name}': {e}"))
                })?;
            timestamps.push(DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc));
        }
        timestamps.sort_unstable();
        Ok(timestamps)
    }
}

impl SnapshotSource for DirectorySource {
    fn load(&self, timestamp: DateTime<Utc>) -> Result<Snapshot> {
        let path = self.path_for(timestamp);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Ingestion(format!(
                "missing snapshot for {}: {} ({e})",
                timestamp.format("%Y-%m-%d %H:%M"),
                path.display()
            ))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        Ok(snapshot)
    }
}

/// Turns per-timestamp, per-variable grids into one flat feature vector
/// per timestamp.
pub struct FeatureAssembler {
    variables: Vec<String>,
    workers: usize,
}

impl FeatureAssembler {
    pub fn new(variables: Vec<String>, workers: usize) -> Result<Self> {
        if variables.is_empty() {
            return Err(EngineError::config("share.variables", "must not be empty"));
        }
        if workers == 0 {
            return Err(EngineError::config("share.workers", "must be >= 1"));
        }
        Ok(Self { variables, workers })
    }

    /// Load and assemble a dataset for the requested timestamps.
    ///
    /// Timestamps must be strictly increasing. The range is split into
    /// `workers` contiguous chunks; results merge in chunk-index order,
    /// never completion order.
    pub fn assemble<S: SnapshotSource>(
        &self,
        source: &S,
        times: &[DateTime<Utc>],
    ) -> Result<Dataset> {
        if times.is_empty() {
            return Err(EngineError::Ingestion(
                "requested time range is empty".to_string(),
            ));
        }

        let chunk_size = (times.len() + self.workers - 1) / self.workers;
        let chunks: Vec<&[DateTime<Utc>]> = times.chunks(chunk_size).collect();

        info!(
            timestamps = times.len(),
            workers = self.workers,
            chunks = chunks.len(),
            "ingesting snapshots"
        );

        let loaded: Vec<Vec<Snapshot>> = chunks
            .par_iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let snapshots = chunk
                    .iter()
                    .map(|ts| source.load(*ts))
                    .collect::<Result<Vec<_>>>()?;
                debug!(chunk = idx, loaded = snapshots.len(), "ingestion chunk complete");
                Ok(snapshots)
            })
            .collect::<Result<Vec<_>>>()?;

        // Indexed collect above already preserves chunk order.
        let snapshots: Vec<Snapshot> = loaded.into_iter().flatten().collect();

        for (requested, got) in times.iter().zip(&snapshots) {
            if got.timestamp != *requested {
                return Err(EngineError::Ingestion(format!(
                    "snapshot timestamp {} does not match requested {}",
                    got.timestamp.format("%Y-%m-%d %H:%M"),
                    requested.format("%Y-%m-%d %H:%M")
                )));
            }
        }

        let shape = self.resolve_shape(&snapshots)?;
        let vectors = snapshots
            .iter()
            .map(|s| self.flatten(s, &shape))
            .collect::<Result<Vec<FeatureVector>>>()?;

        Dataset::new(shape, times.to_vec(), vectors)
    }

    /// Determine the common grid shape, failing if any variable at any
    /// timestamp disagrees.
    fn resolve_shape(&self, snapshots: &[Snapshot]) -> Result<GridShape> {
        let first = &snapshots[0];
        let reference = first.variables.get(&self.variables[0]).ok_or_else(|| {
            EngineError::DataShape(format!(
                "variable '{}' missing at {}",
                self.variables[0],
                first.timestamp.format("%Y-%m-%d %H:%M")
            ))
        })?;
        let (nrow, ncol) = (reference.nrow, reference.ncol);

        for snapshot in snapshots {
            for var in &self.variables {
                let grid = snapshot.variables.get(var).ok_or_else(|| {
                    EngineError::DataShape(format!(
                        "variable '{var}' missing at {}",
                        snapshot.timestamp.format("%Y-%m-%d %H:%M")
                    ))
                })?;
                if grid.nrow != nrow || grid.ncol != ncol {
                    return Err(EngineError::DataShape(format!(
                        "variable '{var}' at {} is {}x{}, expected {}x{}",
                        snapshot.timestamp.format("%Y-%m-%d %H:%M"),
                        grid.nrow,
                        grid.ncol,
                        nrow,
                        ncol
                    )));
                }
                if grid.values.len() != nrow * ncol {
                    return Err(EngineError::DataShape(format!(
                        "variable '{var}' at {} has {} values for a {}x{} grid",
                        snapshot.timestamp.format("%Y-%m-%d %H:%M"),
                        grid.values.len(),
                        nrow,
                        ncol
                    )));
                }
            }
        }
        Ok(GridShape::new(self.variables.clone(), nrow, ncol))
    }

    /// Flatten one snapshot variable-then-row-then-column, applying the
    /// latitude-orientation fix-up per grid.
    fn flatten(&self, snapshot: &Snapshot, shape: &GridShape) -> Result<FeatureVector> {
        let mut vector = Vec::with_capacity(shape.feature_len());
        for var in &self.variables {
            let grid = snapshot.variables.get(var).ok_or_else(|| {
                EngineError::DataShape(format!(
                    "variable '{var}' missing at {}",
                    snapshot.timestamp.format("%Y-%m-%d %H:%M")
                ))
            })?;
            vector.extend(grid.canonical_values());
        }
        Ok(vector)
    }
}
