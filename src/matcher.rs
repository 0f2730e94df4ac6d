//! Historical analog matching: nearest-neighbor search of an inference
//! sample against the archived training-vector set.
//!
//! A linear scan with a running minimum per query; strict `<` comparison
//! means an exactly tied distance keeps the earlier timestamp. The archive
//! is immutable during inference, so queries parallelize freely.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::debug;

use crate::archive::HistoryArchive;
use crate::error::{EngineError, Result};
use crate::som::euclidean;
use crate::types::Dataset;

/// Nearest-neighbor search over an archived historical vector set.
pub struct HistoricalMatcher {
    timestamps: Vec<DateTime<Utc>>,
    vectors: Vec<Vec<f64>>,
    dim: usize,
}

impl HistoricalMatcher {
    /// Build a matcher from an archived history block.
    pub fn new(history: HistoryArchive) -> Result<Self> {
        if history.timestamps.len() != history.vectors.len() {
            return Err(EngineError::ArtifactVersion(format!(
                "history archive has {} timestamps but {} vectors",
                history.timestamps.len(),
                history.vectors.len()
            )));
        }
        if history.vectors.is_empty() {
            return Err(EngineError::ArtifactVersion(
                "history archive is empty".to_string(),
            ));
        }
        let dim = history.vectors[0].len();
        for (ts, v) in history.timestamps.iter().zip(&history.vectors) {
            if v.len() != dim {
                return Err(EngineError::ArtifactVersion(format!(
                    "history vector at {} has length {}, expected {}",
                    ts.format("%Y-%m-%d %H:%M"),
                    v.len(),
                    dim
                )));
            }
        }
        Ok(Self {
            timestamps: history.timestamps,
            vectors: history.vectors,
            dim,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Timestamp and distance of the closest historical vector.
    ///
    /// Ties by distance resolve to the earliest timestamp: the scan runs
    /// chronologically and only a strictly smaller distance replaces the
    /// running best.
    pub fn best_match(&self, sample: &[f64]) -> Result<(DateTime<Utc>, f64)> {
        if sample.len() != self.dim {
            return Err(EngineError::DataShape(format!(
                "query vector has length {}, history archive has {}",
                sample.len(),
                self.dim
            )));
        }
        let mut best_dist = f64::INFINITY;
        let mut best_ts = self.timestamps[0];
        for (ts, hist) in self.timestamps.iter().zip(&self.vectors) {
            let d = euclidean(sample, hist);
            if d < best_dist {
                best_dist = d;
                best_ts = *ts;
            }
        }
        Ok((best_ts, best_dist))
    }

    /// Closest analog for every sample of an inference dataset.
    ///
    /// Parallel across queries; the archive is never mutated.
    pub fn match_all(&self, dataset: &Dataset) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let matches = dataset
            .vectors()
            .par_iter()
            .map(|v| self.best_match(v))
            .collect::<Result<Vec<_>>>()?;

        for (query_ts, (match_ts, dist)) in dataset.timestamps().iter().zip(&matches) {
            debug!(
                query = %query_ts.format("%Y-%m-%d %H:%M"),
                analog = %match_ts.format("%Y-%m-%d %H:%M"),
                distance = dist,
                "matched historical analog"
            );
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, day, 12, 0, 0).unwrap()
    }

    fn make_matcher() -> HistoricalMatcher {
        HistoricalMatcher::new(HistoryArchive {
            timestamps: vec![ts(1), ts(2), ts(3)],
            vectors: vec![
                vec![0.0, 0.0, 0.0],
                vec![1.0, 1.0, 1.0],
                vec![5.0, 5.0, 5.0],
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_exact_match_returns_zero_distance_and_timestamp() {
        let matcher = make_matcher();
        let (when, dist) = matcher.best_match(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(when, ts(2));
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn test_nearest_neighbor() {
        let matcher = make_matcher();
        let (when, dist) = matcher.best_match(&[4.4, 4.4, 4.4]).unwrap();
        assert_eq!(when, ts(3));
        assert!(dist > 0.0);
    }

    #[test]
    fn test_equal_distance_prefers_earliest() {
        let matcher = HistoricalMatcher::new(HistoryArchive {
            timestamps: vec![ts(5), ts(9)],
            vectors: vec![vec![1.0, 0.0], vec![1.0, 0.0]],
        })
        .unwrap();
        let (when, dist) = matcher.best_match(&[0.0, 0.0]).unwrap();
        assert_eq!(when, ts(5));
        assert!((dist - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let matcher = make_matcher();
        assert!(matches!(
            matcher.best_match(&[1.0]),
            Err(EngineError::DataShape(_))
        ));
    }

    #[test]
    fn test_rejects_empty_history() {
        let result = HistoricalMatcher::new(HistoryArchive {
            timestamps: vec![],
            vectors: vec![],
        });
        assert!(matches!(result, Err(EngineError::ArtifactVersion(_))));
    }

    #[test]
    fn test_rejects_ragged_history() {
        let result = HistoricalMatcher::new(HistoryArchive {
            timestamps: vec![ts(1), ts(2)],
            vectors: vec![vec![0.0, 0.0], vec![0.0]],
        });
        assert!(matches!(result, Err(EngineError::ArtifactVersion(_))));
    }

    #[test]
    fn test_match_all_aligns_with_dataset() {
        use crate::types::{Dataset, GridShape};
        let matcher = make_matcher();
        let shape = GridShape::new(vec!["v".to_string()], 1, 3);
        let dataset = Dataset::new(
            shape,
            vec![ts(20), ts(21)],
            vec![vec![0.1, 0.0, 0.0], vec![5.0, 5.0, 5.0]],
        )
        .unwrap();
        let matches = matcher.match_all(&dataset).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].0, ts(1));
        assert_eq!(matches[1].0, ts(3));
        assert_eq!(matches[1].1, 0.0);
    }
}
