//! Classification of new snapshots against a trained engine.
//!
//! Per-sample winner lookup is parallel and read-only. Samples are then
//! resampled to a configured period (e.g. calendar day) by majority vote
//! over type ids; vote ties break to the earliest chronological occurrence
//! within the period.

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::som::SomGrid;
use crate::types::{Dataset, NodeId, TypeRecord, WinnerAssignment};

/// Winner assignment and period aggregation.
pub struct Classifier;

impl Classifier {
    /// Assign every sample of a (already normalized) dataset to its winner
    /// node. Parallel across samples; the prototype grid is not mutated.
    pub fn assign(som: &SomGrid, dataset: &Dataset) -> Result<Vec<WinnerAssignment>> {
        let n_nodey = som.n_nodey();
        let nodes = dataset
            .vectors()
            .par_iter()
            .map(|v| som.winner(v))
            .collect::<Result<Vec<_>>>()?;

        Ok(dataset
            .timestamps()
            .iter()
            .zip(nodes)
            .map(|(ts, node)| WinnerAssignment {
                timestamp: *ts,
                node,
                type_id: node.type_id(n_nodey),
            })
            .collect())
    }

    /// Aggregate per-sample assignments into one record per resampling
    /// period.
    ///
    /// The period's type id is the majority vote over samples in the
    /// period; ties break to the earliest occurrence. The coordinate
    /// column is derived from the winning id. Analog dates (when present,
    /// one per sample) are aggregated by the same mode rule.
    pub fn aggregate(
        assignments: &[WinnerAssignment],
        analog_dates: Option<&[DateTime<Utc>]>,
        period: Duration,
        n_nodey: usize,
    ) -> Result<Vec<TypeRecord>> {
        let period_secs = period.num_seconds();
        if period_secs <= 0 {
            return Err(EngineError::config(
                "inference.resample_freq",
                "resampling period must be positive",
            ));
        }
        if let Some(dates) = analog_dates {
            if dates.len() != assignments.len() {
                return Err(EngineError::DataShape(format!(
                    "{} analog dates for {} assignments",
                    dates.len(),
                    assignments.len()
                )));
            }
        }

        // Group chronologically contiguous samples by floored period start.
        let mut groups: Vec<(i64, Vec<usize>)> = Vec::new();
        for (i, a) in assignments.iter().enumerate() {
            let secs = a.timestamp.timestamp();
            let start = secs - secs.rem_euclid(period_secs);
            match groups.last_mut() {
                Some((s, idxs)) if *s == start => idxs.push(i),
                _ => groups.push((start, vec![i])),
            }
        }

        let mut records = Vec::with_capacity(groups.len());
        for (start_secs, idxs) in groups {
            let period_start = DateTime::<Utc>::from_timestamp(start_secs, 0).ok_or_else(|| {
                EngineError::Ingestion(format!("period start {start_secs} out of range"))
            })?;

            let ids: Vec<usize> = idxs.iter().map(|&i| assignments[i].type_id).collect();
            let type_id = mode_earliest(&ids);
            let node = NodeId::new(type_id / n_nodey, type_id % n_nodey);

            let best_match = analog_dates.map(|dates| {
                let period_dates: Vec<DateTime<Utc>> =
                    idxs.iter().map(|&i| dates[i]).collect();
                mode_earliest(&period_dates)
            });

            records.push(TypeRecord {
                period_start,
                type_coordinate: node.coordinate_string(),
                type_id,
                best_match,
            });
        }

        debug!(
            samples = assignments.len(),
            periods = records.len(),
            "aggregated classification output"
        );

        Ok(records)
    }
}

/// Most frequent value; ties break to the value whose first occurrence is
/// earliest in the slice.
///
/// Callers guarantee a non-empty slice (periods always contain at least
/// one sample).
fn mode_earliest<T: PartialEq + Copy>(values: &[T]) -> T {
    let mut best = values[0];
    let mut best_count = 0usize;
    for (i, v) in values.iter().enumerate() {
        // Only count a value at its first occurrence.
        if values[..i].contains(v) {
            continue;
        }
        let count = values[i..].iter().filter(|x| *x == v).count();
        if count > best_count {
            best_count = count;
            best = *v;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, day, hour, 0, 0).unwrap()
    }

    fn make_assignment(day: u32, hour: u32, x: usize, y: usize, n_nodey: usize) -> WinnerAssignment {
        let node = NodeId::new(x, y);
        WinnerAssignment {
            timestamp: ts(day, hour),
            node,
            type_id: node.type_id(n_nodey),
        }
    }

    #[test]
    fn test_mode_earliest_plain_majority() {
        assert_eq!(mode_earliest(&[0, 0, 1]), 0);
        assert_eq!(mode_earliest(&[2, 1, 1]), 1);
    }

    #[test]
    fn test_mode_earliest_tie_breaks_to_first_seen() {
        assert_eq!(mode_earliest(&[3, 1, 1, 3]), 3);
        assert_eq!(mode_earliest(&[1, 3, 3, 1]), 1);
    }

    #[test]
    fn test_aggregate_majority_vote_per_day() {
        // Day 1: labels [0, 0, 1] -> 0. Day 2: labels [3] -> 3.
        let assignments = vec![
            make_assignment(1, 0, 0, 0, 2),
            make_assignment(1, 6, 0, 0, 2),
            make_assignment(1, 12, 0, 1, 2),
            make_assignment(2, 0, 1, 1, 2),
        ];
        let records =
            Classifier::aggregate(&assignments, None, Duration::days(1), 2).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].period_start, ts(1, 0));
        assert_eq!(records[0].type_id, 0);
        assert_eq!(records[0].type_coordinate, "(0,0)");
        assert_eq!(records[1].type_id, 3);
        assert_eq!(records[1].type_coordinate, "(1,1)");
        assert!(records[0].best_match.is_none());
    }

    #[test]
    fn test_aggregate_tie_breaks_to_earliest_occurrence() {
        // Two samples of type 2 and two of type 1; type 2 seen first.
        let assignments = vec![
            make_assignment(1, 0, 1, 0, 2),
            make_assignment(1, 6, 0, 1, 2),
            make_assignment(1, 12, 1, 0, 2),
            make_assignment(1, 18, 0, 1, 2),
        ];
        let records =
            Classifier::aggregate(&assignments, None, Duration::days(1), 2).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].type_id, 2);
    }

    #[test]
    fn test_aggregate_carries_analog_mode() {
        let assignments = vec![
            make_assignment(1, 0, 0, 0, 2),
            make_assignment(1, 6, 0, 0, 2),
            make_assignment(1, 12, 0, 0, 2),
        ];
        let analogs = vec![ts(10, 0), ts(20, 0), ts(10, 0)];
        let records =
            Classifier::aggregate(&assignments, Some(&analogs), Duration::days(1), 2).unwrap();
        assert_eq!(records[0].best_match, Some(ts(10, 0)));
    }

    #[test]
    fn test_aggregate_rejects_mismatched_analog_count() {
        let assignments = vec![make_assignment(1, 0, 0, 0, 2)];
        let analogs = vec![ts(1, 0), ts(2, 0)];
        assert!(Classifier::aggregate(
            &assignments,
            Some(&analogs),
            Duration::days(1),
            2
        )
        .is_err());
    }

    #[test]
    fn test_aggregate_rejects_nonpositive_period() {
        let assignments = vec![make_assignment(1, 0, 0, 0, 2)];
        assert!(
            Classifier::aggregate(&assignments, None, Duration::seconds(0), 2).is_err()
        );
    }

    #[test]
    fn test_aggregate_subdaily_periods() {
        // 12-hour periods: 00-12 and 12-24.
        let assignments = vec![
            make_assignment(1, 0, 0, 0, 2),
            make_assignment(1, 6, 0, 1, 2),
            make_assignment(1, 13, 1, 0, 2),
            make_assignment(1, 18, 1, 0, 2),
        ];
        let records =
            Classifier::aggregate(&assignments, None, Duration::hours(12), 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].period_start, ts(1, 0));
        assert_eq!(records[1].period_start, ts(1, 12));
        assert_eq!(records[1].type_id, 2);
    }
}
