//! Shared data model for the weather-typing engine.
//!
//! One timestamp's full multi-variable spatial state is flattened into a
//! [`FeatureVector`] in a fixed variable-then-row-then-column order. A
//! [`Dataset`] is the chronologically ordered sequence of those vectors plus
//! the [`GridShape`] that describes their layout. Everything that crosses a
//! run boundary derives serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Flat per-timestamp state vector, length `nvar * nrow * ncol`.
pub type FeatureVector = Vec<f64>;

/// Latitude-axis orientation of a source grid.
///
/// The canonical in-engine order is north-to-south; sources that deliver
/// rows south-to-north are flipped during assembly. Derived from grid
/// metadata, never hardcoded per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatOrder {
    NorthToSouth,
    SouthToNorth,
}

impl Default for LatOrder {
    fn default() -> Self {
        Self::NorthToSouth
    }
}

/// Grid layout shared by every vector in a dataset: the ordered variable
/// list and the spatial dimensions of each variable's 2D field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    /// Ordered variable names; the flattening order is fixed by this list.
    pub variables: Vec<String>,
    pub nrow: usize,
    pub ncol: usize,
}

impl GridShape {
    pub fn new(variables: Vec<String>, nrow: usize, ncol: usize) -> Self {
        Self {
            variables,
            nrow,
            ncol,
        }
    }

    /// Number of variables.
    pub fn nvar(&self) -> usize {
        self.variables.len()
    }

    /// Cells per variable field.
    pub fn cells_per_var(&self) -> usize {
        self.nrow * self.ncol
    }

    /// Total feature-vector length: `nvar * nrow * ncol`.
    pub fn feature_len(&self) -> usize {
        self.nvar() * self.nrow * self.ncol
    }

    /// Map a flat feature index back to (variable name, row, col).
    ///
    /// Used to name the offending cell in error messages.
    pub fn locate(&self, flat: usize) -> (&str, usize, usize) {
        let per_var = self.cells_per_var();
        let var = flat / per_var;
        let cell = flat % per_var;
        (
            self.variables.get(var).map_or("<unknown>", String::as_str),
            cell / self.ncol,
            cell % self.ncol,
        )
    }
}

/// Chronologically ordered sequence of (timestamp, feature vector) pairs.
///
/// Invariants enforced at construction: every vector has length
/// `shape.feature_len()`, and timestamps are strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    shape: GridShape,
    timestamps: Vec<DateTime<Utc>>,
    vectors: Vec<FeatureVector>,
}

impl Dataset {
    /// Build a dataset, validating vector lengths and chronological order.
    pub fn new(
        shape: GridShape,
        timestamps: Vec<DateTime<Utc>>,
        vectors: Vec<FeatureVector>,
    ) -> Result<Self> {
        if timestamps.len() != vectors.len() {
            return Err(EngineError::DataShape(format!(
                "{} timestamps but {} vectors",
                timestamps.len(),
                vectors.len()
            )));
        }
        let expect = shape.feature_len();
        for (ts, v) in timestamps.iter().zip(&vectors) {
            if v.len() != expect {
                return Err(EngineError::DataShape(format!(
                    "vector at {} has length {}, expected {} ({} vars x {}x{})",
                    ts.format("%Y-%m-%d %H:%M"),
                    v.len(),
                    expect,
                    shape.nvar(),
                    shape.nrow,
                    shape.ncol
                )));
            }
        }
        for pair in timestamps.windows(2) {
            if pair[1] <= pair[0] {
                return Err(EngineError::Ingestion(format!(
                    "timestamps not strictly increasing at {}",
                    pair[1].format("%Y-%m-%d %H:%M")
                )));
            }
        }
        Ok(Self {
            shape,
            timestamps,
            vectors,
        })
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Iterate (timestamp, vector) pairs in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = (&DateTime<Utc>, &FeatureVector)> {
        self.timestamps.iter().zip(self.vectors.iter())
    }

    /// Replace the vectors wholesale (normalization), keeping shape and
    /// timestamps. Lengths are re-checked.
    pub fn with_vectors(&self, vectors: Vec<FeatureVector>) -> Result<Self> {
        Self::new(self.shape.clone(), self.timestamps.clone(), vectors)
    }
}

/// Coordinates of one node on the SOM grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub x: usize,
    pub y: usize,
}

impl NodeId {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Scalar type id: `x * n_nodey + y`.
    pub fn type_id(&self, n_nodey: usize) -> usize {
        self.x * n_nodey + self.y
    }

    /// Coordinate string in the classification-table format.
    pub fn coordinate_string(&self) -> String {
        format!("({},{})", self.x, self.y)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// One row of the training assignment table: which node won each sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerAssignment {
    pub timestamp: DateTime<Utc>,
    pub node: NodeId,
    pub type_id: usize,
}

/// One aggregated row of the inference output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    /// Start of the resampling period this row covers.
    pub period_start: DateTime<Utc>,
    /// Winning node as a `"(x,y)"` string.
    pub type_coordinate: String,
    /// Scalar type id of the winning node.
    pub type_id: usize,
    /// Closest historical analog, when matching was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_match: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, hour, 0, 0).unwrap()
    }

    fn shape_2x2() -> GridShape {
        GridShape::new(vec!["h500".to_string(), "slp".to_string()], 2, 2)
    }

    #[test]
    fn test_feature_len() {
        let shape = shape_2x2();
        assert_eq!(shape.nvar(), 2);
        assert_eq!(shape.feature_len(), 8);
    }

    #[test]
    fn test_locate_flat_index() {
        let shape = shape_2x2();
        // Second variable, row 1, col 0 => 4 + 2
        let (var, row, col) = shape.locate(6);
        assert_eq!(var, "slp");
        assert_eq!(row, 1);
        assert_eq!(col, 0);
    }

    #[test]
    fn test_dataset_rejects_bad_vector_length() {
        let shape = shape_2x2();
        let result = Dataset::new(shape, vec![ts(0)], vec![vec![1.0; 5]]);
        assert!(matches!(result, Err(EngineError::DataShape(_))));
    }

    #[test]
    fn test_dataset_rejects_unordered_timestamps() {
        let shape = shape_2x2();
        let result = Dataset::new(shape, vec![ts(1), ts(0)], vec![vec![0.0; 8], vec![0.0; 8]]);
        assert!(matches!(result, Err(EngineError::Ingestion(_))));
    }

    #[test]
    fn test_node_type_id_and_display() {
        let node = NodeId::new(2, 1);
        assert_eq!(node.type_id(3), 7);
        assert_eq!(node.coordinate_string(), "(2,1)");
        assert_eq!(format!("{node}"), "(2,1)");
    }
}
