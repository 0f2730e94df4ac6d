//! Self-organizing competitive-learning cluster engine.
//!
//! A 2D grid of `n_nodex x n_nodey` prototype vectors living in the same
//! space as the training dataset. Training is strictly sequential: each
//! iteration picks one sample (seeded random selection), finds the winner
//! node, and pulls every prototype toward the sample weighted by a
//! neighborhood kernel whose radius and learning rate decay asymptotically
//! over the run. Winner lookup and quantization error are read-only and
//! parallel across samples.
//!
//! Determinism contract: fixed seed + fixed hyperparameters + fixed dataset
//! reproduce the same prototype grid.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::{Dataset, FeatureVector, NodeId};

/// Neighborhood kernel shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighborhood {
    /// Smooth kernel: `exp(-d^2 / (2 * sigma^2))` over grid distance.
    Gaussian,
    /// Hard cutoff: 1 inside the radius, 0 outside.
    Bubble,
}

impl std::fmt::Display for Neighborhood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gaussian => write!(f, "gaussian"),
            Self::Bubble => write!(f, "bubble"),
        }
    }
}

/// Asymptotic (inverse-linear) decay: `value / (1 + t / (T/2))`.
///
/// Monotonically non-increasing in `t`, reaching `value / 3` at `t = T`.
fn asymptotic_decay(value: f64, t: usize, iterations: usize) -> f64 {
    value / (1.0 + t as f64 / (iterations as f64 / 2.0))
}

/// Euclidean distance between two feature vectors.
pub(crate) fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// The SOM cluster engine: prototype grid plus training hyperparameters.
#[derive(Debug, Clone)]
pub struct SomGrid {
    n_nodex: usize,
    n_nodey: usize,
    dim: usize,
    sigma: f64,
    learning_rate: f64,
    iterations: usize,
    neighborhood: Neighborhood,
    seed: u64,
    trained: bool,
    /// Flat prototype storage, indexed `x * n_nodey + y`.
    prototypes: Vec<FeatureVector>,
}

impl SomGrid {
    /// Create an untrained engine. Prototypes are initialized on `train`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_nodex: usize,
        n_nodey: usize,
        dim: usize,
        sigma: f64,
        learning_rate: f64,
        iterations: usize,
        neighborhood: Neighborhood,
        seed: u64,
    ) -> Result<Self> {
        if n_nodex == 0 || n_nodey == 0 {
            return Err(EngineError::config(
                "n_nodex/n_nodey",
                format!("node grid must be non-empty, got {n_nodex}x{n_nodey}"),
            ));
        }
        if dim == 0 {
            return Err(EngineError::config("dim", "feature dimension must be > 0"));
        }
        if !(sigma > 0.0) {
            return Err(EngineError::config("sigma", format!("must be > 0, got {sigma}")));
        }
        if !(learning_rate > 0.0) {
            return Err(EngineError::config(
                "learning_rate",
                format!("must be > 0, got {learning_rate}"),
            ));
        }
        if iterations == 0 {
            return Err(EngineError::config("iterations", "must be >= 1"));
        }
        Ok(Self {
            n_nodex,
            n_nodey,
            dim,
            sigma,
            learning_rate,
            iterations,
            neighborhood,
            seed,
            trained: false,
            prototypes: Vec::new(),
        })
    }

    /// Rebuild a trained engine from archived parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        n_nodex: usize,
        n_nodey: usize,
        dim: usize,
        sigma: f64,
        learning_rate: f64,
        iterations: usize,
        neighborhood: Neighborhood,
        seed: u64,
        prototypes: Vec<FeatureVector>,
    ) -> Result<Self> {
        if prototypes.len() != n_nodex * n_nodey {
            return Err(EngineError::ArtifactVersion(format!(
                "archived prototype count {} does not match {}x{} node grid",
                prototypes.len(),
                n_nodex,
                n_nodey
            )));
        }
        for (i, p) in prototypes.iter().enumerate() {
            if p.len() != dim {
                return Err(EngineError::ArtifactVersion(format!(
                    "archived prototype {} has dimension {}, expected {}",
                    i,
                    p.len(),
                    dim
                )));
            }
        }
        let mut grid = Self::new(
            n_nodex,
            n_nodey,
            dim,
            sigma,
            learning_rate,
            iterations,
            neighborhood,
            seed,
        )?;
        grid.prototypes = prototypes;
        grid.trained = true;
        Ok(grid)
    }

    pub fn n_nodex(&self) -> usize {
        self.n_nodex
    }

    pub fn n_nodey(&self) -> usize {
        self.n_nodey
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn neighborhood(&self) -> Neighborhood {
        self.neighborhood
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Read access to the prototype grid, indexed `x * n_nodey + y`.
    pub fn prototypes(&self) -> &[FeatureVector] {
        &self.prototypes
    }

    /// Prototype at a given node. Callers hold a trained grid.
    pub(crate) fn prototype(&self, node: NodeId) -> &[f64] {
        &self.prototypes[node.x * self.n_nodey + node.y]
    }

    fn check_dim(&self, v: &[f64]) -> Result<()> {
        if v.len() != self.dim {
            return Err(EngineError::DataShape(format!(
                "input vector has dimension {}, engine configured for {}",
                v.len(),
                self.dim
            )));
        }
        Ok(())
    }

    /// Winner node for an input vector: nearest prototype by Euclidean
    /// distance. Ties break to the lowest (x, then y).
    pub fn winner(&self, v: &[f64]) -> Result<NodeId> {
        self.check_dim(v)?;
        if !self.trained {
            return Err(EngineError::config(
                "engine",
                "winner lookup on an untrained engine",
            ));
        }
        Ok(self.winner_unchecked(v))
    }

    /// Winner over the current prototypes. Iteration order is
    /// (0,0),(0,1),...,(1,0),... with strict `<`, so the first of any
    /// tied pair wins, giving the lowest-(x, then y) tie-break.
    fn winner_unchecked(&self, v: &[f64]) -> NodeId {
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (idx, p) in self.prototypes.iter().enumerate() {
            let d = euclidean(v, p);
            if d < best_dist {
                best_dist = d;
                best = idx;
            }
        }
        NodeId::new(best / self.n_nodey, best % self.n_nodey)
    }

    /// Train the prototype grid on a dataset.
    ///
    /// Sample selection is seeded random per iteration; the whole run is
    /// reproducible from the configured seed.
    pub fn train(&mut self, dataset: &Dataset) -> Result<()> {
        if dataset.is_empty() {
            return Err(EngineError::DataShape(
                "cannot train on an empty dataset".to_string(),
            ));
        }
        if dataset.shape().feature_len() != self.dim {
            return Err(EngineError::DataShape(format!(
                "dataset feature length {} does not match engine dimension {}",
                dataset.shape().feature_len(),
                self.dim
            )));
        }

        info!(
            n_nodex = self.n_nodex,
            n_nodey = self.n_nodey,
            dim = self.dim,
            iterations = self.iterations,
            neighborhood = %self.neighborhood,
            seed = self.seed,
            "training SOM"
        );

        let mut rng = StdRng::seed_from_u64(self.seed);

        // Random prototype init in [-1, 1), same rng stream as sampling.
        let n_nodes = self.n_nodex * self.n_nodey;
        self.prototypes = (0..n_nodes)
            .map(|_| (0..self.dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();

        let samples = dataset.vectors();
        let progress_step = (self.iterations / 10).max(1);

        for t in 0..self.iterations {
            let sample = &samples[rng.gen_range(0..samples.len())];
            let winner = self.winner_unchecked(sample);

            let lr_t = asymptotic_decay(self.learning_rate, t, self.iterations);
            let sigma_t = asymptotic_decay(self.sigma, t, self.iterations);

            for x in 0..self.n_nodex {
                for y in 0..self.n_nodey {
                    let h = self.kernel(NodeId::new(x, y), winner, sigma_t);
                    if h == 0.0 {
                        continue;
                    }
                    let w = lr_t * h;
                    let proto = &mut self.prototypes[x * self.n_nodey + y];
                    for (p, s) in proto.iter_mut().zip(sample) {
                        *p += w * (s - *p);
                    }
                }
            }

            if (t + 1) % progress_step == 0 {
                debug!(iteration = t + 1, total = self.iterations, "SOM training progress");
            }
        }

        self.trained = true;
        Ok(())
    }

    /// Neighborhood weight of `node` relative to `winner` at radius
    /// `sigma_t`, over Euclidean grid distance.
    fn kernel(&self, node: NodeId, winner: NodeId, sigma_t: f64) -> f64 {
        let dx = node.x as f64 - winner.x as f64;
        let dy = node.y as f64 - winner.y as f64;
        let d2 = dx * dx + dy * dy;
        match self.neighborhood {
            Neighborhood::Gaussian => (-d2 / (2.0 * sigma_t * sigma_t)).exp(),
            Neighborhood::Bubble => {
                if d2.sqrt() <= sigma_t {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Mean distance between each sample and its winner prototype.
    pub fn quantization_error(&self, dataset: &Dataset) -> Result<f64> {
        if !self.trained {
            return Err(EngineError::config(
                "engine",
                "quantization error of an untrained engine",
            ));
        }
        if dataset.is_empty() {
            return Err(EngineError::DataShape(
                "quantization error of an empty dataset".to_string(),
            ));
        }
        if dataset.shape().feature_len() != self.dim {
            return Err(EngineError::DataShape(format!(
                "dataset feature length {} does not match engine dimension {}",
                dataset.shape().feature_len(),
                self.dim
            )));
        }
        let total: f64 = dataset
            .vectors()
            .par_iter()
            .map(|v| {
                let w = self.winner_unchecked(v);
                euclidean(v, self.prototype(w))
            })
            .sum();
        Ok(total / dataset.len() as f64)
    }
}
