//! Local Outlier Factor (novelty mode)
//!
//! Keeps a reference set of training points and compares the local
//! reachability density of a query with that of its k nearest neighbours.
//! The native decision value is the negated outlier factor, so higher
//! means more normal.

use rand::seq::index;
use serde::{Deserialize, Serialize};

use super::{contamination_threshold, AnomalyModel, ModelConfig};
use crate::ml::rng_from;

/// Local Outlier Factor model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    n_neighbors: usize,
    /// Upper bound on stored reference points
    max_reference: usize,
    contamination: f64,
    seed: Option<u64>,
    reference: Vec<Vec<f64>>,
    /// Distance to the k-th neighbour of each reference point
    k_distances: Vec<f64>,
    /// Local reachability density of each reference point
    lrds: Vec<f64>,
    /// Outlier factors above this are anomalies
    threshold: f64,
    trained: bool,
}

impl Default for LocalOutlierFactor {
    fn default() -> Self {
        Self::new(&ModelConfig::default())
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Reachability density floor for duplicated points
const MIN_REACH: f64 = 1e-10;

impl LocalOutlierFactor {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            n_neighbors: config.n_neighbors.max(1),
            max_reference: config.lof_reference_size.max(2),
            contamination: config.contamination,
            seed: config.seed,
            reference: Vec::new(),
            k_distances: Vec::new(),
            lrds: Vec::new(),
            threshold: 1.5,
            trained: false,
        }
    }

    fn k(&self) -> usize {
        self.n_neighbors.min(self.reference.len().saturating_sub(1)).max(1)
    }

    /// k nearest reference points, optionally excluding one index
    fn neighbours(&self, sample: &[f64], exclude: Option<usize>) -> Vec<(usize, f64)> {
        let mut dists: Vec<(usize, f64)> = self
            .reference
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude)
            .map(|(i, r)| (i, distance(sample, r)))
            .collect();
        dists.sort_by(|a, b| a.1.total_cmp(&b.1));
        dists.truncate(self.k());
        dists
    }

    fn local_density(&self, neighbours: &[(usize, f64)]) -> f64 {
        if neighbours.is_empty() {
            return 1.0;
        }
        let reach: f64 = neighbours
            .iter()
            .map(|&(j, d)| d.max(self.k_distances[j]))
            .sum::<f64>()
            / neighbours.len() as f64;
        1.0 / reach.max(MIN_REACH)
    }

    /// Outlier factor of a query point (about 1 for inliers)
    pub fn outlier_factor(&self, sample: &[f64]) -> f64 {
        if self.reference.len() < 2 {
            return 1.0;
        }
        let neighbours = self.neighbours(sample, None);
        let lrd = self.local_density(&neighbours);
        let mean_lrd =
            neighbours.iter().map(|&(j, _)| self.lrds[j]).sum::<f64>() / neighbours.len() as f64;
        mean_lrd / lrd
    }

    /// Native decision value, higher = more normal
    pub fn decision_value(&self, sample: &[f64]) -> f64 {
        -self.outlier_factor(sample)
    }
}

impl AnomalyModel for LocalOutlierFactor {
    fn fit(&mut self, data: &[Vec<f64>]) {
        if data.is_empty() {
            return;
        }

        self.reference = if data.len() > self.max_reference {
            let mut rng = rng_from(self.seed);
            index::sample(&mut rng, data.len(), self.max_reference)
                .into_iter()
                .map(|i| data[i].clone())
                .collect()
        } else {
            data.to_vec()
        };

        let n = self.reference.len();
        let neighbourhoods: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|i| self.neighbours(&self.reference[i], Some(i)))
            .collect();

        self.k_distances = neighbourhoods
            .iter()
            .map(|nb| nb.last().map(|&(_, d)| d).unwrap_or(0.0))
            .collect();
        self.lrds = neighbourhoods
            .iter()
            .map(|nb| self.local_density(nb))
            .collect();

        self.trained = true;

        let scores: Vec<f64> = (0..n)
            .map(|i| {
                let nb = &neighbourhoods[i];
                if nb.is_empty() {
                    return 1.0;
                }
                let mean_lrd = nb.iter().map(|&(j, _)| self.lrds[j]).sum::<f64>() / nb.len() as f64;
                mean_lrd / self.lrds[i]
            })
            .collect();
        self.threshold = contamination_threshold(&scores, self.contamination);
    }

    fn score(&self, sample: &[f64]) -> f64 {
        self.outlier_factor(sample)
    }

    fn predict(&self, sample: &[f64]) -> bool {
        self.score(sample) > self.threshold
    }

    fn name(&self) -> &str {
        "LocalOutlierFactor"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}
