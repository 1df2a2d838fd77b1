//! Isolation Forest implementation
//!
//! Anomaly detection using isolation trees. Anomalies are easier to isolate
//! and thus have shorter path lengths in the trees.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::{contamination_threshold, AnomalyModel, ModelConfig};
use crate::ml::rng_from;

/// Isolation Forest model for anomaly detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    /// Individual isolation trees
    trees: Vec<IsolationTree>,
    num_trees: usize,
    /// Sample size for each tree
    sample_size: usize,
    /// Fraction of training rows expected to be anomalous
    contamination: f64,
    /// Scores above this are anomalies
    threshold: f64,
    /// Average path length normalization factor
    avg_path_length: f64,
    seed: Option<u64>,
    trained: bool,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(&ModelConfig::default())
    }
}

impl IsolationForest {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            trees: Vec::new(),
            num_trees: config.num_trees,
            sample_size: config.sample_size,
            contamination: config.contamination,
            threshold: 0.5,
            avg_path_length: 0.0,
            seed: config.seed,
            trained: false,
        }
    }

    /// Create with custom parameters
    pub fn with_params(num_trees: usize, sample_size: usize, seed: Option<u64>) -> Self {
        Self::new(&ModelConfig {
            num_trees,
            sample_size,
            seed,
            ..ModelConfig::default()
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Calculate average path length for normalization (c(n) function)
    fn average_path_length(n: usize) -> f64 {
        if n <= 1 {
            return 0.0;
        }
        let n = n as f64;
        2.0 * ((n - 1.0).ln() + 0.5772156649) - 2.0 * (n - 1.0) / n
    }

    fn score_sample(&self, sample: &[f64]) -> f64 {
        if self.trees.is_empty() || self.avg_path_length == 0.0 {
            return 0.5;
        }

        let total_path_length: f64 = self.trees.iter().map(|tree| tree.path_length(sample)).sum();
        let avg_path = total_path_length / self.trees.len() as f64;

        // s(x) = 2^(-E[h(x)] / c(psi))
        2.0_f64.powf(-avg_path / self.avg_path_length)
    }
}

impl AnomalyModel for IsolationForest {
    fn fit(&mut self, data: &[Vec<f64>]) {
        if data.is_empty() {
            return;
        }

        let mut rng = rng_from(self.seed);
        let n_features = data[0].len();
        let psi = self.sample_size.min(data.len()).max(1);

        self.trees.clear();
        self.avg_path_length = Self::average_path_length(psi);
        let max_depth = (psi as f64).log2().ceil().max(1.0) as usize;

        for _ in 0..self.num_trees {
            // Sample with replacement
            let sample: Vec<&[f64]> = (0..psi)
                .map(|_| data[rng.random_range(0..data.len())].as_slice())
                .collect();

            let tree = IsolationTree::build(&sample, n_features, max_depth, &mut rng);
            self.trees.push(tree);
        }

        let scores: Vec<f64> = data.iter().map(|row| self.score_sample(row)).collect();
        self.threshold = contamination_threshold(&scores, self.contamination);
        self.trained = true;
    }

    fn score(&self, sample: &[f64]) -> f64 {
        self.score_sample(sample)
    }

    fn predict(&self, sample: &[f64]) -> bool {
        self.score(sample) > self.threshold
    }

    fn name(&self) -> &str {
        "IsolationForest"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// A single isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: Option<Box<IsolationNode>>,
}

impl IsolationTree {
    fn build<R: Rng>(samples: &[&[f64]], n_features: usize, max_depth: usize, rng: &mut R) -> Self {
        let root = Self::build_node(samples, n_features, 0, max_depth, rng);
        Self { root }
    }

    fn build_node<R: Rng>(
        samples: &[&[f64]],
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Option<Box<IsolationNode>> {
        if samples.is_empty() {
            return None;
        }

        if depth >= max_depth || samples.len() <= 1 || n_features == 0 {
            return Some(Box::new(IsolationNode::Leaf {
                size: samples.len(),
            }));
        }

        let feature_idx = rng.random_range(0..n_features);

        let mut min_val = f64::MAX;
        let mut max_val = f64::MIN;
        for sample in samples {
            if let Some(&val) = sample.get(feature_idx) {
                min_val = min_val.min(val);
                max_val = max_val.max(val);
            }
        }

        // Constant feature in this partition
        if max_val <= min_val {
            return Some(Box::new(IsolationNode::Leaf {
                size: samples.len(),
            }));
        }

        let split_value = rng.random_range(min_val..max_val);

        let (left_samples, right_samples): (Vec<&[f64]>, Vec<&[f64]>) = samples
            .iter()
            .copied()
            .partition(|s| s.get(feature_idx).map(|&v| v < split_value).unwrap_or(true));

        let left = Self::build_node(&left_samples, n_features, depth + 1, max_depth, rng);
        let right = Self::build_node(&right_samples, n_features, depth + 1, max_depth, rng);

        Some(Box::new(IsolationNode::Internal {
            feature_idx,
            split_value,
            left,
            right,
        }))
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        match &self.root {
            None => 0.0,
            Some(node) => Self::node_path_length(node, sample, 0),
        }
    }

    fn node_path_length(node: &IsolationNode, sample: &[f64], depth: usize) -> f64 {
        match node {
            IsolationNode::Leaf { size } => {
                depth as f64 + IsolationForest::average_path_length(*size)
            }
            IsolationNode::Internal {
                feature_idx,
                split_value,
                left,
                right,
            } => {
                let val = sample.get(*feature_idx).copied().unwrap_or(0.0);
                let next_node = if val < *split_value { left } else { right };

                match next_node {
                    Some(n) => Self::node_path_length(n, sample, depth + 1),
                    None => depth as f64 + 1.0,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    Internal {
        feature_idx: usize,
        split_value: f64,
        left: Option<Box<IsolationNode>>,
        right: Option<Box<IsolationNode>>,
    },
    Leaf {
        size: usize,
    },
}
