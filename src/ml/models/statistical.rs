//! Statistical model for anomaly detection
//!
//! Uses statistical methods (z-score, IQR) for anomaly detection.

use serde::{Deserialize, Serialize};

use super::{contamination_threshold, AnomalyModel, ModelConfig};
use crate::ml::quantile;

/// Statistical anomaly detection model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalModel {
    /// Mean of each feature
    means: Vec<f64>,
    /// Standard deviation of each feature
    stds: Vec<f64>,
    /// 25th percentile (Q1)
    q1s: Vec<f64>,
    /// 75th percentile (Q3)
    q3s: Vec<f64>,
    count: u64,
    zscore_threshold: f64,
    iqr_factor: f64,
    contamination: f64,
    /// Scores above this are anomalies
    threshold: f64,
    trained: bool,
}

impl Default for StatisticalModel {
    fn default() -> Self {
        Self::new(&ModelConfig::default())
    }
}

impl StatisticalModel {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            means: Vec::new(),
            stds: Vec::new(),
            q1s: Vec::new(),
            q3s: Vec::new(),
            count: 0,
            zscore_threshold: config.zscore_threshold,
            iqr_factor: config.iqr_factor,
            contamination: config.contamination,
            threshold: 0.5,
            trained: false,
        }
    }

    /// Calculate z-score for a value
    fn zscore(&self, value: f64, feature_idx: usize) -> f64 {
        if feature_idx >= self.stds.len() || self.stds[feature_idx] < f64::EPSILON {
            return 0.0;
        }
        (value - self.means[feature_idx]) / self.stds[feature_idx]
    }

    fn is_iqr_outlier(&self, value: f64, feature_idx: usize) -> bool {
        if feature_idx >= self.q1s.len() {
            return false;
        }
        let q1 = self.q1s[feature_idx];
        let q3 = self.q3s[feature_idx];
        let iqr = q3 - q1;
        value < (q1 - self.iqr_factor * iqr) || value > (q3 + self.iqr_factor * iqr)
    }
}

impl AnomalyModel for StatisticalModel {
    fn fit(&mut self, data: &[Vec<f64>]) {
        if data.is_empty() {
            return;
        }

        let n_features = data[0].len();
        let n_samples = data.len() as f64;

        self.means = (0..n_features)
            .map(|i| data.iter().map(|s| s[i]).sum::<f64>() / n_samples)
            .collect();

        self.stds = (0..n_features)
            .map(|i| {
                let var = data
                    .iter()
                    .map(|s| (s[i] - self.means[i]).powi(2))
                    .sum::<f64>()
                    / n_samples;
                var.sqrt()
            })
            .collect();

        self.q1s = Vec::with_capacity(n_features);
        self.q3s = Vec::with_capacity(n_features);
        for i in 0..n_features {
            let values: Vec<f64> = data.iter().map(|s| s[i]).collect();
            self.q1s.push(quantile(&values, 0.25));
            self.q3s.push(quantile(&values, 0.75));
        }

        self.count = data.len() as u64;
        self.trained = true;

        let scores: Vec<f64> = data.iter().map(|row| self.score(row)).collect();
        self.threshold = contamination_threshold(&scores, self.contamination);
    }

    fn score(&self, sample: &[f64]) -> f64 {
        if !self.trained {
            return 0.5;
        }

        let n_features = sample.len().min(self.means.len());
        if n_features == 0 {
            return 0.0;
        }

        let mut total_zscore = 0.0;
        let mut outlier_count = 0;

        for (i, &val) in sample.iter().take(n_features).enumerate() {
            let z = self.zscore(val, i).abs();
            total_zscore += z;

            if z > self.zscore_threshold || self.is_iqr_outlier(val, i) {
                outlier_count += 1;
            }
        }

        let avg_zscore = total_zscore / n_features as f64;
        let outlier_ratio = outlier_count as f64 / n_features as f64;

        // 6 stddev saturates the z-score component
        let zscore_component = (avg_zscore / 6.0).min(1.0);

        (zscore_component * 0.6 + outlier_ratio * 0.4).clamp(0.0, 1.0)
    }

    fn predict(&self, sample: &[f64]) -> bool {
        self.score(sample) > self.threshold
    }

    fn name(&self) -> &str {
        "StatisticalModel"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}
