//! Standard scaler
//!
//! Centers each column on its training mean and divides by its population
//! standard deviation. Columns with zero spread are only centered.

use serde::{Deserialize, Serialize};

use crate::ml::features::FeatureMatrix;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(data: &[Vec<f64>]) -> Self {
        let Some(first) = data.first() else {
            return Self::default();
        };
        let n = data.len() as f64;
        let width = first.len();

        let means: Vec<f64> = (0..width)
            .map(|i| data.iter().map(|row| row[i]).sum::<f64>() / n)
            .collect();
        let stds = (0..width)
            .map(|i| {
                let var = data.iter().map(|row| (row[i] - means[i]).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std.is_finite() && std > 0.0 {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Self { means, stds }
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, &v)| match (self.means.get(i), self.stds.get(i)) {
                (Some(mean), Some(std)) => (v - mean) / std,
                _ => v,
            })
            .collect()
    }

    pub fn transform(&self, matrix: &FeatureMatrix) -> Vec<Vec<f64>> {
        matrix.rows().iter().map(|row| self.transform_row(row)).collect()
    }
}
