//! ML Models for anomaly detection
//!
//! Model families are fitted on scaled training features and wrapped in a
//! `TrainedOracle`, which is what the consensus engine scores with.

pub mod isolation_forest;
pub mod lof;
pub mod scaler;
pub mod statistical;

pub use isolation_forest::IsolationForest;
pub use lof::LocalOutlierFactor;
pub use scaler::StandardScaler;
pub use statistical::StatisticalModel;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::features::{FeatureMatrix, FeatureSchema};
use super::oracle::{Decision, Label, OracleOutput, ScoringOracle};
use super::quantile;
use crate::error::OracleError;

/// Trait for anomaly detection models
pub trait AnomalyModel: Send + Sync {
    /// Train the model on scaled rows
    fn fit(&mut self, data: &[Vec<f64>]);

    /// Score a sample (higher = more anomalous)
    fn score(&self, sample: &[f64]) -> f64;

    /// Predict if a sample is anomalous
    fn predict(&self, sample: &[f64]) -> bool;

    fn name(&self) -> &str;

    fn is_trained(&self) -> bool;
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Fraction of training rows expected to be anomalous
    pub contamination: f64,
    /// Number of trees for the isolation forest
    pub num_trees: usize,
    /// Sample size for each tree
    pub sample_size: usize,
    /// Neighbourhood size for LOF
    pub n_neighbors: usize,
    /// Reference points kept by LOF
    pub lof_reference_size: usize,
    pub zscore_threshold: f64,
    pub iqr_factor: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            num_trees: 150,
            sample_size: 256,
            n_neighbors: 20,
            lof_reference_size: 2048,
            zscore_threshold: 3.0,
            iqr_factor: 1.5,
            seed: None,
        }
    }
}

/// Score above which `contamination` of the training rows fall
pub(crate) fn contamination_threshold(scores: &[f64], contamination: f64) -> f64 {
    let q = (1.0 - contamination).clamp(0.0, 1.0);
    quantile(scores, q)
}

/// Supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    IsolationForest,
    LocalOutlierFactor,
    Statistical,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::IsolationForest,
        ModelFamily::LocalOutlierFactor,
        ModelFamily::Statistical,
    ];

    /// Registry name of the family
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::IsolationForest => "isolation_forest",
            ModelFamily::LocalOutlierFactor => "local_outlier_factor",
            ModelFamily::Statistical => "statistical",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One fitted model of any family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OracleModel {
    IsolationForest(IsolationForest),
    LocalOutlierFactor(LocalOutlierFactor),
    Statistical(StatisticalModel),
}

impl OracleModel {
    /// Untrained model of a family
    pub fn new(family: ModelFamily, config: &ModelConfig) -> Self {
        match family {
            ModelFamily::IsolationForest => OracleModel::IsolationForest(IsolationForest::new(config)),
            ModelFamily::LocalOutlierFactor => {
                OracleModel::LocalOutlierFactor(LocalOutlierFactor::new(config))
            }
            ModelFamily::Statistical => OracleModel::Statistical(StatisticalModel::new(config)),
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            OracleModel::IsolationForest(_) => ModelFamily::IsolationForest,
            OracleModel::LocalOutlierFactor(_) => ModelFamily::LocalOutlierFactor,
            OracleModel::Statistical(_) => ModelFamily::Statistical,
        }
    }

    fn inner(&self) -> &dyn AnomalyModel {
        match self {
            OracleModel::IsolationForest(m) => m,
            OracleModel::LocalOutlierFactor(m) => m,
            OracleModel::Statistical(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn AnomalyModel {
        match self {
            OracleModel::IsolationForest(m) => m,
            OracleModel::LocalOutlierFactor(m) => m,
            OracleModel::Statistical(m) => m,
        }
    }

    pub fn fit(&mut self, data: &[Vec<f64>]) {
        self.inner_mut().fit(data);
    }

    pub fn is_trained(&self) -> bool {
        self.inner().is_trained()
    }

    /// Binary label per row
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<Label> {
        let model = self.inner();
        rows.iter()
            .map(|row| Label::from_flag(model.predict(row)))
            .collect()
    }

    /// Native decision values per row
    pub fn decision(&self, rows: &[Vec<f64>]) -> Decision {
        match self {
            OracleModel::LocalOutlierFactor(lof) => {
                Decision::Normality(rows.iter().map(|r| lof.decision_value(r)).collect())
            }
            other => {
                let model = other.inner();
                Decision::Anomaly(rows.iter().map(|r| model.score(r)).collect())
            }
        }
    }
}

/// A fitted model bound to its scaler and training schema
#[derive(Debug, Clone)]
pub struct TrainedOracle {
    name: String,
    schema: FeatureSchema,
    scaler: StandardScaler,
    model: OracleModel,
}

impl TrainedOracle {
    pub fn new(
        name: impl Into<String>,
        schema: FeatureSchema,
        scaler: StandardScaler,
        model: OracleModel,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            scaler,
            model,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn model(&self) -> &OracleModel {
        &self.model
    }
}

impl ScoringOracle for TrainedOracle {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, matrix: &FeatureMatrix) -> Result<OracleOutput, OracleError> {
        if matrix.schema() != &self.schema {
            return Err(OracleError::evaluation(
                &self.name,
                format!(
                    "schema mismatch: trained on {}, got {}",
                    self.schema,
                    matrix.schema()
                ),
            ));
        }
        if !self.model.is_trained() {
            return Err(OracleError::evaluation(&self.name, "model is not trained"));
        }

        let scaled = self.scaler.transform(matrix);

        let start = Instant::now();
        let labels = self.model.predict(&scaled);
        let inference_time = start.elapsed();

        let scores = self.model.decision(&scaled).oriented(&labels);

        Ok(OracleOutput {
            labels,
            scores,
            inference_time,
        })
    }
}
