//! Anomaly detection and multi-model consensus
//!
//! # Components
//! - `features`: fixed-schema feature matrices built from flows
//! - `oracle`: the scoring contract every model satisfies, and confidence
//! - `models`: concrete model families and the scaler
//! - `consensus`: runs every oracle over one matrix and votes
//! - `training` / `storage` / `registry`: fitting, persisting and loading
//!
//! # Example
//! ```ignore
//! use flowsentinel::ml::{prepare, evaluate_matrix, ConsensusConfig, FeatureSpec};
//!
//! let matrix = prepare(table.flows(), &FeatureSpec::default())?;
//! let evaluation = evaluate_matrix(&matrix, &registry.oracles(), &ConsensusConfig::default());
//! for (name, model) in &evaluation.models {
//!     println!("{}: stability {}%", name, model.metrics.stability_pct);
//! }
//! ```

pub mod consensus;
pub mod features;
pub mod models;
pub mod oracle;
pub mod registry;
pub mod storage;
pub mod training;

use rand::rngs::StdRng;
use rand::SeedableRng;

pub use consensus::{
    evaluate_matrix, ConsensusConfig, ConsensusResult, ConsensusStatus, Evaluation,
    ModelEvaluation, ModelMetrics, ModelStatus, ModelVerdict,
};
pub use features::{prepare, FeatureMatrix, FeatureSchema, FeatureSource, FeatureSpec};
pub use models::{
    AnomalyModel, IsolationForest, LocalOutlierFactor, ModelConfig, ModelFamily, OracleModel,
    StandardScaler, StatisticalModel, TrainedOracle,
};
pub use oracle::{derive_confidence, Decision, Label, OracleOutput, ScoringOracle};
pub use registry::OracleRegistry;
pub use storage::{ArtifactStore, ScalerArtifact};
pub use training::{ModelTrainer, TrainingOutcome, TrainingReport};

/// Seeded RNG when a seed is given, OS-seeded otherwise
pub(crate) fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Linear-interpolated quantile, `q` in [0, 1]. Empty input gives 0.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_interpolates() {
        let values = [100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(quantile(&values, 0.5), 300.0);
        assert!((quantile(&values, 0.95) - 480.0).abs() < 1e-9);
        assert_eq!(quantile(&values, 0.0), 100.0);
        assert_eq!(quantile(&values, 1.0), 500.0);
        assert_eq!(quantile(&[], 0.95), 0.0);
        assert_eq!(quantile(&[7.0], 0.95), 7.0);
    }

    #[test]
    fn test_seeded_rng_repeats() {
        use rand::Rng;
        let a: u64 = rng_from(Some(9)).random();
        let b: u64 = rng_from(Some(9)).random();
        assert_eq!(a, b);
    }
}
