//! Multi-model consensus engine
//!
//! Runs every oracle over one feature matrix, derives per-oracle diagnostics
//! and majority-votes the high-confidence labels across oracles.
//!
//! Per oracle:
//! - confidence: batch-local min-max of the raw scores
//! - threshold label: confidence >= configured threshold
//! - pseudo precision: share of high-confidence rows that are also ANOMALOUS
//! - stability: agreement of threshold labels under small Gaussian noise
//!
//! Across oracles, a row is ANOMALOUS when at least half of the usable
//! oracles put it above the threshold (an even split counts as ANOMALOUS).
//! Pseudo accuracy is each oracle's agreement with that majority. It measures
//! self-consistency, not correctness.
//!
//! An oracle that fails is reported with its error and left out of the vote.

use std::collections::BTreeMap;

use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::features::FeatureMatrix;
use super::oracle::{derive_confidence, round2, round_to, Label, OracleOutput, ScoringOracle};
use super::rng_from;
use crate::error::OracleError;

/// Consensus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Confidence (0-100) at or above which a row counts as a vote
    pub confidence_threshold: f64,
    /// Number of perturbation trials per oracle
    pub stability_trials: usize,
    /// Noise standard deviation as a fraction of each column's std
    pub noise_fraction: f64,
    /// Seed for the perturbation trials
    pub seed: Option<u64>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 60.0,
            stability_trials: 3,
            noise_fraction: 0.01,
            seed: None,
        }
    }
}

impl ConsensusConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// One oracle's view of one flow. Verdicts are indexed like the matrix rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    /// Larger = more anomalous
    pub raw_score: f64,
    /// 0-100, batch-local
    pub confidence: f64,
    pub label: Label,
    /// confidence >= threshold
    pub high_confidence: bool,
}

/// Per-oracle diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub inference_time_sec: f64,
    pub anomalies_detected: usize,
    pub mean_confidence: f64,
    /// Population variance of the raw scores
    pub score_variance: f64,
    pub pseudo_precision_pct: f64,
    pub stability_pct: f64,
    /// Agreement with the majority vote, not ground truth. `None` when the
    /// oracle did not vote or no majority was formed.
    pub pseudo_accuracy_pct: Option<f64>,
    pub high_conf_anomalies: usize,
    pub predicted_anomalies_by_conf_thresh: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ok,
    Failed { error: String },
}

/// Result of running one oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub status: ModelStatus,
    pub metrics: ModelMetrics,
    pub verdicts: Vec<ModelVerdict>,
}

impl ModelEvaluation {
    fn failed(error: &OracleError) -> Self {
        Self {
            status: ModelStatus::Failed {
                error: error.to_string(),
            },
            metrics: ModelMetrics::default(),
            verdicts: Vec::new(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == ModelStatus::Ok
    }

    /// Binary label per flow
    pub fn labels(&self) -> Vec<Label> {
        self.verdicts.iter().map(|v| v.label).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    Ok,
    /// Every oracle failed, or none was registered
    NoUsableOracles,
    /// The batch had no flows
    NoFlows,
}

/// Majority verdict across usable oracles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub status: ConsensusStatus,
    /// One label per flow
    pub majority: Vec<Label>,
    /// Oracles that took part in the vote
    pub voters: Vec<String>,
}

/// Everything the consensus engine produced for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub models: BTreeMap<String, ModelEvaluation>,
    pub consensus: ConsensusResult,
}

impl Evaluation {
    pub fn model(&self, name: &str) -> Option<&ModelEvaluation> {
        self.models.get(name)
    }

    /// Usable oracles in name order
    pub fn usable(&self) -> impl Iterator<Item = (&str, &ModelEvaluation)> {
        self.models
            .iter()
            .filter(|(_, m)| m.is_usable())
            .map(|(name, m)| (name.as_str(), m))
    }

    /// Alphabetically first usable oracle
    pub fn first_usable(&self) -> Option<(&str, &ModelEvaluation)> {
        self.usable().next()
    }

    /// Errors of the oracles that failed
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.models
            .iter()
            .filter_map(|(name, m)| match &m.status {
                ModelStatus::Failed { error } => Some((name.as_str(), error.as_str())),
                ModelStatus::Ok => None,
            })
            .collect()
    }
}

/// Check the shape of an oracle's output against the matrix
fn validate(output: OracleOutput, rows: usize, name: &str) -> Result<OracleOutput, OracleError> {
    if output.labels.len() != rows || output.scores.len() != rows {
        return Err(OracleError::evaluation(
            name,
            format!(
                "returned {} labels and {} scores for {} rows",
                output.labels.len(),
                output.scores.len(),
                rows
            ),
        ));
    }
    if output.scores.iter().any(|s| !s.is_finite()) {
        return Err(OracleError::evaluation(name, "non-finite score"));
    }
    Ok(output)
}

fn score_checked(oracle: &dyn ScoringOracle, matrix: &FeatureMatrix) -> Result<OracleOutput, OracleError> {
    oracle
        .score(matrix)
        .and_then(|output| validate(output, matrix.n_rows(), oracle.name()))
}

fn high_confidence(confidence: &[f64], threshold: f64) -> Vec<bool> {
    confidence.iter().map(|&c| c >= threshold).collect()
}

/// Per-column noise distributions for the perturbation trials
fn noise_distributions(matrix: &FeatureMatrix, fraction: f64) -> Vec<Option<Normal<f64>>> {
    matrix
        .column_std()
        .into_iter()
        .map(|std| {
            let std = match std {
                Some(s) if s > 0.0 => s,
                _ => 1.0,
            };
            Normal::new(0.0, std * fraction).ok()
        })
        .collect()
}

/// One perturbation trial: fraction of rows whose threshold label survived
fn stability_trial(
    oracle: &dyn ScoringOracle,
    matrix: &FeatureMatrix,
    original: &[bool],
    noise: &[Option<Normal<f64>>],
    threshold: f64,
    seed: Option<u64>,
) -> f64 {
    let mut rng = rng_from(seed);
    let perturbed = matrix.map_cells(|col, value| match &noise[col] {
        Some(dist) => value + dist.sample(&mut rng),
        None => value,
    });

    match score_checked(oracle, &perturbed) {
        Ok(output) => {
            let relabeled = high_confidence(&derive_confidence(&output.scores), threshold);
            let agree = relabeled
                .iter()
                .zip(original)
                .filter(|(a, b)| a == b)
                .count();
            agree as f64 / original.len() as f64
        }
        Err(e) => {
            debug!("Stability trial for {} failed: {}", oracle.name(), e);
            0.0
        }
    }
}

fn evaluate_oracle(
    oracle: &dyn ScoringOracle,
    matrix: &FeatureMatrix,
    noise: &[Option<Normal<f64>>],
    config: &ConsensusConfig,
) -> ModelEvaluation {
    let n = matrix.n_rows();
    if n == 0 {
        return ModelEvaluation {
            status: ModelStatus::Ok,
            metrics: ModelMetrics::default(),
            verdicts: Vec::new(),
        };
    }

    let output = match score_checked(oracle, matrix) {
        Ok(output) => output,
        Err(e) => {
            warn!("Oracle {} failed: {}", oracle.name(), e);
            return ModelEvaluation::failed(&e);
        }
    };

    let threshold = config.confidence_threshold;
    let confidence = derive_confidence(&output.scores);
    let high = high_confidence(&confidence, threshold);

    let verdicts: Vec<ModelVerdict> = output
        .scores
        .iter()
        .zip(&confidence)
        .zip(&output.labels)
        .zip(&high)
        .map(|(((&raw_score, &confidence), &label), &high_confidence)| ModelVerdict {
            raw_score,
            confidence,
            label,
            high_confidence,
        })
        .collect();

    let anomalies_detected = output.labels.iter().filter(|l| l.is_anomalous()).count();
    let predicted = high.iter().filter(|&&h| h).count();
    let high_conf_anomalies = verdicts
        .iter()
        .filter(|v| v.high_confidence && v.label.is_anomalous())
        .count();
    let pseudo_precision = if predicted > 0 {
        100.0 * high_conf_anomalies as f64 / predicted as f64
    } else {
        0.0
    };

    let mean_confidence = confidence.iter().sum::<f64>() / n as f64;
    let mean_score = output.scores.iter().sum::<f64>() / n as f64;
    let score_variance =
        output.scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n as f64;

    let agreements: Vec<f64> = (0..config.stability_trials)
        .into_par_iter()
        .map(|trial| {
            let seed = config.seed.map(|s| s.wrapping_add(trial as u64));
            stability_trial(oracle, matrix, &high, noise, threshold, seed)
        })
        .collect();
    let stability = if agreements.is_empty() {
        0.0
    } else {
        100.0 * agreements.iter().sum::<f64>() / agreements.len() as f64
    };

    debug!(
        "Oracle {}: {} anomalies, {} above threshold, {:.6}s",
        oracle.name(),
        anomalies_detected,
        predicted,
        output.inference_time.as_secs_f64()
    );

    ModelEvaluation {
        status: ModelStatus::Ok,
        metrics: ModelMetrics {
            inference_time_sec: round_to(output.inference_time.as_secs_f64(), 6),
            anomalies_detected,
            mean_confidence: round2(mean_confidence),
            score_variance: round_to(score_variance, 5),
            pseudo_precision_pct: round2(pseudo_precision),
            stability_pct: round2(stability),
            pseudo_accuracy_pct: None,
            high_conf_anomalies,
            predicted_anomalies_by_conf_thresh: predicted,
        },
        verdicts,
    }
}

/// Majority of the threshold labels; ties go to ANOMALOUS
fn majority_vote(voters: &[&ModelEvaluation], rows: usize) -> Vec<Label> {
    let needed = voters.len().div_ceil(2);
    (0..rows)
        .map(|i| {
            let votes = voters.iter().filter(|m| m.verdicts[i].high_confidence).count();
            Label::from_flag(votes >= needed)
        })
        .collect()
}

/// Evaluate a prepared matrix against every oracle
pub fn evaluate_matrix(
    matrix: &FeatureMatrix,
    oracles: &[&dyn ScoringOracle],
    config: &ConsensusConfig,
) -> Evaluation {
    let noise = noise_distributions(matrix, config.noise_fraction);

    let results: Vec<(String, ModelEvaluation)> = oracles
        .par_iter()
        .map(|oracle| {
            (
                oracle.name().to_string(),
                evaluate_oracle(*oracle, matrix, &noise, config),
            )
        })
        .collect();
    let mut models: BTreeMap<String, ModelEvaluation> = results.into_iter().collect();

    let voters: Vec<String> = models
        .iter()
        .filter(|(_, m)| m.is_usable())
        .map(|(name, _)| name.clone())
        .collect();

    let rows = matrix.n_rows();
    let (status, majority) = if voters.is_empty() {
        (ConsensusStatus::NoUsableOracles, Vec::new())
    } else if rows == 0 {
        (ConsensusStatus::NoFlows, Vec::new())
    } else {
        let ballots: Vec<&ModelEvaluation> = voters.iter().filter_map(|n| models.get(n)).collect();
        (ConsensusStatus::Ok, majority_vote(&ballots, rows))
    };

    if !majority.is_empty() {
        for name in &voters {
            if let Some(model) = models.get_mut(name) {
                let agree = model
                    .verdicts
                    .iter()
                    .zip(&majority)
                    .filter(|(v, m)| v.high_confidence == m.is_anomalous())
                    .count();
                model.metrics.pseudo_accuracy_pct = Some(round2(100.0 * agree as f64 / rows as f64));
            }
        }
    }

    info!(
        "Evaluated {} flows with {} oracles ({} usable)",
        rows,
        models.len(),
        voters.len()
    );

    Evaluation {
        models,
        consensus: ConsensusResult {
            status,
            majority,
            voters,
        },
    }
}
