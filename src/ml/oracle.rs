//! Scoring oracle contract
//!
//! An oracle turns a feature matrix into one binary label and one raw score
//! per row. Raw scores are oriented so that larger means more anomalous.
//! Confidence is derived here, not by the oracle, and is only meaningful
//! within the batch it was computed for.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::features::FeatureMatrix;
use crate::error::OracleError;

/// Binary verdict for one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Normal,
    Anomalous,
}

impl Label {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, Label::Anomalous)
    }

    pub fn from_flag(anomalous: bool) -> Self {
        if anomalous {
            Label::Anomalous
        } else {
            Label::Normal
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Normal => write!(f, "NORMAL"),
            Label::Anomalous => write!(f, "ANOMALOUS"),
        }
    }
}

/// What an oracle produced for one matrix
#[derive(Debug, Clone)]
pub struct OracleOutput {
    pub labels: Vec<Label>,
    /// Larger = more anomalous
    pub scores: Vec<f64>,
    /// Time spent in the prediction step alone
    pub inference_time: Duration,
}

/// An anomaly model as seen by the consensus engine
pub trait ScoringOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Score every row of the matrix
    fn score(&self, matrix: &FeatureMatrix) -> Result<OracleOutput, OracleError>;
}

/// Native decision values of a model, before orientation
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Higher = more anomalous, used as is
    Anomaly(Vec<f64>),
    /// Higher = more normal, remapped as `max(raw) - raw`
    Normality(Vec<f64>),
    /// Model has no decision function
    Unavailable,
}

impl Decision {
    /// Scores oriented higher = more anomalous. Without a decision function
    /// the labels stand in: 1 for ANOMALOUS, -1 for NORMAL.
    pub fn oriented(self, labels: &[Label]) -> Vec<f64> {
        match self {
            Decision::Anomaly(scores) => scores,
            Decision::Normality(raw) => {
                let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                raw.into_iter().map(|r| max - r).collect()
            }
            Decision::Unavailable => labels
                .iter()
                .map(|l| if l.is_anomalous() { 1.0 } else { -1.0 })
                .collect(),
        }
    }
}

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to `digits` decimals
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Batch-local min-max confidence in [0, 100], two decimals.
/// All rows get 0 when every score is equal.
pub fn derive_confidence(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if scores.is_empty() || !range.is_finite() || range <= 0.0 {
        return vec![0.0; scores.len()];
    }

    scores
        .iter()
        .map(|&s| round2(100.0 * (s - min) / range))
        .collect()
}
