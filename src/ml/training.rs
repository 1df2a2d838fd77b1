//! Model training
//!
//! Fits the scaler and every model family on the flows of one or more
//! captures and computes unsupervised diagnostics per model.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{bail, Context};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::features::{prepare, FeatureSource, FeatureSpec};
use super::models::{ModelConfig, ModelFamily, OracleModel, StandardScaler, TrainedOracle};
use super::oracle::{round2, round_to, Label};
use super::rng_from;
use super::storage::{ArtifactStore, ScalerArtifact};

/// Rows used for the pairwise silhouette computation
const SILHOUETTE_MAX_ROWS: usize = 2000;

/// Unsupervised diagnostics of one trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub training_time_sec: f64,
    pub n_anomalies: usize,
    /// Silhouette of the normal/anomaly split, `None` with a single class
    pub silhouette_separation: Option<f64>,
    /// Mean distance of normal rows to their centroid
    pub cluster_compactness: Option<f64>,
    /// Distance between the normal and anomaly centroids
    pub anomaly_separation: f64,
    /// Mean normal score minus mean anomaly score
    pub density_drop: f64,
    /// Coefficient of variation of the scores
    pub global_outlier_factor: f64,
    /// Label agreement under small noise, percent
    pub stability_index: f64,
    /// Weighted blend of the above
    pub model_strength: f64,
}

/// Everything produced by one training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub scaler: ScalerArtifact,
    pub models: BTreeMap<String, OracleModel>,
    pub reports: BTreeMap<String, TrainingReport>,
}

impl TrainingOutcome {
    /// Oracles ready for evaluation, without a round trip through disk
    pub fn oracles(&self) -> Vec<TrainedOracle> {
        self.models
            .iter()
            .map(|(name, model)| {
                TrainedOracle::new(
                    name.clone(),
                    self.scaler.schema.clone(),
                    self.scaler.scaler.clone(),
                    model.clone(),
                )
            })
            .collect()
    }

    /// Persist scaler, models and scores
    pub fn save(&self, store: &ArtifactStore) -> anyhow::Result<()> {
        store.save_scaler(&self.scaler).context("saving scaler")?;
        for (name, model) in &self.models {
            store
                .save_model(name, model)
                .with_context(|| format!("saving model {}", name))?;
        }
        store.save_scores(&self.reports).context("saving model scores")?;
        Ok(())
    }
}

/// Trains every configured model family
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: ModelConfig,
    spec: FeatureSpec,
    families: Vec<ModelFamily>,
}

impl Default for ModelTrainer {
    fn default() -> Self {
        Self::new(ModelConfig::default(), FeatureSpec::default())
    }
}

impl ModelTrainer {
    pub fn new(config: ModelConfig, spec: FeatureSpec) -> Self {
        Self {
            config,
            spec,
            families: ModelFamily::ALL.to_vec(),
        }
    }

    /// Restrict training to some families
    pub fn with_families(mut self, families: Vec<ModelFamily>) -> Self {
        self.families = families;
        self
    }

    pub fn train<S: FeatureSource>(&self, rows: &[S]) -> anyhow::Result<TrainingOutcome> {
        if rows.is_empty() {
            bail!("no flows to train on");
        }

        let matrix = prepare(rows, &self.spec)?;
        let scaler = StandardScaler::fit(matrix.rows());
        let scaled = scaler.transform(&matrix);
        info!(
            "Training {} model families on {} flows with features {}",
            self.families.len(),
            matrix.n_rows(),
            matrix.schema()
        );

        let trained: Vec<(String, OracleModel, TrainingReport)> = self
            .families
            .par_iter()
            .map(|&family| {
                let start = Instant::now();
                let mut model = OracleModel::new(family, &self.config);
                model.fit(&scaled);
                let training_time = start.elapsed().as_secs_f64();

                let report = self.diagnose(&model, &scaled, training_time);
                info!(
                    "Trained {}: {} anomalies, strength {}",
                    family, report.n_anomalies, report.model_strength
                );
                (family.as_str().to_string(), model, report)
            })
            .collect();

        let mut models = BTreeMap::new();
        let mut reports = BTreeMap::new();
        for (name, model, report) in trained {
            models.insert(name.clone(), model);
            reports.insert(name, report);
        }

        Ok(TrainingOutcome {
            scaler: ScalerArtifact::new(matrix.schema().clone(), scaler, matrix.n_rows()),
            models,
            reports,
        })
    }

    fn diagnose(&self, model: &OracleModel, x: &[Vec<f64>], training_time: f64) -> TrainingReport {
        let labels = model.predict(x);
        let scores = model.decision(x).oriented(&labels);

        let anomalous: Vec<bool> = labels.iter().map(Label::is_anomalous).collect();
        let n_anomalies = anomalous.iter().filter(|&&a| a).count();

        let silhouette_separation = silhouette(x, &anomalous).map(|s| round_to(s, 5));
        let cluster_compactness = compactness(x, &anomalous).map(|c| round_to(c, 5));
        let anomaly_separation = round_to(centroid_separation(x, &anomalous), 5);
        let density_drop = round_to(density_drop(&scores, &anomalous), 5);
        let global_outlier_factor = round_to(outlier_factor(&scores), 5);
        let stability_index = round2(self.stability(model, x, &labels));

        let model_strength = round2(
            0.25 * silhouette_separation.unwrap_or(0.0).max(0.0) * 100.0
                + 0.25 * anomaly_separation
                + 0.20 * density_drop * 10.0
                + 0.10 * global_outlier_factor * 10.0
                + 0.20 * stability_index,
        );

        TrainingReport {
            training_time_sec: round_to(training_time, 4),
            n_anomalies,
            silhouette_separation,
            cluster_compactness,
            anomaly_separation,
            density_drop,
            global_outlier_factor,
            stability_index,
            model_strength,
        }
    }

    /// Label agreement under N(0, 0.01) noise on the scaled rows, 3 trials
    fn stability(&self, model: &OracleModel, x: &[Vec<f64>], labels: &[Label]) -> f64 {
        let Ok(noise) = Normal::new(0.0, 0.01) else {
            return 0.0;
        };
        if x.is_empty() {
            return 0.0;
        }

        let agreements: Vec<f64> = (0..3u64)
            .map(|trial| {
                let mut rng = rng_from(self.config.seed.map(|s| s.wrapping_add(trial)));
                let noisy: Vec<Vec<f64>> = x
                    .iter()
                    .map(|row| row.iter().map(|v| v + noise.sample(&mut rng)).collect())
                    .collect();
                let relabeled = model.predict(&noisy);
                let agree = relabeled.iter().zip(labels).filter(|(a, b)| a == b).count();
                agree as f64 / labels.len() as f64
            })
            .collect();

        100.0 * agreements.iter().sum::<f64>() / agreements.len() as f64
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

fn centroid<'a>(rows: impl Iterator<Item = &'a Vec<f64>>) -> Option<Vec<f64>> {
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for row in rows {
        if sum.is_empty() {
            sum = vec![0.0; row.len()];
        }
        for (s, v) in sum.iter_mut().zip(row) {
            *s += v;
        }
        count += 1;
    }
    (count > 0).then(|| sum.into_iter().map(|s| s / count as f64).collect())
}

fn select<'a>(x: &'a [Vec<f64>], mask: &'a [bool], want: bool) -> impl Iterator<Item = &'a Vec<f64>> {
    x.iter().zip(mask).filter(move |(_, &m)| m == want).map(|(row, _)| row)
}

fn silhouette(x: &[Vec<f64>], anomalous: &[bool]) -> Option<f64> {
    let stride = x.len().div_ceil(SILHOUETTE_MAX_ROWS).max(1);
    let idx: Vec<usize> = (0..x.len()).step_by(stride).collect();

    let n_anom = idx.iter().filter(|&&i| anomalous[i]).count();
    if n_anom == 0 || n_anom == idx.len() {
        return None;
    }

    let total: f64 = idx
        .iter()
        .map(|&i| {
            let (mut own, mut own_n, mut other, mut other_n) = (0.0, 0usize, 0.0, 0usize);
            for &j in &idx {
                if i == j {
                    continue;
                }
                let d = distance(&x[i], &x[j]);
                if anomalous[i] == anomalous[j] {
                    own += d;
                    own_n += 1;
                } else {
                    other += d;
                    other_n += 1;
                }
            }
            if own_n == 0 || other_n == 0 {
                return 0.0;
            }
            let a = own / own_n as f64;
            let b = other / other_n as f64;
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .sum();

    Some(total / idx.len() as f64)
}

fn compactness(x: &[Vec<f64>], anomalous: &[bool]) -> Option<f64> {
    let normal: Vec<&Vec<f64>> = select(x, anomalous, false).collect();
    if normal.len() < 2 {
        return None;
    }
    let center = centroid(normal.iter().copied())?;
    Some(normal.iter().map(|row| distance(row, &center)).sum::<f64>() / normal.len() as f64)
}

fn centroid_separation(x: &[Vec<f64>], anomalous: &[bool]) -> f64 {
    match (
        centroid(select(x, anomalous, false)),
        centroid(select(x, anomalous, true)),
    ) {
        (Some(normal), Some(anomaly)) => distance(&normal, &anomaly),
        _ => 0.0,
    }
}

fn density_drop(scores: &[f64], anomalous: &[bool]) -> f64 {
    let mean_of = |want: bool| {
        let vals: Vec<f64> = scores
            .iter()
            .zip(anomalous)
            .filter(|(_, &a)| a == want)
            .map(|(&s, _)| s)
            .collect();
        (!vals.is_empty()).then(|| vals.iter().sum::<f64>() / vals.len() as f64)
    };

    match mean_of(true) {
        Some(anom) => mean_of(false).unwrap_or(0.0) - anom,
        None => 0.0,
    }
}

fn outlier_factor(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
    std / (mean + 1e-6)
}
