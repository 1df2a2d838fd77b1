//! Model artifact storage
//!
//! Layout of an artifact directory:
//! - `scaler.bin`: fitted scaler and the feature schema it was fitted on
//! - `<name>.bin`: one fitted model per oracle name
//! - `model_scores.json`: training diagnostics per model
//!
//! Binary artifacts are bincode-encoded serde values.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::features::FeatureSchema;
use super::models::{OracleModel, StandardScaler};
use super::training::TrainingReport;
use crate::error::StoreError;

/// Default artifact directory
pub const DEFAULT_MODEL_DIR: &str = "data/models";

const SCALER_FILE: &str = "scaler.bin";
const SCORES_FILE: &str = "model_scores.json";

/// Fitted scaler bound to its schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub schema: FeatureSchema,
    pub scaler: StandardScaler,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub version: String,
}

impl ScalerArtifact {
    pub fn new(schema: FeatureSchema, scaler: StandardScaler, sample_count: usize) -> Self {
        Self {
            schema,
            scaler,
            trained_at: Utc::now(),
            sample_count,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Artifact directory manager
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_DIR)
    }
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serde::encode_into_std_write(value, &mut writer, bincode::config::standard())?;
    writer.flush()?;
    Ok(())
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let value = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
    Ok(value)
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the artifact directory
    pub fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        debug!("Initialized artifact store at {:?}", self.dir);
        Ok(())
    }

    fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", name))
    }

    pub fn save_scaler(&self, artifact: &ScalerArtifact) -> Result<(), StoreError> {
        self.init()?;
        write_bincode(&self.dir.join(SCALER_FILE), artifact)?;
        info!("Saved scaler for {} to {:?}", artifact.schema, self.dir);
        Ok(())
    }

    pub fn load_scaler(&self) -> Result<ScalerArtifact, StoreError> {
        read_bincode(&self.dir.join(SCALER_FILE))
    }

    pub fn save_model(&self, name: &str, model: &OracleModel) -> Result<(), StoreError> {
        self.init()?;
        let path = self.model_path(name);
        write_bincode(&path, model)?;
        info!("Saved model '{}' to {:?}", name, path);
        Ok(())
    }

    pub fn load_model(&self, name: &str) -> Result<OracleModel, StoreError> {
        let path = self.model_path(name);
        let model = read_bincode(&path)?;
        debug!("Loaded model '{}' from {:?}", name, path);
        Ok(model)
    }

    /// Names of the stored models, sorted. A missing directory has none.
    pub fn list_models(&self) -> Result<Vec<String>, StoreError> {
        let mut models = Vec::new();
        if !self.dir.exists() {
            return Ok(models);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "bin").unwrap_or(false)
                && path.file_name().map(|n| n != SCALER_FILE).unwrap_or(false)
            {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    models.push(name.to_string());
                }
            }
        }

        models.sort();
        Ok(models)
    }

    pub fn save_scores(&self, scores: &BTreeMap<String, TrainingReport>) -> Result<(), StoreError> {
        self.init()?;
        let content = serde_json::to_string_pretty(scores)?;
        fs::write(self.dir.join(SCORES_FILE), content)?;
        Ok(())
    }

    /// Training diagnostics, empty when none were saved
    pub fn load_scores(&self) -> Result<BTreeMap<String, TrainingReport>, StoreError> {
        let path = self.dir.join(SCORES_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
