use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::alerts::store::{DEFAULT_ALERT_DIR, DEFAULT_RECENT_FILES};
use crate::alerts::{JsonAlertStore, RECENT_WINDOW_SECS};
use crate::ml::storage::DEFAULT_MODEL_DIR;
use crate::ml::{ArtifactStore, ConsensusConfig, FeatureSpec, ModelConfig};
use crate::threat::ThreatRules;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub features: FeatureSpec,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub threat: ThreatRules,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub models: ModelsConfig,
}

/// Alert persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Directory of persisted alert batches
    pub dir: PathBuf,
    /// Trailing window counted as recent in summaries
    pub recent_window_secs: i64,
    /// Newest batch files read when listing alerts
    pub recent_files: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_ALERT_DIR),
            recent_window_secs: RECENT_WINDOW_SECS,
            recent_files: DEFAULT_RECENT_FILES,
        }
    }
}

impl AlertsConfig {
    pub fn store(&self) -> JsonAlertStore {
        JsonAlertStore::new(&self.dir).with_recent_files(self.recent_files)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.recent_window_secs)
    }
}

/// Model artifact settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Artifact directory
    pub dir: PathBuf,
    /// Training parameters
    pub params: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_MODEL_DIR),
            params: ModelConfig::default(),
        }
    }
}

impl ModelsConfig {
    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.dir)
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load the given file, else the first default location found, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let paths = [
            PathBuf::from("flowsentinel.toml"),
            PathBuf::from("/etc/flowsentinel/config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }
}
