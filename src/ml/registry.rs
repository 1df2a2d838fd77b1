//! Oracle registry
//!
//! Maps oracle names to loaded oracles. Loading is isolated per name: an
//! artifact that is missing or corrupt marks that one name unavailable and
//! leaves the others untouched.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::models::TrainedOracle;
use super::oracle::ScoringOracle;
use super::storage::ArtifactStore;
use crate::error::OracleError;

#[derive(Default)]
pub struct OracleRegistry {
    oracles: BTreeMap<String, Box<dyn ScoringOracle>>,
    unavailable: BTreeMap<String, OracleError>,
}

impl std::fmt::Debug for OracleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleRegistry")
            .field("oracles", &self.names())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored model
    pub fn load(store: &ArtifactStore) -> Self {
        let mut registry = Self::new();

        let names = match store.list_models() {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot list models in {:?}: {}", store.dir(), e);
                return registry;
            }
        };

        let scaler = store.load_scaler();
        if let Err(e) = &scaler {
            if !names.is_empty() {
                warn!("Cannot load scaler from {:?}: {}", store.dir(), e);
            }
        }

        for name in names {
            let artifact = match &scaler {
                Ok(artifact) => artifact,
                Err(e) => {
                    registry.mark_unavailable(OracleError::unavailable(&name, format!("scaler: {}", e)));
                    continue;
                }
            };

            match store.load_model(&name) {
                Ok(model) => registry.register(Box::new(TrainedOracle::new(
                    name.clone(),
                    artifact.schema.clone(),
                    artifact.scaler.clone(),
                    model,
                ))),
                Err(e) => {
                    warn!("Model {} unavailable: {}", name, e);
                    registry.mark_unavailable(OracleError::unavailable(&name, e));
                }
            }
        }

        info!(
            "Loaded {} oracles ({} unavailable) from {:?}",
            registry.oracles.len(),
            registry.unavailable.len(),
            store.dir()
        );
        registry
    }

    /// Register an oracle under its own name, replacing any previous one
    pub fn register(&mut self, oracle: Box<dyn ScoringOracle>) {
        let name = oracle.name().to_string();
        self.unavailable.remove(&name);
        self.oracles.insert(name, oracle);
    }

    pub fn mark_unavailable(&mut self, error: OracleError) {
        let name = error.oracle().to_string();
        self.oracles.remove(&name);
        self.unavailable.insert(name, error);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ScoringOracle> {
        self.oracles.get(name).map(|o| o.as_ref())
    }

    /// All loaded oracles in name order
    pub fn oracles(&self) -> Vec<&dyn ScoringOracle> {
        self.oracles.values().map(|o| o.as_ref()).collect()
    }

    /// Loaded oracles, optionally restricted to one name
    pub fn select(&self, only: Option<&str>) -> Vec<&dyn ScoringOracle> {
        match only {
            Some(name) => self.get(name).into_iter().collect(),
            None => self.oracles(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.oracles.keys().map(String::as_str).collect()
    }

    /// Names that failed to load, with their errors
    pub fn unavailable(&self) -> &BTreeMap<String, OracleError> {
        &self.unavailable
    }

    pub fn len(&self) -> usize {
        self.oracles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.is_empty()
    }
}
