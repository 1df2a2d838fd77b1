//! Error taxonomy
//!
//! Each failure class is contained in the component that raises it:
//! a capture error yields an empty flow table, a missing feature fails one
//! normalization call, and oracle errors are isolated to the named oracle.

use std::path::PathBuf;

use thiserror::Error;

/// Capture source could not be read or decoded.
#[derive(Debug, Error)]
pub enum CaptureReadError {
    #[error("failed to open capture {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt capture {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// A required feature column is absent from at least one flow.
#[derive(Debug, Error)]
#[error("missing required features: {}", .missing.join(", "))]
pub struct MissingFeatureError {
    pub missing: Vec<String>,
}

/// Per-oracle failures. Never global.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Backing artifact missing or corrupt
    #[error("oracle {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    /// Failure while scoring a feature matrix
    #[error("oracle {name} failed during scoring: {reason}")]
    Evaluation { name: String, reason: String },
}

impl OracleError {
    pub fn unavailable(name: impl Into<String>, reason: impl ToString) -> Self {
        OracleError::Unavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn evaluation(name: impl Into<String>, reason: impl ToString) -> Self {
        OracleError::Evaluation {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the oracle this error is isolated to
    pub fn oracle(&self) -> &str {
        match self {
            OracleError::Unavailable { name, .. } | OracleError::Evaluation { name, .. } => name,
        }
    }
}

/// Persistence failures for alert batches and model artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("artifact encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("artifact decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}
