//! Detection classification types
//!
//! Severity bands and attack pattern categories shared by the threat
//! scorer and the alert generator.

use serde::{Deserialize, Serialize};

/// Detection severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All bands, lowest first
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pattern attached to a flow, i.e. the reason it was flagged
///
/// Serialized as its plain name. Names that are not recognized survive a
/// round trip as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Pattern {
    PortScan,
    DdosSuspect,
    DataExfiltration,
    Anomaly,
    /// Flow was not flagged
    Normal,
    Other(String),
}

impl Pattern {
    /// Patterns an anomalous flow can be classified as, in rule order
    pub const DETECTED: [Pattern; 4] = [
        Pattern::PortScan,
        Pattern::DdosSuspect,
        Pattern::DataExfiltration,
        Pattern::Anomaly,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::PortScan => "port_scan",
            Pattern::DdosSuspect => "ddos_suspect",
            Pattern::DataExfiltration => "data_exfiltration",
            Pattern::Anomaly => "anomaly",
            Pattern::Normal => "normal",
            Pattern::Other(name) => name,
        }
    }
}

impl From<String> for Pattern {
    fn from(name: String) -> Self {
        match name.as_str() {
            "port_scan" => Pattern::PortScan,
            "ddos_suspect" => Pattern::DdosSuspect,
            "data_exfiltration" => Pattern::DataExfiltration,
            "anomaly" => Pattern::Anomaly,
            "normal" => Pattern::Normal,
            _ => Pattern::Other(name),
        }
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.as_str().to_string()
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
