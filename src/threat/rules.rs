//! Threat scoring rules
//!
//! Constants and the configurable rule set. No scoring logic lives here.

use serde::{Deserialize, Serialize};

// ============================================================================
// SCORE CONTRIBUTIONS
// ============================================================================

/// Added when the flow's verdict is ANOMALOUS
pub const ANOMALY_POINTS: u32 = 50;

/// Added when the packet rate exceeds the high-rate threshold
pub const PKT_RATE_POINTS: u32 = 15;

/// Added when the byte rate exceeds the high-rate threshold
pub const BYTE_RATE_POINTS: u32 = 15;

/// Added when the flow touches many destination ports
pub const PORT_SPREAD_POINTS: u32 = 20;

// ============================================================================
// TRAFFIC THRESHOLDS
// ============================================================================

/// Packets per second
pub const HIGH_PKT_RATE: f64 = 100.0;

/// Bytes per second
pub const HIGH_BYTE_RATE: f64 = 10_000.0;

/// Distinct destination ports
pub const PORT_SCAN_PORTS: usize = 10;

/// Batch byte-count quantile above which a transfer is large
pub const EXFILTRATION_QUANTILE: f64 = 0.95;

// ============================================================================
// SEVERITY BANDS (lower bounds, score in 0-100)
// ============================================================================

pub const CRITICAL_MIN: u8 = 80;
pub const HIGH_MIN: u8 = 60;
pub const MEDIUM_MIN: u8 = 40;

/// Where a flow's binary verdict comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Binary label of the named oracle
    Model(String),
    /// Binary label of the alphabetically first usable oracle
    #[default]
    FirstModel,
    /// Consensus majority label
    Majority,
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictSource::Model(name) => write!(f, "model:{}", name),
            VerdictSource::FirstModel => write!(f, "first_model"),
            VerdictSource::Majority => write!(f, "majority"),
        }
    }
}

/// Configurable rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatRules {
    pub anomaly_points: u32,
    pub pkt_rate_points: u32,
    pub byte_rate_points: u32,
    pub port_spread_points: u32,
    pub high_pkt_rate: f64,
    pub high_byte_rate: f64,
    pub port_scan_ports: usize,
    pub exfiltration_quantile: f64,
    pub verdict: VerdictSource,
}

impl Default for ThreatRules {
    fn default() -> Self {
        Self {
            anomaly_points: ANOMALY_POINTS,
            pkt_rate_points: PKT_RATE_POINTS,
            byte_rate_points: BYTE_RATE_POINTS,
            port_spread_points: PORT_SPREAD_POINTS,
            high_pkt_rate: HIGH_PKT_RATE,
            high_byte_rate: HIGH_BYTE_RATE,
            port_scan_ports: PORT_SCAN_PORTS,
            exfiltration_quantile: EXFILTRATION_QUANTILE,
            verdict: VerdictSource::FirstModel,
        }
    }
}

impl ThreatRules {
    pub fn with_verdict(mut self, verdict: VerdictSource) -> Self {
        self.verdict = verdict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_source_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            verdict: VerdictSource,
        }

        let w: Wrapper = toml::from_str("verdict = \"majority\"").unwrap();
        assert_eq!(w.verdict, VerdictSource::Majority);

        let w: Wrapper = toml::from_str("verdict = { model = \"statistical\" }").unwrap();
        assert_eq!(w.verdict, VerdictSource::Model("statistical".to_string()));
    }

    #[test]
    fn test_default_rules() {
        let rules = ThreatRules::default();
        assert_eq!(
            rules.anomaly_points + rules.pkt_rate_points + rules.byte_rate_points + rules.port_spread_points,
            100
        );
        assert_eq!(rules.verdict, VerdictSource::FirstModel);
    }
}
