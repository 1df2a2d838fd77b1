//! Batch analysis pipeline
//!
//! Stage entry points are pure functions of their input batch:
//! `aggregate` → `evaluate` → `score_and_classify` → `generate_alerts`.
//! `Analyzer` strings them together over a loaded oracle registry and
//! produces a serializable `AnalysisReport`.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alerts::{summarize_within, Alert, AlertSummary};
use crate::analysis::{analyze_flows, FlowStatistics};
use crate::capture::read_pcap;
use crate::config::Config;
use crate::core::{FlowProtocol, FlowRecord, PacketRecord, Pattern, Severity};
use crate::error::MissingFeatureError;
use crate::ml::{
    evaluate_matrix, prepare, ConsensusConfig, ConsensusResult, ConsensusStatus, Evaluation,
    FeatureSpec, ModelEvaluation, OracleRegistry, ScoringOracle,
};
use crate::threat::{ThreatAssessment, VerdictSource};

pub use crate::alerts::generate_alerts;
pub use crate::flow::aggregate;
pub use crate::threat::score_and_classify;

/// Message of a report built from a capture without usable flows
pub const NO_FLOWS_MESSAGE: &str = "No valid network flows found in capture.";

/// Normalize the flows and run every oracle over the matrix
pub fn evaluate(
    flows: &[FlowRecord],
    oracles: &[&dyn ScoringOracle],
    spec: &FeatureSpec,
    config: &ConsensusConfig,
) -> Result<Evaluation, MissingFeatureError> {
    let matrix = prepare(flows, spec)?;
    debug!("Prepared {}x{} matrix {}", matrix.n_rows(), matrix.n_cols(), matrix.schema());
    Ok(evaluate_matrix(&matrix, oracles, config))
}

/// Oracle whose verdicts feed a flow's score and confidence
fn verdict_model<'a>(
    evaluation: &'a Evaluation,
    source: &VerdictSource,
) -> Option<(&'a str, &'a ModelEvaluation)> {
    match source {
        VerdictSource::Model(name) => evaluation
            .models
            .get_key_value(name)
            .filter(|(_, m)| m.is_usable())
            .map(|(n, m)| (n.as_str(), m)),
        VerdictSource::FirstModel | VerdictSource::Majority => evaluation.first_usable(),
    }
}

/// One flow with its detection outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub id: usize,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: FlowProtocol,
    pub pkt_count: u64,
    pub byte_count: u64,
    pub duration: f64,
    pub pkt_rate: f64,
    pub byte_rate: f64,
    pub unique_src_ports: usize,
    pub unique_dst_ports: usize,
    pub avg_payload_size: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub confidence: f64,
    pub threat_score: u8,
    pub severity: Severity,
    /// Detected pattern, `normal` for unflagged flows
    pub reason: Pattern,
}

impl FlowReport {
    fn new(flow: &FlowRecord, assessment: &ThreatAssessment, anomaly_score: f64, confidence: f64) -> Self {
        Self {
            id: flow.id,
            src: flow.src,
            dst: flow.dst,
            protocol: flow.protocol,
            pkt_count: flow.packet_count,
            byte_count: flow.byte_count,
            duration: flow.duration,
            pkt_rate: flow.pkt_rate,
            byte_rate: flow.byte_rate,
            unique_src_ports: flow.unique_src_ports,
            unique_dst_ports: flow.unique_dst_ports,
            avg_payload_size: flow.avg_payload_size,
            is_anomaly: assessment.is_anomalous(),
            anomaly_score,
            confidence,
            threat_score: assessment.threat_score,
            severity: assessment.severity,
            reason: assessment.pattern.clone(),
        }
    }
}

/// Full result of analysing one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub flows: Vec<FlowReport>,
    pub statistics: FlowStatistics,
    /// Flow ids per detected pattern
    pub patterns: BTreeMap<Pattern, Vec<usize>>,
    pub alerts: Vec<Alert>,
    pub alert_summary: AlertSummary,
    pub model_evaluations: BTreeMap<String, ModelEvaluation>,
    pub consensus: ConsensusResult,
    /// Oracle whose labels produced the flow verdicts
    pub verdict_model: Option<String>,
    /// Oracles that could not be loaded, with their errors
    pub unavailable_models: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalysisReport {
    /// Report for a batch without flows
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            flows: Vec::new(),
            statistics: FlowStatistics::default(),
            patterns: BTreeMap::new(),
            alerts: Vec::new(),
            alert_summary: AlertSummary::default(),
            model_evaluations: BTreeMap::new(),
            consensus: ConsensusResult {
                status: ConsensusStatus::NoFlows,
                majority: Vec::new(),
                voters: Vec::new(),
            },
            verdict_model: None,
            unavailable_models: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn anomalous_flows(&self) -> impl Iterator<Item = &FlowReport> {
        self.flows.iter().filter(|f| f.is_anomaly)
    }
}

fn patterns_of(assessments: &[ThreatAssessment]) -> BTreeMap<Pattern, Vec<usize>> {
    let mut patterns: BTreeMap<Pattern, Vec<usize>> =
        Pattern::DETECTED.iter().map(|p| (p.clone(), Vec::new())).collect();
    for a in assessments.iter().filter(|a| a.is_anomalous()) {
        patterns.entry(a.pattern.clone()).or_default().push(a.flow_id);
    }
    patterns
}

/// Capture analyzer over a loaded oracle registry
#[derive(Debug)]
pub struct Analyzer {
    config: Config,
    registry: OracleRegistry,
    only_model: Option<String>,
}

impl Analyzer {
    pub fn new(config: Config, registry: OracleRegistry) -> Self {
        Self {
            config,
            registry,
            only_model: None,
        }
    }

    /// Load the registry from the configured artifact directory
    pub fn from_config(config: Config) -> Self {
        let registry = OracleRegistry::load(&config.models.store());
        Self::new(config, registry)
    }

    /// Restrict evaluation to one oracle; its labels become the verdicts
    pub fn with_only_model(mut self, name: impl Into<String>) -> Self {
        self.only_model = Some(name.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &OracleRegistry {
        &self.registry
    }

    /// Analyse a pcap file. An unreadable capture gives an empty report
    /// carrying the read error as its message.
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P, now: DateTime<Utc>) -> Result<AnalysisReport, MissingFeatureError> {
        match read_pcap(path.as_ref()) {
            Ok(capture) => self.analyze_packets(&capture.packets, now),
            Err(e) => {
                warn!("{}", e);
                Ok(AnalysisReport::empty(e.to_string()))
            }
        }
    }

    /// Analyse an in-memory packet batch
    pub fn analyze_packets(&self, packets: &[PacketRecord], now: DateTime<Utc>) -> Result<AnalysisReport, MissingFeatureError> {
        let table = aggregate(packets);
        let flows = table.flows();
        if flows.is_empty() {
            info!("Capture produced no flows ({} packets skipped)", table.stats().packets_skipped());
            return Ok(AnalysisReport::empty(NO_FLOWS_MESSAGE));
        }

        let oracles = self.registry.select(self.only_model.as_deref());
        if let Some(name) = &self.only_model {
            if oracles.is_empty() {
                warn!("Requested model '{}' is not loaded", name);
            }
        }

        let evaluation = evaluate(flows, &oracles, &self.config.features, &self.config.consensus)?;
        for (name, error) in evaluation.failures() {
            warn!("Model {} excluded from consensus: {}", name, error);
        }

        let mut rules = self.config.threat.clone();
        if let Some(name) = &self.only_model {
            rules.verdict = VerdictSource::Model(name.clone());
        }
        let assessments = score_and_classify(flows, &evaluation, &rules);

        let chosen = verdict_model(&evaluation, &rules.verdict);
        let flow_reports = flows
            .iter()
            .zip(&assessments)
            .map(|(flow, assessment)| {
                let (score, confidence) = chosen
                    .and_then(|(_, m)| m.verdicts.get(flow.id))
                    .map(|v| (v.raw_score, v.confidence))
                    .unwrap_or((0.0, 0.0));
                FlowReport::new(flow, assessment, score, confidence)
            })
            .collect();

        let (alerts, _) = generate_alerts(flows, &assessments, now);
        let alert_summary = summarize_within(&alerts, now, self.config.alerts.recent_window());
        info!(
            "Analysed {} flows: {} alerts, consensus {:?}",
            flows.len(),
            alerts.len(),
            evaluation.consensus.status
        );

        Ok(AnalysisReport {
            flows: flow_reports,
            statistics: analyze_flows(flows),
            patterns: patterns_of(&assessments),
            alerts,
            alert_summary,
            verdict_model: chosen.map(|(name, _)| name.to_string()),
            model_evaluations: evaluation.models,
            consensus: evaluation.consensus,
            unavailable_models: self
                .registry
                .unavailable()
                .iter()
                .map(|(name, e)| (name.clone(), e.to_string()))
                .collect(),
            message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::ml::{FeatureMatrix, Label, OracleOutput};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Flags rows whose pkt_count exceeds a cutoff; the score is pkt_count
    struct CountOracle {
        name: &'static str,
        cutoff: f64,
    }

    impl ScoringOracle for CountOracle {
        fn name(&self) -> &str {
            self.name
        }

        fn score(&self, matrix: &FeatureMatrix) -> Result<OracleOutput, OracleError> {
            let idx = matrix
                .schema()
                .index_of("pkt_count")
                .ok_or_else(|| OracleError::evaluation(self.name, "no pkt_count"))?;
            let scores: Vec<f64> = matrix.rows().iter().map(|r| r[idx]).collect();
            Ok(OracleOutput {
                labels: scores.iter().map(|&s| Label::from_flag(s > self.cutoff)).collect(),
                scores,
                inference_time: Duration::ZERO,
            })
        }
    }

    struct BrokenOracle;

    impl ScoringOracle for BrokenOracle {
        fn name(&self) -> &str {
            "broken"
        }

        fn score(&self, _: &FeatureMatrix) -> Result<OracleOutput, OracleError> {
            Err(OracleError::evaluation("broken", "artifact mismatch"))
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 9, 0, last))
    }

    /// One chatty flow scanning 30 ports plus a handful of quiet ones
    fn packets() -> Vec<PacketRecord> {
        let mut packets: Vec<PacketRecord> = (0..30u16)
            .map(|i| PacketRecord::tcp(i as f64 * 0.1, ip(1), ip(200), 40000, 20 + i, 60))
            .collect();
        for host in 2..6u8 {
            packets.push(PacketRecord::udp(0.0, ip(host), ip(200), 5353, 53, 80));
            packets.push(PacketRecord::udp(1.0, ip(200), ip(host), 53, 5353, 120));
        }
        packets
    }

    fn analyzer(registry: OracleRegistry) -> Analyzer {
        let mut config = Config::default();
        config.consensus.seed = Some(3);
        Analyzer::new(config, registry)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_evaluate_missing_required_feature() {
        let table = aggregate(&packets());
        let spec = FeatureSpec {
            required: vec!["pkt_count".into(), "jitter".into()],
            optional: vec![],
        };
        let err = evaluate(table.flows(), &[], &spec, &ConsensusConfig::default()).unwrap_err();
        assert_eq!(err.missing, vec!["jitter".to_string()]);
    }

    #[test]
    fn test_scanner_flow_alerts() {
        let mut registry = OracleRegistry::new();
        registry.register(Box::new(CountOracle { name: "counts", cutoff: 10.0 }));
        let report = analyzer(registry).analyze_packets(&packets(), now()).unwrap();

        assert_eq!(report.flows.len(), 5);
        assert_eq!(report.verdict_model.as_deref(), Some("counts"));
        assert_eq!(report.alerts.len(), 1);

        let alert = &report.alerts[0];
        assert_eq!(alert.pattern, Pattern::PortScan);
        assert_eq!(alert.source_address, ip(1));
        assert_eq!(alert.packet_count, 30);
        assert_eq!(report.alert_summary.total, 1);
        assert_eq!(report.patterns[&Pattern::PortScan].len(), 1);

        let scanner = report.anomalous_flows().next().unwrap();
        assert_eq!(scanner.reason, Pattern::PortScan);
        assert_eq!(scanner.confidence, 100.0);
        assert_eq!(scanner.threat_score, 70);
        assert_eq!(scanner.severity, Severity::High);
        assert!(report.flows.iter().filter(|f| !f.is_anomaly).all(|f| f.reason == Pattern::Normal));
    }

    #[test]
    fn test_failed_oracle_is_isolated() {
        let mut registry = OracleRegistry::new();
        registry.register(Box::new(BrokenOracle));
        registry.register(Box::new(CountOracle { name: "counts", cutoff: 10.0 }));
        let report = analyzer(registry).analyze_packets(&packets(), now()).unwrap();

        assert!(!report.model_evaluations["broken"].is_usable());
        assert_eq!(report.consensus.voters, vec!["counts".to_string()]);
        assert_eq!(report.verdict_model.as_deref(), Some("counts"));
        assert_eq!(report.alerts.len(), 1);
    }

    #[test]
    fn test_no_oracles_means_no_alerts() {
        let report = analyzer(OracleRegistry::new()).analyze_packets(&packets(), now()).unwrap();
        assert_eq!(report.consensus.status, ConsensusStatus::NoUsableOracles);
        assert!(report.alerts.is_empty());
        assert!(report.flows.iter().all(|f| !f.is_anomaly && f.confidence == 0.0));
        assert_eq!(report.statistics.total_flows, 5);
    }

    #[test]
    fn test_only_model_selects_verdicts() {
        let mut registry = OracleRegistry::new();
        registry.register(Box::new(CountOracle { name: "a_lenient", cutoff: 100.0 }));
        registry.register(Box::new(CountOracle { name: "b_strict", cutoff: 1.0 }));

        let all = analyzer(registry).analyze_packets(&packets(), now()).unwrap();
        assert_eq!(all.verdict_model.as_deref(), Some("a_lenient"));
        assert!(all.alerts.is_empty());

        let mut registry = OracleRegistry::new();
        registry.register(Box::new(CountOracle { name: "a_lenient", cutoff: 100.0 }));
        registry.register(Box::new(CountOracle { name: "b_strict", cutoff: 1.0 }));
        let only = analyzer(registry)
            .with_only_model("b_strict")
            .analyze_packets(&packets(), now())
            .unwrap();
        assert_eq!(only.model_evaluations.len(), 1);
        assert_eq!(only.verdict_model.as_deref(), Some("b_strict"));
        assert_eq!(only.alerts.len(), 5);
    }

    #[test]
    fn test_empty_capture_report() {
        let report = analyzer(OracleRegistry::new())
            .analyze_packets(&[PacketRecord::non_ip(0.0, 42)], now())
            .unwrap();
        assert!(report.flows.is_empty());
        assert!(report.alerts.is_empty());
        assert_eq!(report.alert_summary.total, 0);
        assert_eq!(report.message.as_deref(), Some(NO_FLOWS_MESSAGE));
    }

    #[test]
    fn test_unreadable_capture_report() {
        let report = analyzer(OracleRegistry::new())
            .analyze_file("/nonexistent/capture.pcap", now())
            .unwrap();
        assert!(report.flows.is_empty());
        assert!(report.message.unwrap().contains("failed to open capture"));
    }
}
