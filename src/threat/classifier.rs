//! Threat classifier
//!
//! Deterministic mapping from a flow and its verdict to a score, a severity
//! band and a pattern. Policy lives in `rules`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::rules::{ThreatRules, VerdictSource, CRITICAL_MIN, HIGH_MIN, MEDIUM_MIN};
use crate::core::{FlowRecord, Pattern, Severity};
use crate::ml::{quantile, Evaluation, Label};

/// Scored and classified flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub flow_id: usize,
    /// Verdict the score was computed from
    pub verdict: Label,
    /// 0-100
    pub threat_score: u8,
    pub severity: Severity,
    pub pattern: Pattern,
}

impl ThreatAssessment {
    pub fn is_anomalous(&self) -> bool {
        self.verdict.is_anomalous()
    }
}

/// Rule-based threat score in [0, 100]
pub fn threat_score(flow: &FlowRecord, verdict: Label, rules: &ThreatRules) -> u8 {
    let mut score = 0u32;

    if verdict.is_anomalous() {
        score = score.saturating_add(rules.anomaly_points);
    }
    if flow.pkt_rate > rules.high_pkt_rate {
        score = score.saturating_add(rules.pkt_rate_points);
    }
    if flow.byte_rate > rules.high_byte_rate {
        score = score.saturating_add(rules.byte_rate_points);
    }
    if flow.unique_dst_ports > rules.port_scan_ports {
        score = score.saturating_add(rules.port_spread_points);
    }

    score.min(100) as u8
}

/// Severity band of a score
pub fn severity(score: u8) -> Severity {
    match score {
        s if s >= CRITICAL_MIN => Severity::Critical,
        s if s >= HIGH_MIN => Severity::High,
        s if s >= MEDIUM_MIN => Severity::Medium,
        _ => Severity::Low,
    }
}

/// First matching pattern for an anomalous flow
pub fn classify_pattern(flow: &FlowRecord, byte_count_p95: f64, rules: &ThreatRules) -> Pattern {
    if flow.unique_dst_ports > rules.port_scan_ports {
        Pattern::PortScan
    } else if flow.pkt_rate > rules.high_pkt_rate {
        Pattern::DdosSuspect
    } else if flow.byte_count as f64 > byte_count_p95 {
        Pattern::DataExfiltration
    } else {
        Pattern::Anomaly
    }
}

/// Byte-count quantile over the whole batch
pub fn byte_count_quantile(flows: &[FlowRecord], q: f64) -> f64 {
    let counts: Vec<f64> = flows.iter().map(|f| f.byte_count as f64).collect();
    quantile(&counts, q)
}

/// Verdict per flow according to the configured source. Without a usable
/// verdict every flow is NORMAL.
pub fn resolve_verdicts(evaluation: &Evaluation, source: &VerdictSource, n: usize) -> Vec<Label> {
    let labels = match source {
        VerdictSource::Model(name) => evaluation
            .model(name)
            .filter(|m| m.is_usable())
            .map(|m| m.labels()),
        VerdictSource::FirstModel => evaluation.first_usable().map(|(_, m)| m.labels()),
        VerdictSource::Majority => Some(evaluation.consensus.majority.clone()),
    };

    match labels {
        Some(labels) if labels.len() == n => labels,
        Some(labels) if n > 0 => {
            warn!(
                "Verdict source {} has {} labels for {} flows, treating all as normal",
                source,
                labels.len(),
                n
            );
            vec![Label::Normal; n]
        }
        _ => {
            if n > 0 {
                debug!("No usable verdict from {}, treating all flows as normal", source);
            }
            vec![Label::Normal; n]
        }
    }
}

/// Assess a single flow against its verdict
pub fn assess(flow: &FlowRecord, verdict: Label, byte_count_p95: f64, rules: &ThreatRules) -> ThreatAssessment {
    let threat_score = threat_score(flow, verdict, rules);
    let pattern = if verdict.is_anomalous() {
        classify_pattern(flow, byte_count_p95, rules)
    } else {
        Pattern::Normal
    };

    ThreatAssessment {
        flow_id: flow.id,
        verdict,
        threat_score,
        severity: severity(threat_score),
        pattern,
    }
}

/// Score and classify every flow of a batch
pub fn score_and_classify(
    flows: &[FlowRecord],
    evaluation: &Evaluation,
    rules: &ThreatRules,
) -> Vec<ThreatAssessment> {
    let verdicts = resolve_verdicts(evaluation, &rules.verdict, flows.len());
    let p95 = byte_count_quantile(flows, rules.exfiltration_quantile);

    flows
        .iter()
        .zip(verdicts)
        .map(|(flow, verdict)| assess(flow, verdict, p95, rules))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowKey, FlowProtocol, IpProtocol};
    use crate::ml::consensus::{
        ConsensusResult, ConsensusStatus, ModelEvaluation, ModelMetrics, ModelStatus, ModelVerdict,
    };
    use std::collections::{BTreeMap, BTreeSet};
    use std::net::{IpAddr, Ipv4Addr};

    fn flow(id: usize, packets: u64, bytes: u64, pkt_rate: f64, byte_rate: f64, dst_ports: usize) -> FlowRecord {
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        FlowRecord {
            id,
            key: FlowKey::new(a, b, IpProtocol::Tcp),
            src: a,
            dst: b,
            protocol: FlowProtocol::Tcp,
            packet_count: packets,
            byte_count: bytes,
            tcp_count: packets,
            udp_count: 0,
            start_time: 0.0,
            end_time: 1.0,
            duration: 1.0,
            pkt_rate,
            byte_rate,
            unique_src_ports: 1,
            unique_dst_ports: dst_ports,
            avg_payload_size: 0.0,
            src_ports: BTreeSet::new(),
            dst_ports: BTreeSet::new(),
        }
    }

    fn model(labels: &[Label]) -> ModelEvaluation {
        ModelEvaluation {
            status: ModelStatus::Ok,
            metrics: ModelMetrics::default(),
            verdicts: labels
                .iter()
                .map(|&label| ModelVerdict {
                    raw_score: 0.0,
                    confidence: 0.0,
                    label,
                    high_confidence: false,
                })
                .collect(),
        }
    }

    fn evaluation(models: Vec<(&str, ModelEvaluation)>, majority: Vec<Label>) -> Evaluation {
        Evaluation {
            models: models.into_iter().map(|(n, m)| (n.to_string(), m)).collect::<BTreeMap<_, _>>(),
            consensus: ConsensusResult {
                status: ConsensusStatus::Ok,
                majority,
                voters: Vec::new(),
            },
        }
    }

    #[test]
    fn test_threat_score_components() {
        let rules = ThreatRules::default();
        let quiet = flow(0, 5, 500, 1.0, 100.0, 1);
        assert_eq!(threat_score(&quiet, Label::Normal, &rules), 0);
        assert_eq!(threat_score(&quiet, Label::Anomalous, &rules), 50);

        let loud = flow(1, 5000, 5_000_000, 500.0, 50_000.0, 40);
        assert_eq!(threat_score(&loud, Label::Normal, &rules), 50);
        assert_eq!(threat_score(&loud, Label::Anomalous, &rules), 100);

        let mut generous = rules.clone();
        generous.anomaly_points = 90;
        assert_eq!(threat_score(&loud, Label::Anomalous, &generous), 100);
    }

    #[test]
    fn test_huge_points_clamp_to_100() {
        let mut rules = ThreatRules::default();
        rules.anomaly_points = u32::MAX;
        rules.pkt_rate_points = u32::MAX;
        rules.byte_rate_points = u32::MAX;
        rules.port_spread_points = u32::MAX;

        let loud = flow(1, 5000, 5_000_000, 500.0, 50_000.0, 40);
        assert_eq!(threat_score(&loud, Label::Anomalous, &rules), 100);
    }

    #[test]
    fn test_severity_bands_partition() {
        for score in 0..=100u8 {
            let expected = match score {
                0..=39 => Severity::Low,
                40..=59 => Severity::Medium,
                60..=79 => Severity::High,
                _ => Severity::Critical,
            };
            assert_eq!(severity(score), expected, "score {}", score);
        }
    }

    #[test]
    fn test_port_scan_wins_regardless_of_rate() {
        let rules = ThreatRules::default();
        for rate in [0.0, 50.0, 5000.0] {
            let f = flow(0, 5, 500, rate, 0.0, 15);
            assert_eq!(classify_pattern(&f, 100.0, &rules), Pattern::PortScan);
        }
    }

    #[test]
    fn test_pattern_order() {
        let rules = ThreatRules::default();
        assert_eq!(classify_pattern(&flow(0, 900, 900, 300.0, 0.0, 2), 10.0, &rules), Pattern::DdosSuspect);
        assert_eq!(classify_pattern(&flow(0, 9, 900, 3.0, 0.0, 2), 10.0, &rules), Pattern::DataExfiltration);
        assert_eq!(classify_pattern(&flow(0, 9, 9, 3.0, 0.0, 2), 10.0, &rules), Pattern::Anomaly);
    }

    #[test]
    fn test_normal_flows_get_normal_pattern() {
        let flows = vec![flow(0, 5, 500, 1.0, 1.0, 15), flow(1, 5, 500, 1.0, 1.0, 1)];
        let eval = evaluation(vec![("m", model(&[Label::Normal, Label::Anomalous]))], vec![]);
        let assessments = score_and_classify(&flows, &eval, &ThreatRules::default());

        assert_eq!(assessments[0].pattern, Pattern::Normal);
        assert_eq!(assessments[0].threat_score, 20);
        assert_eq!(assessments[1].pattern, Pattern::Anomaly);
        assert_eq!(assessments[1].severity, Severity::Medium);
    }

    #[test]
    fn test_verdict_sources() {
        let eval = evaluation(
            vec![
                ("beta", model(&[Label::Anomalous, Label::Normal])),
                ("alpha", model(&[Label::Normal, Label::Normal])),
            ],
            vec![Label::Anomalous, Label::Anomalous],
        );

        assert_eq!(resolve_verdicts(&eval, &VerdictSource::FirstModel, 2), vec![Label::Normal; 2]);
        assert_eq!(
            resolve_verdicts(&eval, &VerdictSource::Model("beta".into()), 2),
            vec![Label::Anomalous, Label::Normal]
        );
        assert_eq!(resolve_verdicts(&eval, &VerdictSource::Majority, 2), vec![Label::Anomalous; 2]);
        assert_eq!(
            resolve_verdicts(&eval, &VerdictSource::Model("gamma".into()), 2),
            vec![Label::Normal; 2]
        );
    }

    #[test]
    fn test_no_usable_verdict_is_normal() {
        let eval = evaluation(vec![], vec![]);
        let flows = vec![flow(0, 5, 500, 500.0, 50_000.0, 40)];
        let assessments = score_and_classify(&flows, &eval, &ThreatRules::default());
        assert_eq!(assessments[0].verdict, Label::Normal);
        assert_eq!(assessments[0].pattern, Pattern::Normal);
        assert_eq!(assessments[0].threat_score, 50);
    }

    #[test]
    fn test_p95_over_batch() {
        let flows: Vec<FlowRecord> = [100, 200, 300, 400, 500]
            .iter()
            .enumerate()
            .map(|(i, &b)| flow(i, 1, b, 0.0, 0.0, 1))
            .collect();
        let p95 = byte_count_quantile(&flows, 0.95);
        assert!((p95 - 480.0).abs() < 1e-9);
        let rules = ThreatRules::default();
        assert_eq!(classify_pattern(&flows[4], p95, &rules), Pattern::DataExfiltration);
        assert_eq!(classify_pattern(&flows[3], p95, &rules), Pattern::Anomaly);
    }
}
