//! Alert generation
//!
//! Turns flagged flows into alert records. Only flows whose verdict is
//! ANOMALOUS produce an alert, whatever their threat score.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::summary::{summarize, AlertSummary};
use super::Alert;
use crate::core::{FlowRecord, Pattern, Severity};
use crate::threat::ThreatAssessment;

/// Human-readable description for a pattern
pub fn describe(flow: &FlowRecord, pattern: &Pattern) -> String {
    match pattern {
        Pattern::PortScan => format!(
            "Possible port scan detected from {} scanning {} ports",
            flow.src, flow.unique_dst_ports
        ),
        Pattern::DdosSuspect => format!(
            "Potential DDoS attack detected with {:.2} packets/sec from {}",
            flow.pkt_rate, flow.src
        ),
        Pattern::DataExfiltration => format!(
            "Large data transfer detected: {} bytes from {} to {}",
            flow.byte_count, flow.src, flow.dst
        ),
        Pattern::Anomaly => format!(
            "Anomalous behavior detected in flow from {} to {}",
            flow.src, flow.dst
        ),
        Pattern::Normal | Pattern::Other(_) => "Unknown anomaly detected".to_string(),
    }
}

/// Alert id: `ALERT_<YYYYmmddHHMMSS>_<source>`. Two alerts for the same
/// source within one second share an id.
pub fn alert_id(flow: &FlowRecord, now: DateTime<Utc>) -> String {
    format!("ALERT_{}_{}", now.format("%Y%m%d%H%M%S"), flow.src)
}

/// Build one alert
pub fn generate(
    flow: &FlowRecord,
    pattern: Pattern,
    severity: Severity,
    threat_score: u8,
    now: DateTime<Utc>,
) -> Alert {
    Alert {
        id: alert_id(flow, now),
        timestamp: now,
        severity,
        description: describe(flow, &pattern),
        pattern,
        source_address: flow.src,
        destination_address: flow.dst,
        protocol: flow.protocol,
        packet_count: flow.packet_count,
        byte_count: flow.byte_count,
        threat_score,
    }
}

fn flow_by_id(flows: &[FlowRecord], id: usize) -> Option<&FlowRecord> {
    match flows.get(id) {
        Some(flow) if flow.id == id => Some(flow),
        _ => flows.iter().find(|f| f.id == id),
    }
}

/// Alerts for every ANOMALOUS assessment, plus their summary
pub fn generate_alerts(
    flows: &[FlowRecord],
    assessments: &[ThreatAssessment],
    now: DateTime<Utc>,
) -> (Vec<Alert>, AlertSummary) {
    let alerts: Vec<Alert> = assessments
        .iter()
        .filter(|a| a.is_anomalous())
        .filter_map(|a| {
            let flow = flow_by_id(flows, a.flow_id);
            if flow.is_none() {
                debug!("Assessment for unknown flow {}", a.flow_id);
            }
            flow.map(|f| generate(f, a.pattern.clone(), a.severity, a.threat_score, now))
        })
        .collect();

    let summary = summarize(&alerts, now);
    (alerts, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowProtocol, PacketRecord};
    use crate::flow::aggregate;
    use crate::ml::Label;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};

    fn flows() -> Vec<FlowRecord> {
        let a = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 5));
        let b = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 9));
        let packets: Vec<PacketRecord> = (0..20u16)
            .map(|i| PacketRecord::tcp(i as f64 * 0.01, a, b, 40000, 1000 + i, 60))
            .chain(std::iter::once(PacketRecord::udp(1.0, a, b, 53, 53, 80)))
            .collect();
        aggregate(&packets).flows().to_vec()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn test_descriptions() {
        let flows = flows();
        let tcp = flows.iter().find(|f| f.protocol == FlowProtocol::Tcp).unwrap();

        assert_eq!(
            describe(tcp, &Pattern::PortScan),
            "Possible port scan detected from 192.168.0.5 scanning 20 ports"
        );
        assert_eq!(
            describe(tcp, &Pattern::Anomaly),
            "Anomalous behavior detected in flow from 192.168.0.5 to 192.168.0.9"
        );
        assert_eq!(
            describe(tcp, &Pattern::Other("beaconing".into())),
            "Unknown anomaly detected"
        );
    }

    #[test]
    fn test_alert_fields() {
        let flows = flows();
        let alert = generate(&flows[0], Pattern::PortScan, Severity::High, 70, now());

        assert_eq!(alert.id, "ALERT_20260314150926_192.168.0.5");
        assert_eq!(alert.timestamp, now());
        assert_eq!(alert.packet_count, flows[0].packet_count);
        assert_eq!(alert.threat_score, 70);
    }

    #[test]
    fn test_only_anomalous_assessments_alert() {
        let flows = flows();
        let assessments = vec![
            ThreatAssessment {
                flow_id: 0,
                verdict: Label::Normal,
                threat_score: 100,
                severity: Severity::Critical,
                pattern: Pattern::Normal,
            },
            ThreatAssessment {
                flow_id: 1,
                verdict: Label::Anomalous,
                threat_score: 50,
                severity: Severity::Medium,
                pattern: Pattern::Anomaly,
            },
        ];

        let (alerts, summary) = generate_alerts(&flows, &assessments, now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.recent_count, 1);
    }

    #[test]
    fn test_empty_batch() {
        let (alerts, summary) = generate_alerts(&[], &[], now());
        assert!(alerts.is_empty());
        assert_eq!(summary.total, 0);
        assert!(summary.by_severity.values().all(|&c| c == 0));
        assert!(summary.by_pattern.values().all(|&c| c == 0));
    }
}
