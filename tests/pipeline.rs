//! End-to-end: write a capture, train on it, analyse it, persist alerts.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use etherparse::PacketBuilder;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;

use flowsentinel::alerts::AlertStore;
use flowsentinel::capture::read_pcap;
use flowsentinel::config::Config;
use flowsentinel::core::Pattern;
use flowsentinel::flow::aggregate;
use flowsentinel::ml::{ArtifactStore, ConsensusStatus, ModelConfig, ModelTrainer, OracleRegistry};
use flowsentinel::pipeline::Analyzer;

fn tcp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4(src, dst, 64)
        .tcp(src_port, dst_port, 1, 64240);
    let mut frame = Vec::new();
    builder.write(&mut frame, payload).unwrap();
    frame
}

/// 40 quiet clients talking to one server, plus one host sweeping 200 ports
fn write_capture(path: &Path) {
    let header = PcapHeader {
        datalink: DataLink::ETHERNET,
        ..Default::default()
    };
    let file = File::create(path).unwrap();
    let mut writer = PcapWriter::with_header(file, header).unwrap();
    let mut write = |micros: u64, frame: Vec<u8>| {
        let packet = PcapPacket {
            timestamp: Duration::from_micros(micros),
            orig_len: frame.len() as u32,
            data: Cow::Owned(frame),
        };
        writer.write_packet(&packet).unwrap();
    };

    let server = [10, 0, 0, 1];
    for client in 1..=40u8 {
        let src = [10, 0, 1, client];
        let exchanges = 2 + (client % 4) as u64;
        for k in 0..exchanges {
            let t = client as u64 * 1_000_000 + k * 400_000;
            write(t, tcp_frame(src, server, 50000 + client as u16, 443, b"request"));
            write(t + 20_000, tcp_frame(server, src, 443, 50000 + client as u16, &[0u8; 600]));
        }
    }

    let scanner = [10, 0, 2, 66];
    let target = [10, 0, 0, 9];
    for port in 1..=200u16 {
        write(100_000_000 + port as u64 * 2_000, tcp_frame(scanner, target, 40000, port, &[]));
    }
}

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.models.dir = dir.join("models");
    config.models.params = ModelConfig {
        num_trees: 40,
        seed: Some(11),
        ..ModelConfig::default()
    };
    config.alerts.dir = dir.join("alerts");
    config.consensus.seed = Some(5);
    config
}

fn train(config: &Config, pcap: &Path) {
    let capture = read_pcap(pcap).unwrap();
    let table = aggregate(&capture.packets);
    assert_eq!(table.len(), 41);

    let outcome = ModelTrainer::new(config.models.params.clone(), config.features.clone())
        .train(table.flows())
        .unwrap();
    outcome.save(&config.models.store()).unwrap();
}

#[test]
fn test_train_analyze_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let pcap = dir.path().join("capture.pcap");
    write_capture(&pcap);

    let config = config_in(dir.path());
    train(&config, &pcap);

    let store = ArtifactStore::new(&config.models.dir);
    assert_eq!(
        store.list_models().unwrap(),
        vec!["isolation_forest", "local_outlier_factor", "statistical"]
    );
    assert_eq!(store.load_scores().unwrap().len(), 3);

    let alert_store = config.alerts.store();
    let analyzer = Analyzer::from_config(config);
    assert_eq!(analyzer.registry().len(), 3);

    let report = analyzer.analyze_file(&pcap, Utc::now()).unwrap();
    assert!(report.message.is_none());
    assert_eq!(report.flows.len(), 41);
    assert_eq!(report.statistics.total_flows, 41);
    assert_eq!(report.model_evaluations.len(), 3);
    assert!(report.model_evaluations.values().all(|m| m.is_usable()));
    assert_eq!(report.consensus.status, ConsensusStatus::Ok);
    assert_eq!(report.consensus.majority.len(), 41);
    assert_eq!(report.verdict_model.as_deref(), Some("isolation_forest"));

    // alerts exist exactly for anomalous flows
    assert_eq!(report.alerts.len(), report.anomalous_flows().count());
    assert_eq!(report.alert_summary.total, report.alerts.len());
    for flow in report.anomalous_flows() {
        assert!(Pattern::DETECTED.contains(&flow.reason));
        if flow.unique_dst_ports > 10 {
            assert_eq!(flow.reason, Pattern::PortScan);
        }
    }
    for flow in report.flows.iter().filter(|f| !f.is_anomaly) {
        assert_eq!(flow.reason, Pattern::Normal);
    }

    if !report.alerts.is_empty() {
        alert_store.append(&report.alerts).unwrap();
        let recent = alert_store.list_recent(50).unwrap();
        assert_eq!(recent, report.alerts);
    }

    let json = serde_json::to_value(&report).unwrap();
    assert!(json["model_evaluations"]["statistical"]["metrics"]["stability_pct"].is_number());
}

#[test]
fn test_corrupt_artifact_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let pcap = dir.path().join("capture.pcap");
    write_capture(&pcap);

    let config = config_in(dir.path());
    train(&config, &pcap);
    std::fs::write(config.models.dir.join("statistical.bin"), b"not a model").unwrap();

    let registry = OracleRegistry::load(&config.models.store());
    assert_eq!(registry.names(), vec!["isolation_forest", "local_outlier_factor"]);
    assert!(registry.unavailable().contains_key("statistical"));

    let report = Analyzer::new(config, registry).analyze_file(&pcap, Utc::now()).unwrap();
    assert_eq!(report.model_evaluations.len(), 2);
    assert!(report.unavailable_models.contains_key("statistical"));
    assert_eq!(report.consensus.voters.len(), 2);
}

#[test]
fn test_analyze_without_models() {
    let dir = tempfile::tempdir().unwrap();
    let pcap = dir.path().join("capture.pcap");
    write_capture(&pcap);

    let report = Analyzer::from_config(config_in(dir.path()))
        .analyze_file(&pcap, Utc::now())
        .unwrap();
    assert_eq!(report.flows.len(), 41);
    assert_eq!(report.consensus.status, ConsensusStatus::NoUsableOracles);
    assert!(report.alerts.is_empty());
}
