//! Descriptive flow statistics
//!
//! Batch-level totals, averages and top talkers reported next to the
//! detection results.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::core::{FlowProtocol, FlowRecord};
use crate::ml::oracle::{round2, round_to};

/// Number of top sources / destinations kept
pub const TOP_TALKERS: usize = 10;

/// Address with its summed packet count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Talker {
    pub address: IpAddr,
    pub packets: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStatistics {
    pub total_flows: usize,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub avg_packets_per_flow: f64,
    pub avg_bytes_per_flow: f64,
    pub protocol_distribution: BTreeMap<FlowProtocol, usize>,
    pub top_sources: Vec<Talker>,
    pub top_destinations: Vec<Talker>,
    pub avg_unique_src_ports: f64,
    pub avg_unique_dst_ports: f64,
    pub avg_flow_duration: f64,
    pub max_flow_duration: f64,
    pub min_flow_duration: f64,
    pub avg_packet_rate: f64,
    pub max_packet_rate: f64,
    pub avg_byte_rate: f64,
    pub max_byte_rate: f64,
}

fn mean<I: Iterator<Item = f64>>(values: I, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        values.sum::<f64>() / n as f64
    }
}

fn max_of<I: Iterator<Item = f64>>(values: I) -> f64 {
    values.fold(f64::NEG_INFINITY, f64::max)
}

/// Top talkers by summed packets. Ties break on address.
fn top_talkers<F>(flows: &[FlowRecord], address: F) -> Vec<Talker>
where
    F: Fn(&FlowRecord) -> IpAddr,
{
    let mut totals: HashMap<IpAddr, u64> = HashMap::new();
    for flow in flows {
        *totals.entry(address(flow)).or_insert(0) += flow.packet_count;
    }

    let mut talkers: Vec<Talker> = totals
        .into_iter()
        .map(|(address, packets)| Talker { address, packets })
        .collect();
    talkers.sort_by(|a, b| b.packets.cmp(&a.packets).then(a.address.cmp(&b.address)));
    talkers.truncate(TOP_TALKERS);
    talkers
}

/// Statistics over a flow batch. Empty input gives all zeros.
pub fn analyze_flows(flows: &[FlowRecord]) -> FlowStatistics {
    let n = flows.len();
    if n == 0 {
        return FlowStatistics::default();
    }

    let total_packets: u64 = flows.iter().map(|f| f.packet_count).sum();
    let total_bytes: u64 = flows.iter().map(|f| f.byte_count).sum();

    let mut protocol_distribution = BTreeMap::new();
    for flow in flows {
        *protocol_distribution.entry(flow.protocol).or_insert(0) += 1;
    }

    FlowStatistics {
        total_flows: n,
        total_packets,
        total_bytes,
        avg_packets_per_flow: round2(total_packets as f64 / n as f64),
        avg_bytes_per_flow: round2(total_bytes as f64 / n as f64),
        protocol_distribution,
        top_sources: top_talkers(flows, |f| f.src),
        top_destinations: top_talkers(flows, |f| f.dst),
        avg_unique_src_ports: round2(mean(flows.iter().map(|f| f.unique_src_ports as f64), n)),
        avg_unique_dst_ports: round2(mean(flows.iter().map(|f| f.unique_dst_ports as f64), n)),
        avg_flow_duration: round_to(mean(flows.iter().map(|f| f.duration), n), 3),
        max_flow_duration: round_to(max_of(flows.iter().map(|f| f.duration)), 3),
        min_flow_duration: round_to(
            flows.iter().map(|f| f.duration).fold(f64::INFINITY, f64::min),
            3,
        ),
        avg_packet_rate: round2(mean(flows.iter().map(|f| f.pkt_rate), n)),
        max_packet_rate: round2(max_of(flows.iter().map(|f| f.pkt_rate))),
        avg_byte_rate: round2(mean(flows.iter().map(|f| f.byte_rate), n)),
        max_byte_rate: round2(max_of(flows.iter().map(|f| f.byte_rate))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PacketRecord;
    use crate::flow::aggregate;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(172, 16, 0, last))
    }

    #[test]
    fn test_empty_is_zero() {
        let stats = analyze_flows(&[]);
        assert_eq!(stats, FlowStatistics::default());
        assert_eq!(stats.total_flows, 0);
        assert!(stats.top_sources.is_empty());
    }

    #[test]
    fn test_totals_and_distribution() {
        let packets = vec![
            PacketRecord::tcp(0.0, ip(1), ip(2), 5000, 80, 100),
            PacketRecord::tcp(2.0, ip(2), ip(1), 80, 5000, 300),
            PacketRecord::udp(0.0, ip(1), ip(3), 53, 53, 50),
            PacketRecord::udp(0.0, ip(4), ip(3), 53, 53, 50),
        ];
        let table = aggregate(&packets);
        let stats = analyze_flows(table.flows());

        assert_eq!(stats.total_flows, 3);
        assert_eq!(stats.total_packets, 4);
        assert_eq!(stats.total_bytes, 500);
        assert_eq!(stats.avg_packets_per_flow, 1.33);
        assert_eq!(stats.avg_bytes_per_flow, 166.67);
        assert_eq!(stats.protocol_distribution[&FlowProtocol::Tcp], 1);
        assert_eq!(stats.protocol_distribution[&FlowProtocol::Udp], 2);
        assert_eq!(stats.max_flow_duration, 2.0);
        assert_eq!(stats.min_flow_duration, 0.0);
    }

    #[test]
    fn test_top_talkers_sorted() {
        let packets: Vec<PacketRecord> = (1..=12u8)
            .flat_map(|i| {
                (0..i).map(move |k| PacketRecord::udp(k as f64, ip(100 + i), ip(1), 1000, 53, 60))
            })
            .collect();
        let table = aggregate(&packets);
        let stats = analyze_flows(table.flows());

        // flow source is the lower address of the pair
        assert_eq!(stats.top_sources.len(), 1);
        assert_eq!(stats.top_sources[0].address, ip(1));
        assert_eq!(stats.top_sources[0].packets, 78);
        assert_eq!(stats.top_destinations.len(), TOP_TALKERS);
        assert_eq!(stats.top_destinations[0].packets, 12);
        assert_eq!(stats.top_destinations[0].address, ip(112));
        assert!(stats
            .top_destinations
            .windows(2)
            .all(|w| w[0].packets >= w[1].packets));
    }
}
