//! Flow aggregator
//!
//! Folds a packet batch into bidirectional flows. Arrival order does not
//! matter: start/end times are tracked as min/max and every counter is a
//! commutative sum.

use std::collections::HashMap;

use tracing::debug;

use crate::core::flow::{FlowAccumulator, FlowKey};
use crate::core::PacketRecord;
use super::table::FlowTable;
use super::AggregatorStats;

/// Outcome of folding one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Packet opened a new flow
    Created,
    /// Packet was added to an existing flow
    Updated,
    /// Packet had no IP layer
    SkippedNonIp,
    /// Packet failed structural checks
    SkippedMalformed,
}

/// In-progress aggregation state for one batch
#[derive(Debug, Default)]
pub struct FlowAggregator {
    flows: HashMap<FlowKey, FlowAccumulator>,
    stats: AggregatorStats,
}

impl FlowAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one packet into the state
    pub fn fold(&mut self, pkt: &PacketRecord) -> FoldOutcome {
        self.stats.packets_seen += 1;

        if !pkt.is_well_formed() {
            self.stats.packets_malformed += 1;
            return FoldOutcome::SkippedMalformed;
        }

        let Some(key) = FlowKey::from_packet(pkt) else {
            self.stats.packets_non_ip += 1;
            return FoldOutcome::SkippedNonIp;
        };

        self.stats.packets_folded += 1;
        self.stats.bytes_folded += pkt.length as u64;

        let mut outcome = FoldOutcome::Updated;
        let flow = self.flows.entry(key).or_insert_with(|| {
            outcome = FoldOutcome::Created;
            FlowAccumulator::new(key, pkt.timestamp)
        });
        flow.update(pkt);

        if outcome == FoldOutcome::Created {
            self.stats.flows_created += 1;
        }
        outcome
    }

    /// Statistics so far
    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Number of flows opened so far
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Compute derived fields for every flow. Consumes the state, so each
    /// flow is finalized exactly once.
    pub fn finalize(self) -> FlowTable {
        let mut accumulators: Vec<(FlowKey, FlowAccumulator)> = self.flows.into_iter().collect();
        accumulators.sort_by(|a, b| a.0.cmp(&b.0));

        let flows = accumulators
            .into_iter()
            .enumerate()
            .map(|(id, (_, acc))| acc.finalize(id))
            .collect();

        debug!(
            "Finalized {} flows from {} packets ({} non-IP, {} malformed)",
            self.stats.flows_created,
            self.stats.packets_seen,
            self.stats.packets_non_ip,
            self.stats.packets_malformed
        );

        FlowTable::new(flows, self.stats)
    }
}

/// Aggregate a whole packet batch
pub fn aggregate<'a, I>(packets: I) -> FlowTable
where
    I: IntoIterator<Item = &'a PacketRecord>,
{
    let mut aggregator = FlowAggregator::new();
    for pkt in packets {
        aggregator.fold(pkt);
    }
    aggregator.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowProtocol, IpProtocol};
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 1, 1, last))
    }

    fn sample_packets() -> Vec<PacketRecord> {
        vec![
            PacketRecord::tcp(1.0, ip(1), ip(2), 50000, 80, 100).with_payload(40),
            PacketRecord::tcp(1.5, ip(2), ip(1), 80, 50000, 1500).with_payload(1440),
            PacketRecord::udp(2.0, ip(1), ip(3), 5353, 53, 90).with_payload(48),
            PacketRecord::tcp(3.0, ip(1), ip(2), 50001, 443, 60),
            PacketRecord::non_ip(3.5, 42),
            PacketRecord::ip(4.0, ip(4), ip(1), IpProtocol::Icmp, 84),
            PacketRecord::udp(6.0, ip(3), ip(1), 53, 5353, 120).with_payload(78),
        ]
    }

    #[test]
    fn test_bidirectional_single_flow() {
        let packets = vec![
            PacketRecord::tcp(1.0, ip(1), ip(2), 40000, 22, 80),
            PacketRecord::tcp(2.0, ip(2), ip(1), 22, 40000, 120),
        ];
        let table = aggregate(&packets);

        assert_eq!(table.len(), 1);
        let flow = &table.flows()[0];
        assert_eq!(flow.packet_count, 2);
        assert_eq!(flow.byte_count, 200);
        assert_eq!(flow.unique_src_ports, 2);
        assert_eq!(flow.unique_dst_ports, 2);
    }

    #[test]
    fn test_protocols_split_flows() {
        let packets = vec![
            PacketRecord::tcp(1.0, ip(1), ip(2), 1, 2, 60),
            PacketRecord::udp(1.0, ip(1), ip(2), 1, 2, 60),
        ];
        assert_eq!(aggregate(&packets).len(), 2);
    }

    #[test]
    fn test_order_invariance() {
        let packets = sample_packets();
        let forward = aggregate(&packets);

        let mut reversed = packets.clone();
        reversed.reverse();
        let backward = aggregate(&reversed);

        let mut rotated = packets.clone();
        rotated.rotate_left(3);
        let shifted = aggregate(&rotated);

        assert_eq!(forward.flows(), backward.flows());
        assert_eq!(forward.flows(), shifted.flows());
    }

    #[test]
    fn test_skips_non_ip_and_malformed() {
        let mut aggregator = FlowAggregator::new();
        assert_eq!(aggregator.fold(&PacketRecord::non_ip(1.0, 60)), FoldOutcome::SkippedNonIp);
        assert_eq!(
            aggregator.fold(&PacketRecord::tcp(f64::INFINITY, ip(1), ip(2), 1, 2, 60)),
            FoldOutcome::SkippedMalformed
        );
        assert_eq!(
            aggregator.fold(&PacketRecord::tcp(1.0, ip(1), ip(2), 1, 2, 60)),
            FoldOutcome::Created
        );
        assert_eq!(
            aggregator.fold(&PacketRecord::tcp(2.0, ip(2), ip(1), 2, 1, 60)),
            FoldOutcome::Updated
        );

        let stats = aggregator.stats().clone();
        assert_eq!(stats.packets_seen, 4);
        assert_eq!(stats.packets_non_ip, 1);
        assert_eq!(stats.packets_malformed, 1);
        assert_eq!(stats.packets_folded, 2);
        assert_eq!(aggregator.finalize().len(), 1);
    }

    #[test]
    fn test_empty_and_non_ip_only() {
        assert!(aggregate(&Vec::<PacketRecord>::new()).is_empty());

        let packets = vec![PacketRecord::non_ip(1.0, 60), PacketRecord::non_ip(2.0, 60)];
        let table = aggregate(&packets);
        assert!(table.is_empty());
        assert_eq!(table.stats().packets_non_ip, 2);
    }

    #[test]
    fn test_flow_ids_follow_key_order() {
        let table = aggregate(&sample_packets());
        for (idx, flow) in table.flows().iter().enumerate() {
            assert_eq!(flow.id, idx);
        }
        let keys: Vec<_> = table.flows().iter().map(|f| f.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let udp = table
            .flows()
            .iter()
            .find(|f| f.protocol == FlowProtocol::Udp)
            .unwrap();
        assert_eq!(udp.packet_count, 2);
        assert_eq!(udp.duration, 4.0);
        assert_eq!(udp.avg_payload_size, 63.0);
    }
}
