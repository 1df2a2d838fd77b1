//! Finalized flow table
//!
//! Immutable, key-ordered storage for the flows of one batch. A flow's id
//! is its index in the table.

use serde::{Deserialize, Serialize};

use crate::core::flow::{FlowKey, FlowRecord};
use super::AggregatorStats;

/// Flows of one capture batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowTable {
    flows: Vec<FlowRecord>,
    stats: AggregatorStats,
}

impl FlowTable {
    pub(crate) fn new(flows: Vec<FlowRecord>, stats: AggregatorStats) -> Self {
        Self { flows, stats }
    }

    /// All flows, ordered by key
    pub fn flows(&self) -> &[FlowRecord] {
        &self.flows
    }

    /// Aggregation statistics of the batch
    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Get a flow by ID
    pub fn get(&self, id: usize) -> Option<&FlowRecord> {
        self.flows.get(id)
    }

    /// Get a flow by key
    pub fn get_by_key(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.flows
            .binary_search_by(|f| f.key.cmp(key))
            .ok()
            .map(|idx| &self.flows[idx])
    }

    /// Get current flow count
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Check if table is empty
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Iterate over all flows
    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.iter()
    }

    /// Get flows matching a predicate
    pub fn filter<F>(&self, predicate: F) -> Vec<&FlowRecord>
    where
        F: Fn(&FlowRecord) -> bool,
    {
        self.flows.iter().filter(|f| predicate(f)).collect()
    }
}

impl<'a> IntoIterator for &'a FlowTable {
    type Item = &'a FlowRecord;
    type IntoIter = std::slice::Iter<'a, FlowRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.flows.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{FlowKey, IpProtocol, PacketRecord};
    use crate::flow::aggregate;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(172, 16, 0, last))
    }

    #[test]
    fn test_flow_table_lookup() {
        let packets = vec![
            PacketRecord::tcp(1.0, ip(9), ip(1), 1000, 80, 60),
            PacketRecord::tcp(1.0, ip(2), ip(3), 1000, 80, 60),
            PacketRecord::udp(1.0, ip(5), ip(4), 1000, 53, 60),
        ];
        let table = aggregate(&packets);
        assert_eq!(table.len(), 3);

        let key = FlowKey::new(ip(4), ip(5), IpProtocol::Udp);
        let flow = table.get_by_key(&key).unwrap();
        assert_eq!(flow.key, key);
        assert_eq!(table.get(flow.id), Some(flow));

        let missing = FlowKey::new(ip(4), ip(5), IpProtocol::Tcp);
        assert!(table.get_by_key(&missing).is_none());
    }

    #[test]
    fn test_flow_table_filter() {
        let packets = vec![
            PacketRecord::tcp(1.0, ip(1), ip(2), 1000, 80, 60),
            PacketRecord::tcp(2.0, ip(1), ip(2), 1001, 80, 60),
            PacketRecord::udp(1.0, ip(1), ip(3), 1000, 53, 60),
        ];
        let table = aggregate(&packets);
        let busy = table.filter(|f| f.packet_count > 1);
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].dst, ip(2));
    }
}
