//! Bidirectional flow records
//!
//! A flow is keyed by the unordered endpoint pair plus protocol. Packets are
//! folded into a `FlowAccumulator`; once the batch is exhausted each
//! accumulator is consumed exactly once into an immutable `FlowRecord`.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::packet::{IpProtocol, PacketRecord, TransportLayer};

/// Unique key identifying a flow (endpoint pair normalized)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    /// Lower of the two addresses
    pub ip_a: IpAddr,
    /// Higher of the two addresses
    pub ip_b: IpAddr,
    pub protocol: IpProtocol,
}

impl FlowKey {
    /// Create from endpoints (normalized so the smaller address is always first)
    pub fn new(src: IpAddr, dst: IpAddr, protocol: IpProtocol) -> Self {
        if src <= dst {
            Self { ip_a: src, ip_b: dst, protocol }
        } else {
            Self { ip_a: dst, ip_b: src, protocol }
        }
    }

    /// Key for a packet, `None` for non-IP frames
    pub fn from_packet(pkt: &PacketRecord) -> Option<Self> {
        pkt.ip.map(|ip| Self::new(ip.src, ip.dst, ip.protocol))
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {} ({})", self.ip_a, self.ip_b, self.protocol)
    }
}

/// Dominant transport sub-protocol of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowProtocol {
    Tcp,
    Udp,
    Other,
}

impl FlowProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowProtocol::Tcp => "TCP",
            FlowProtocol::Udp => "UDP",
            FlowProtocol::Other => "OTHER",
        }
    }

    fn from_counts(tcp: u64, udp: u64) -> Self {
        if tcp == 0 && udp == 0 {
            FlowProtocol::Other
        } else if tcp >= udp {
            FlowProtocol::Tcp
        } else {
            FlowProtocol::Udp
        }
    }
}

impl std::fmt::Display for FlowProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable aggregate state of a flow while its batch is being folded
#[derive(Debug, Clone)]
pub(crate) struct FlowAccumulator {
    key: FlowKey,
    packet_count: u64,
    byte_count: u64,
    tcp_count: u64,
    udp_count: u64,
    start_time: f64,
    end_time: f64,
    src_ports: BTreeSet<u16>,
    dst_ports: BTreeSet<u16>,
    payload_sizes: Vec<u32>,
}

impl FlowAccumulator {
    /// Zero-valued state opened by the first packet of a key
    pub(crate) fn new(key: FlowKey, timestamp: f64) -> Self {
        Self {
            key,
            packet_count: 0,
            byte_count: 0,
            tcp_count: 0,
            udp_count: 0,
            start_time: timestamp,
            end_time: timestamp,
            src_ports: BTreeSet::new(),
            dst_ports: BTreeSet::new(),
            payload_sizes: Vec::new(),
        }
    }

    /// Fold one packet into the flow
    pub(crate) fn update(&mut self, pkt: &PacketRecord) {
        self.start_time = self.start_time.min(pkt.timestamp);
        self.end_time = self.end_time.max(pkt.timestamp);

        self.packet_count += 1;
        self.byte_count += pkt.length as u64;

        if let Some(transport) = &pkt.transport {
            match transport {
                TransportLayer::Tcp { .. } => self.tcp_count += 1,
                TransportLayer::Udp { .. } => self.udp_count += 1,
            }
            let (src_port, dst_port) = transport.ports();
            self.src_ports.insert(src_port);
            self.dst_ports.insert(dst_port);
        }

        if let Some(len) = pkt.payload_len {
            self.payload_sizes.push(len);
        }
    }

    /// Compute derived fields. Consumes the accumulator.
    pub(crate) fn finalize(self, id: usize) -> FlowRecord {
        let duration = (self.end_time - self.start_time).max(0.0);
        let (pkt_rate, byte_rate) = if duration > 0.0 {
            (
                self.packet_count as f64 / duration,
                self.byte_count as f64 / duration,
            )
        } else {
            (0.0, 0.0)
        };

        let avg_payload_size = if self.payload_sizes.is_empty() {
            0.0
        } else {
            let total: u64 = self.payload_sizes.iter().map(|&s| s as u64).sum();
            total as f64 / self.payload_sizes.len() as f64
        };

        FlowRecord {
            id,
            key: self.key,
            src: self.key.ip_a,
            dst: self.key.ip_b,
            protocol: FlowProtocol::from_counts(self.tcp_count, self.udp_count),
            packet_count: self.packet_count,
            byte_count: self.byte_count,
            tcp_count: self.tcp_count,
            udp_count: self.udp_count,
            start_time: self.start_time,
            end_time: self.end_time,
            duration,
            pkt_rate,
            byte_rate,
            unique_src_ports: self.src_ports.len(),
            unique_dst_ports: self.dst_ports.len(),
            avg_payload_size,
            src_ports: self.src_ports,
            dst_ports: self.dst_ports,
        }
    }
}

/// Finalized bidirectional flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Position of the flow in its table
    pub id: usize,
    pub key: FlowKey,
    /// Source as reported in alerts (lower address of the key)
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: FlowProtocol,

    pub packet_count: u64,
    pub byte_count: u64,
    pub tcp_count: u64,
    pub udp_count: u64,

    /// Earliest packet timestamp (seconds)
    pub start_time: f64,
    /// Latest packet timestamp (seconds)
    pub end_time: f64,
    pub duration: f64,
    pub pkt_rate: f64,
    pub byte_rate: f64,

    pub unique_src_ports: usize,
    pub unique_dst_ports: usize,
    pub avg_payload_size: f64,

    #[serde(skip)]
    pub src_ports: BTreeSet<u16>,
    #[serde(skip)]
    pub dst_ports: BTreeSet<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_flow_key_normalized() {
        let ab = FlowKey::new(ip(1), ip(2), IpProtocol::Tcp);
        let ba = FlowKey::new(ip(2), ip(1), IpProtocol::Tcp);
        assert_eq!(ab, ba);
        assert_eq!(ab.ip_a, ip(1));

        let udp = FlowKey::new(ip(1), ip(2), IpProtocol::Udp);
        assert_ne!(ab, udp);
    }

    #[test]
    fn test_accumulator_out_of_order() {
        let key = FlowKey::new(ip(1), ip(2), IpProtocol::Tcp);
        let mut acc = FlowAccumulator::new(key, 10.0);
        acc.update(&PacketRecord::tcp(10.0, ip(1), ip(2), 40000, 80, 100));
        acc.update(&PacketRecord::tcp(4.0, ip(2), ip(1), 80, 40000, 200).with_payload(50));
        acc.update(&PacketRecord::tcp(14.0, ip(1), ip(2), 40001, 80, 300).with_payload(150));

        let flow = acc.finalize(0);
        assert_eq!(flow.start_time, 4.0);
        assert_eq!(flow.end_time, 14.0);
        assert_eq!(flow.duration, 10.0);
        assert_eq!(flow.packet_count, 3);
        assert_eq!(flow.byte_count, 600);
        assert!((flow.pkt_rate - 0.3).abs() < 1e-9);
        assert!((flow.byte_rate - 60.0).abs() < 1e-9);
        assert_eq!(flow.avg_payload_size, 100.0);
        assert_eq!(flow.unique_src_ports, 3);
        assert_eq!(flow.unique_dst_ports, 3);
        assert_eq!(flow.protocol, FlowProtocol::Tcp);
    }

    #[test]
    fn test_zero_duration_rates() {
        let key = FlowKey::new(ip(1), ip(2), IpProtocol::Icmp);
        let mut acc = FlowAccumulator::new(key, 5.0);
        acc.update(&PacketRecord::ip(5.0, ip(1), ip(2), IpProtocol::Icmp, 84));

        let flow = acc.finalize(0);
        assert_eq!(flow.duration, 0.0);
        assert_eq!(flow.pkt_rate, 0.0);
        assert_eq!(flow.byte_rate, 0.0);
        assert_eq!(flow.avg_payload_size, 0.0);
        assert_eq!(flow.protocol, FlowProtocol::Other);
    }

    #[test]
    fn test_protocol_label_from_counts() {
        assert_eq!(FlowProtocol::from_counts(0, 0), FlowProtocol::Other);
        assert_eq!(FlowProtocol::from_counts(3, 1), FlowProtocol::Tcp);
        assert_eq!(FlowProtocol::from_counts(1, 3), FlowProtocol::Udp);
        assert_eq!(FlowProtocol::from_counts(2, 2), FlowProtocol::Tcp);
    }
}
