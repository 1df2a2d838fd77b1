//! Packet record representation
//!
//! A `PacketRecord` is the already-decoded view of one captured frame that
//! the flow aggregator folds. Frames without an IP layer are still
//! represented so the aggregator can count and skip them.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Icmpv6,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(val: u8) -> Self {
        match val {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            58 => IpProtocol::Icmpv6,
            other => IpProtocol::Other(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(val: IpProtocol) -> Self {
        match val {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Icmpv6 => 58,
            IpProtocol::Other(v) => v,
        }
    }
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Icmpv6 => write!(f, "ICMPv6"),
            IpProtocol::Other(n) => write!(f, "Proto({})", n),
        }
    }
}

/// Network layer of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLayer {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: IpProtocol,
}

/// Transport layers that carry ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportLayer {
    Tcp { src_port: u16, dst_port: u16 },
    Udp { src_port: u16, dst_port: u16 },
}

impl TransportLayer {
    pub fn ports(&self) -> (u16, u16) {
        match *self {
            TransportLayer::Tcp { src_port, dst_port } => (src_port, dst_port),
            TransportLayer::Udp { src_port, dst_port } => (src_port, dst_port),
        }
    }

    /// IP protocol this transport layer implies
    pub fn protocol(&self) -> IpProtocol {
        match self {
            TransportLayer::Tcp { .. } => IpProtocol::Tcp,
            TransportLayer::Udp { .. } => IpProtocol::Udp,
        }
    }
}

/// One captured packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Capture timestamp in seconds since the epoch
    pub timestamp: f64,
    /// IP layer, `None` for ARP and other non-IP frames
    pub ip: Option<IpLayer>,
    /// TCP/UDP layer if present
    pub transport: Option<TransportLayer>,
    /// Total frame length in bytes
    pub length: u32,
    /// Application payload length, `None` when no payload was carried
    pub payload_len: Option<u32>,
}

impl PacketRecord {
    /// IP packet without a port-carrying transport layer
    pub fn ip(timestamp: f64, src: IpAddr, dst: IpAddr, protocol: IpProtocol, length: u32) -> Self {
        Self {
            timestamp,
            ip: Some(IpLayer { src, dst, protocol }),
            transport: None,
            length,
            payload_len: None,
        }
    }

    pub fn tcp(
        timestamp: f64,
        src: IpAddr,
        dst: IpAddr,
        src_port: u16,
        dst_port: u16,
        length: u32,
    ) -> Self {
        Self {
            transport: Some(TransportLayer::Tcp { src_port, dst_port }),
            ..Self::ip(timestamp, src, dst, IpProtocol::Tcp, length)
        }
    }

    pub fn udp(
        timestamp: f64,
        src: IpAddr,
        dst: IpAddr,
        src_port: u16,
        dst_port: u16,
        length: u32,
    ) -> Self {
        Self {
            transport: Some(TransportLayer::Udp { src_port, dst_port }),
            ..Self::ip(timestamp, src, dst, IpProtocol::Udp, length)
        }
    }

    /// Frame with no IP layer (ARP, LLDP, ...)
    pub fn non_ip(timestamp: f64, length: u32) -> Self {
        Self {
            timestamp,
            ip: None,
            transport: None,
            length,
            payload_len: None,
        }
    }

    /// Attach an application payload length (empty payloads are dropped)
    pub fn with_payload(mut self, len: u32) -> Self {
        self.payload_len = if len > 0 { Some(len) } else { None };
        self
    }

    /// Check structural consistency
    ///
    /// Malformed records are skipped by the aggregator: non-finite or
    /// negative timestamps, mixed address families, and ports attached to a
    /// protocol that does not carry them.
    pub fn is_well_formed(&self) -> bool {
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return false;
        }
        let Some(ip) = &self.ip else {
            return self.transport.is_none();
        };
        if ip.src.is_ipv4() != ip.dst.is_ipv4() {
            return false;
        }
        match &self.transport {
            Some(transport) => transport.protocol() == ip.protocol,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_protocol_roundtrip() {
        for n in [1u8, 6, 17, 58, 47] {
            assert_eq!(u8::from(IpProtocol::from(n)), n);
        }
        assert_eq!(IpProtocol::from(47), IpProtocol::Other(47));
        assert_eq!(IpProtocol::Tcp.to_string(), "TCP");
    }

    #[test]
    fn test_well_formed() {
        assert!(PacketRecord::tcp(1.0, v4(1), v4(2), 1234, 80, 60).is_well_formed());
        assert!(PacketRecord::ip(1.0, v4(1), v4(2), IpProtocol::Icmp, 60).is_well_formed());
        assert!(PacketRecord::non_ip(1.0, 42).is_well_formed());
    }

    #[test]
    fn test_malformed_records() {
        assert!(!PacketRecord::tcp(f64::NAN, v4(1), v4(2), 1, 2, 60).is_well_formed());
        assert!(!PacketRecord::tcp(-1.0, v4(1), v4(2), 1, 2, 60).is_well_formed());

        let mixed = PacketRecord::ip(1.0, v4(1), IpAddr::V6(Ipv6Addr::LOCALHOST), IpProtocol::Udp, 60);
        assert!(!mixed.is_well_formed());

        let mut mismatched = PacketRecord::tcp(1.0, v4(1), v4(2), 1, 2, 60);
        mismatched.ip.as_mut().unwrap().protocol = IpProtocol::Icmp;
        assert!(!mismatched.is_well_formed());
    }

    #[test]
    fn test_empty_payload_dropped() {
        let pkt = PacketRecord::udp(1.0, v4(1), v4(2), 53, 53, 80).with_payload(0);
        assert_eq!(pkt.payload_len, None);
        let pkt = pkt.with_payload(12);
        assert_eq!(pkt.payload_len, Some(12));
    }
}
