//! Frame decoding
//!
//! Turns raw captured frames into `PacketRecord`s using etherparse.
//! Only the fields the flow aggregator consumes are extracted.

use std::net::IpAddr;

use etherparse::{IpNumber, NetSlice, SlicedPacket, TransportSlice};

use super::packet::{IpLayer, IpProtocol, PacketRecord, TransportLayer};

/// Link-layer framing of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Bare IPv4/IPv6 packets
    RawIp,
    LinuxSll,
}

fn protocol_from(number: IpNumber) -> IpProtocol {
    match number {
        IpNumber::TCP => IpProtocol::Tcp,
        IpNumber::UDP => IpProtocol::Udp,
        IpNumber::ICMP => IpProtocol::Icmp,
        IpNumber::IPV6_ICMP => IpProtocol::Icmpv6,
        other => IpProtocol::Other(other.0),
    }
}

/// Parse the IP layer. Returns None for non-IP frames (ARP, etc.)
///
/// The protocol is the one carried after any extension headers.
fn parse_ip(sliced: &SlicedPacket<'_>) -> Option<IpLayer> {
    match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            Some(IpLayer {
                src: IpAddr::from(header.source_addr()),
                dst: IpAddr::from(header.destination_addr()),
                protocol: protocol_from(ipv4.payload().ip_number),
            })
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            Some(IpLayer {
                src: IpAddr::from(header.source_addr()),
                dst: IpAddr::from(header.destination_addr()),
                protocol: protocol_from(ipv6.payload().ip_number),
            })
        }
        _ => None,
    }
}

/// Parse the transport layer and the length of its payload
fn parse_transport(sliced: &SlicedPacket<'_>) -> (Option<TransportLayer>, usize) {
    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            Some(TransportLayer::Tcp {
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
            }),
            tcp.payload().len(),
        ),
        Some(TransportSlice::Udp(udp)) => (
            Some(TransportLayer::Udp {
                src_port: udp.source_port(),
                dst_port: udp.destination_port(),
            }),
            udp.payload().len(),
        ),
        Some(TransportSlice::Icmpv4(icmp)) => (None, icmp.payload().len()),
        Some(TransportSlice::Icmpv6(icmp)) => (None, icmp.payload().len()),
        _ => (None, 0),
    }
}

/// Decode one captured frame
///
/// Returns `None` when the frame cannot be sliced at all. Frames that decode
/// but carry no IP layer come back as non-IP records.
pub fn parse_frame(link: LinkType, data: &[u8], timestamp: f64) -> Option<PacketRecord> {
    let sliced = match link {
        LinkType::Ethernet => SlicedPacket::from_ethernet(data).ok()?,
        LinkType::RawIp => SlicedPacket::from_ip(data).ok()?,
        LinkType::LinuxSll => SlicedPacket::from_linux_sll(data).ok()?,
    };

    let length = data.len() as u32;
    let Some(ip) = parse_ip(&sliced) else {
        return Some(PacketRecord::non_ip(timestamp, length));
    };

    let (transport, payload_len) = parse_transport(&sliced);
    let record = PacketRecord {
        timestamp,
        ip: Some(ip),
        transport,
        length,
        payload_len: None,
    };

    Some(record.with_payload(payload_len as u32))
}
