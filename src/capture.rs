//! Capture reader
//!
//! Reads a finite packet batch from a pcap or pcapng file. An unreadable or
//! corrupt file yields `CaptureReadError`; a structurally valid capture
//! without packets yields an empty batch.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use pcap_file::pcap::PcapReader;
use pcap_file::pcapng::{Block, PcapNgReader};
use pcap_file::DataLink;
use tracing::{debug, info};

use crate::core::parser::{parse_frame, LinkType};
use crate::core::PacketRecord;
use crate::error::CaptureReadError;

/// Section header block type that opens every pcapng file
const PCAPNG_MAGIC: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];

/// Counters gathered while reading a capture
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub frames_undecodable: u64,
    pub bytes_read: u64,
}

/// Packets read from one capture source
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub packets: Vec<PacketRecord>,
    pub stats: CaptureStats,
}

impl Capture {
    fn push_frame(&mut self, link: LinkType, data: &[u8], timestamp: f64) {
        self.stats.frames_read += 1;
        self.stats.bytes_read += data.len() as u64;

        match parse_frame(link, data, timestamp) {
            Some(record) => self.packets.push(record),
            None => {
                self.stats.frames_undecodable += 1;
                debug!("Skipping undecodable frame #{}", self.stats.frames_read);
            }
        }
    }
}

fn link_type(datalink: DataLink) -> Option<LinkType> {
    match datalink {
        DataLink::ETHERNET => Some(LinkType::Ethernet),
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => Some(LinkType::RawIp),
        DataLink::LINUX_SLL => Some(LinkType::LinuxSll),
        _ => None,
    }
}

/// Read every packet of a pcap or pcapng file
pub fn read_pcap<P: AsRef<Path>>(path: P) -> Result<Capture, CaptureReadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CaptureReadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let capture = read_pcap_from(BufReader::new(file), path)?;
    info!(
        "Read {} packets from {} ({} undecodable)",
        capture.packets.len(),
        path.display(),
        capture.stats.frames_undecodable
    );
    Ok(capture)
}

/// Read a pcap or pcapng stream, picked by its magic number; `origin` is
/// only used for error reporting
pub fn read_pcap_from<R: Read>(mut reader: R, origin: &Path) -> Result<Capture, CaptureReadError> {
    let corrupt = |reason: String| CaptureReadError::Corrupt {
        path: PathBuf::from(origin),
        reason,
    };

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| corrupt(format!("missing file header: {}", e)))?;
    let reader = Cursor::new(magic).chain(reader);

    if magic == PCAPNG_MAGIC {
        read_pcapng(reader, &corrupt)
    } else {
        read_classic(reader, &corrupt)
    }
}

fn read_classic<R, F>(reader: R, corrupt: &F) -> Result<Capture, CaptureReadError>
where
    R: Read,
    F: Fn(String) -> CaptureReadError,
{
    let mut pcap_reader = PcapReader::new(reader).map_err(|e| corrupt(e.to_string()))?;
    let datalink = pcap_reader.header().datalink;
    let link = link_type(datalink)
        .ok_or_else(|| corrupt(format!("unsupported link type {:?}", datalink)))?;

    let mut capture = Capture::default();
    while let Some(packet) = pcap_reader.next_packet() {
        let packet = packet.map_err(|e| corrupt(e.to_string()))?;
        capture.push_frame(link, &packet.data, packet.timestamp.as_secs_f64());
    }

    Ok(capture)
}

/// Link types are per interface; a new section starts a new interface list
fn read_pcapng<R, F>(reader: R, corrupt: &F) -> Result<Capture, CaptureReadError>
where
    R: Read,
    F: Fn(String) -> CaptureReadError,
{
    let mut ng_reader = PcapNgReader::new(reader).map_err(|e| corrupt(e.to_string()))?;
    let mut interfaces: Vec<DataLink> = Vec::new();
    let mut last_timestamp = 0.0;

    let interface_link = |interfaces: &[DataLink], id: u32| -> Result<LinkType, CaptureReadError> {
        let datalink = interfaces
            .get(id as usize)
            .copied()
            .ok_or_else(|| corrupt(format!("packet references unknown interface {}", id)))?;
        link_type(datalink).ok_or_else(|| corrupt(format!("unsupported link type {:?}", datalink)))
    };

    let mut capture = Capture::default();
    while let Some(block) = ng_reader.next_block() {
        match block.map_err(|e| corrupt(e.to_string()))? {
            Block::SectionHeader(_) => interfaces.clear(),
            Block::InterfaceDescription(idb) => interfaces.push(idb.linktype),
            Block::EnhancedPacket(epb) => {
                let link = interface_link(&interfaces, epb.interface_id)?;
                last_timestamp = epb.timestamp.as_secs_f64();
                capture.push_frame(link, &epb.data, last_timestamp);
            }
            // simple packets carry no timestamp and always belong to interface 0
            Block::SimplePacket(spb) => {
                let link = interface_link(&interfaces, 0)?;
                capture.push_frame(link, &spb.data, last_timestamp);
            }
            _ => {}
        }
    }

    Ok(capture)
}
