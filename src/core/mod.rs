//! Core shared types for packet aggregation and detection
//!
//! - `PacketRecord`: decoded packet as read from a capture
//! - `FlowKey` / `FlowRecord`: bidirectional flow aggregates
//! - `Severity` / `Pattern`: detection classification
//! - `parser`: frame decoding into packet records

pub mod event;
pub mod flow;
pub mod packet;
pub mod parser;

pub use event::{Pattern, Severity};
pub use flow::{FlowKey, FlowProtocol, FlowRecord};
pub use packet::{IpLayer, IpProtocol, PacketRecord, TransportLayer};
pub use parser::{parse_frame, LinkType};
