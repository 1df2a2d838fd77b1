//! Alerts
//!
//! Alert records for anomalous flows, their summary statistics, and the
//! JSON batch store they are persisted to.

pub mod generator;
pub mod store;
pub mod summary;

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{FlowProtocol, Pattern, Severity};

pub use generator::{alert_id, describe, generate, generate_alerts};
pub use store::{AlertStore, JsonAlertStore, DEFAULT_ALERT_DIR, DEFAULT_RECENT_LIMIT};
pub use summary::{summarize, summarize_within, AlertSummary, RECENT_WINDOW_SECS};

/// One alert for one anomalous flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub pattern: Pattern,
    pub source_address: IpAddr,
    pub destination_address: IpAddr,
    pub protocol: FlowProtocol,
    pub packet_count: u64,
    pub byte_count: u64,
    pub threat_score: u8,
    pub description: String,
}
