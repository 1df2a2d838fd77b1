//! Flow aggregation engine
//!
//! Folds a finite packet batch into bidirectional flow records and computes
//! the derived traffic features (duration, rates, port cardinalities,
//! average payload size).
//!
//! # Example
//!
//! ```ignore
//! use flowsentinel::flow::FlowAggregator;
//!
//! let mut aggregator = FlowAggregator::new();
//! for pkt in &packets {
//!     aggregator.fold(pkt);
//! }
//! let table = aggregator.finalize();
//! ```

pub mod aggregator;
pub mod table;

pub use aggregator::{aggregate, FlowAggregator, FoldOutcome};
pub use table::FlowTable;

use serde::{Deserialize, Serialize};

// Re-export core flow types
pub use crate::core::{FlowKey, FlowProtocol, FlowRecord};

/// Aggregation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    /// Packets offered to the aggregator
    pub packets_seen: u64,
    /// Packets folded into a flow
    pub packets_folded: u64,
    /// Bytes of folded packets
    pub bytes_folded: u64,
    /// Packets without an IP layer
    pub packets_non_ip: u64,
    /// Packets that failed structural checks
    pub packets_malformed: u64,
    /// Flows opened
    pub flows_created: u64,
}

impl AggregatorStats {
    /// Packets that were skipped for any reason
    pub fn packets_skipped(&self) -> u64 {
        self.packets_non_ip + self.packets_malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stats() {
        let stats = AggregatorStats::default();
        assert_eq!(stats.packets_seen, 0);
        assert_eq!(stats.packets_skipped(), 0);
    }
}
