//! Alert summary statistics
//!
//! Purely derived from an alert list and recomputed on every call.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Alert;
use crate::core::{Pattern, Severity};

/// Default trailing window for `recent_count`
pub const RECENT_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: usize,
    /// Every severity band is present
    pub by_severity: BTreeMap<Severity, usize>,
    /// The four detected patterns are always present
    pub by_pattern: BTreeMap<Pattern, usize>,
    /// Alerts within the trailing window before `now`
    pub recent_count: usize,
}

impl Default for AlertSummary {
    fn default() -> Self {
        Self {
            total: 0,
            by_severity: Severity::ALL.iter().map(|&s| (s, 0)).collect(),
            by_pattern: Pattern::DETECTED.iter().map(|p| (p.clone(), 0)).collect(),
            recent_count: 0,
        }
    }
}

/// Summarize with the default one-hour window
pub fn summarize(alerts: &[Alert], now: DateTime<Utc>) -> AlertSummary {
    summarize_within(alerts, now, Duration::seconds(RECENT_WINDOW_SECS))
}

pub fn summarize_within(alerts: &[Alert], now: DateTime<Utc>, window: Duration) -> AlertSummary {
    let mut summary = AlertSummary::default();
    let since = now - window;

    for alert in alerts {
        summary.total += 1;
        *summary.by_severity.entry(alert.severity).or_insert(0) += 1;
        *summary.by_pattern.entry(alert.pattern.clone()).or_insert(0) += 1;
        if alert.timestamp >= since && alert.timestamp <= now {
            summary.recent_count += 1;
        }
    }

    summary
}
