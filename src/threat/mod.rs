//! Severity & threat scoring
//!
//! Maps each flow and its verdict to a 0-100 threat score, a severity band
//! and the pattern that best explains it.
//!
//! ## Structure
//! - `rules`: point values, thresholds and the verdict source
//! - `classifier`: scoring and classification logic
//!
//! ## Usage
//! ```ignore
//! use flowsentinel::threat::{score_and_classify, ThreatRules};
//!
//! let assessments = score_and_classify(table.flows(), &evaluation, &ThreatRules::default());
//! for a in assessments.iter().filter(|a| a.is_anomalous()) {
//!     println!("flow {}: {} ({})", a.flow_id, a.pattern, a.severity);
//! }
//! ```

pub mod classifier;
pub mod rules;

pub use classifier::{
    assess, byte_count_quantile, classify_pattern, resolve_verdicts, score_and_classify, severity,
    threat_score, ThreatAssessment,
};
pub use rules::{ThreatRules, VerdictSource};
