pub mod alerts;
pub mod analysis;
pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod flow;
pub mod ml;
pub mod pipeline;
pub mod threat;

pub use alerts::{Alert, AlertStore, AlertSummary, JsonAlertStore};
pub use config::Config;
pub use error::{CaptureReadError, MissingFeatureError, OracleError, StoreError};
pub use flow::FlowTable;
pub use pipeline::{AnalysisReport, Analyzer};
