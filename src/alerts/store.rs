//! Alert persistence
//!
//! Each persisted batch is one pretty-printed JSON array named
//! `alerts_<YYYYmmdd_HHMMSS>[_<n>].json` inside the store directory.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::Alert;
use crate::error::StoreError;

/// Default alert directory
pub const DEFAULT_ALERT_DIR: &str = "data/alerts";

/// Number of newest batch files read by `list_recent`
pub const DEFAULT_RECENT_FILES: usize = 5;

/// Default `list_recent` limit
pub const DEFAULT_RECENT_LIMIT: usize = 50;

const FILE_PREFIX: &str = "alerts_";

/// Length of the `YYYYmmdd_HHMMSS` stamp in a batch file name
const STAMP_LEN: usize = 15;

/// Sort key of a batch file: its timestamp stem, then its numeric suffix
fn batch_order(path: &Path) -> (String, u64) {
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .trim_start_matches(FILE_PREFIX);
    match name.get(STAMP_LEN..).and_then(|rest| rest.strip_prefix('_')) {
        Some(suffix) => (name[..STAMP_LEN].to_string(), suffix.parse().unwrap_or(0)),
        None => (name.to_string(), 0),
    }
}

/// Append-only alert sink
pub trait AlertStore {
    /// Persist one batch, returning its batch id
    fn append(&self, alerts: &[Alert]) -> Result<String, StoreError>;

    /// Most recent alerts, newest batch first, at most `limit`
    fn list_recent(&self, limit: usize) -> Result<Vec<Alert>, StoreError>;
}

/// Directory of JSON batch files
#[derive(Debug, Clone)]
pub struct JsonAlertStore {
    dir: PathBuf,
    recent_files: usize,
}

impl Default for JsonAlertStore {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_DIR)
    }
}

impl JsonAlertStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            recent_files: DEFAULT_RECENT_FILES,
        }
    }

    pub fn with_recent_files(mut self, files: usize) -> Self {
        self.recent_files = files.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a batch stamped with `now`. A second batch within the same
    /// second gets a numeric suffix instead of overwriting the first.
    pub fn append_at(&self, alerts: &[Alert], now: DateTime<Utc>) -> Result<String, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let stem = format!("{}{}", FILE_PREFIX, now.format("%Y%m%d_%H%M%S"));
        let mut batch_id = stem.clone();
        let mut suffix = 0;
        while self.batch_path(&batch_id).exists() {
            suffix += 1;
            batch_id = format!("{}_{}", stem, suffix);
        }

        let path = self.batch_path(&batch_id);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, alerts)?;
        writer.flush()?;

        info!("Saved {} alerts to {:?}", alerts.len(), path);
        Ok(batch_id)
    }

    fn batch_path(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", batch_id))
    }

    /// Batch files, newest first
    fn batch_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_batch = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
                .unwrap_or(false);
            if is_batch {
                files.push(path);
            }
        }

        files.sort_by_cached_key(|path| std::cmp::Reverse(batch_order(path)));
        Ok(files)
    }

    fn read_batch(path: &Path) -> Result<Vec<Alert>, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl AlertStore for JsonAlertStore {
    fn append(&self, alerts: &[Alert]) -> Result<String, StoreError> {
        self.append_at(alerts, Utc::now())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let mut alerts = Vec::new();

        for path in self.batch_files()?.into_iter().take(self.recent_files) {
            match Self::read_batch(&path) {
                Ok(batch) => {
                    debug!("Read {} alerts from {:?}", batch.len(), path);
                    alerts.extend(batch);
                }
                Err(e) => warn!("Skipping unreadable alert file {:?}: {}", path, e),
            }
        }

        alerts.truncate(limit);
        Ok(alerts)
    }
}
