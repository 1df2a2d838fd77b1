//! Feature normalization
//!
//! Projects a set of rows (usually finalized flows) into a fixed-schema
//! numeric matrix. The schema is computed once per batch and travels with
//! the matrix so every oracle sees the same column order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::flow::FlowRecord;
use crate::error::MissingFeatureError;

/// Columns every matrix must carry
pub const REQUIRED_FEATURES: &[&str] = &["pkt_count", "byte_count"];

/// Columns included when every row exposes them
pub const OPTIONAL_FEATURES: &[&str] = &[
    "pkt_rate",
    "byte_rate",
    "unique_src_ports",
    "unique_dst_ports",
    "duration",
    "avg_payload_size",
];

/// A row type that can be projected into a feature vector
pub trait FeatureSource {
    /// Whether the row carries the named column at all
    fn exposes(&self, name: &str) -> bool;

    /// Value of the named column, `None` when undefined for this row
    fn feature(&self, name: &str) -> Option<f64>;
}

impl FeatureSource for FlowRecord {
    fn exposes(&self, name: &str) -> bool {
        REQUIRED_FEATURES.contains(&name) || OPTIONAL_FEATURES.contains(&name)
    }

    fn feature(&self, name: &str) -> Option<f64> {
        let value = match name {
            "pkt_count" => self.packet_count as f64,
            "byte_count" => self.byte_count as f64,
            "pkt_rate" => self.pkt_rate,
            "byte_rate" => self.byte_rate,
            "unique_src_ports" => self.unique_src_ports as f64,
            "unique_dst_ports" => self.unique_dst_ports as f64,
            "duration" => self.duration,
            "avg_payload_size" => self.avg_payload_size,
            _ => return None,
        };
        Some(value)
    }
}

/// Loosely-typed rows, e.g. records loaded from JSON
impl FeatureSource for BTreeMap<String, f64> {
    fn exposes(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Which columns to project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSpec {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            required: REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect(),
            optional: OPTIONAL_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Ordered column names of a feature matrix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Resolve the schema for a batch: every required column, then the
    /// optional columns that all rows expose.
    pub fn resolve<S: FeatureSource>(
        rows: &[S],
        spec: &FeatureSpec,
    ) -> Result<Self, MissingFeatureError> {
        let exposed_by_all = |name: &str| rows.iter().all(|row| row.exposes(name));

        let missing: Vec<String> = spec
            .required
            .iter()
            .filter(|name| !exposed_by_all(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MissingFeatureError { missing });
        }

        let mut columns = spec.required.clone();
        for name in &spec.optional {
            if !columns.contains(name) && exposed_by_all(name) {
                columns.push(name.clone());
            }
        }

        Ok(Self { columns })
    }
}

impl std::fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.columns.join(", "))
    }
}

/// Row-major numeric matrix with its schema. Every cell is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    schema: FeatureSchema,
    rows: Vec<Vec<f64>>,
}

/// Undefined and non-finite cells become 0
fn sanitize(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

impl FeatureMatrix {
    /// Build a matrix from raw rows; cells are sanitized and rows are
    /// padded or truncated to the schema width.
    pub fn from_rows(schema: FeatureSchema, rows: Vec<Vec<f64>>) -> Self {
        let width = schema.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                (0..width)
                    .map(|i| sanitize(row.get(i).copied()))
                    .collect()
            })
            .collect();
        Self { schema, rows }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column
    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[idx]).collect()
    }

    /// Sample standard deviation (n - 1) of each column, `None` where undefined
    pub fn column_std(&self) -> Vec<Option<f64>> {
        let n = self.rows.len();
        (0..self.n_cols())
            .map(|idx| {
                if n < 2 {
                    return None;
                }
                let col = self.column(idx);
                let mean = col.iter().sum::<f64>() / n as f64;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                let std = var.sqrt();
                std.is_finite().then_some(std)
            })
            .collect()
    }

    /// Same schema, cells transformed by `f(column, value)`
    pub fn map_cells<F>(&self, mut f: F) -> Self
    where
        F: FnMut(usize, f64) -> f64,
    {
        let rows = self
            .rows
            .iter()
            .map(|row| row.iter().enumerate().map(|(i, &v)| f(i, v)).collect())
            .collect();
        Self::from_rows(self.schema.clone(), rows)
    }
}

/// Project rows into a feature matrix
pub fn prepare<S: FeatureSource>(
    rows: &[S],
    spec: &FeatureSpec,
) -> Result<FeatureMatrix, MissingFeatureError> {
    let schema = FeatureSchema::resolve(rows, spec)?;

    let data = rows
        .iter()
        .map(|row| {
            schema
                .columns()
                .iter()
                .map(|name| sanitize(row.feature(name)))
                .collect()
        })
        .collect();

    Ok(FeatureMatrix { schema, rows: data })
}
