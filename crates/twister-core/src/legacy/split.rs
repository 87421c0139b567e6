//! Splitting a batch into self-contained per-metric records and the
//! reduced wire format downstream consumers expect.

use super::batch::{MetricBatch, MetricData};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// A de-batched, self-contained metric suitable for forwarding towards
/// event processing. Partitioned downstream by asset id.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub asset_id: i64,
    pub path: String,
    pub time: DateTime<Utc>,
    pub unit: String,
    pub value: MetricValue,
    pub tags: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Typed metric value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl MetricValue {
    /// Wire name of the value type.
    pub fn kind(&self) -> &'static str {
        match self {
            MetricValue::Integer(_) => "integer",
            MetricValue::Real(_) => "real",
            MetricValue::Text(_) => "string",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            MetricValue::Integer(i) => json!(i),
            MetricValue::Real(f) => json!(f),
            MetricValue::Text(s) => json!(s),
        }
    }
}

impl MetricBatch {
    /// Break the batch up into one record per contained metric. Records
    /// within a batch carry no ordering guarantee.
    pub fn split(&self) -> Vec<MetricRecord> {
        let mut records = Vec::with_capacity(self.metric_count());
        for block in &self.data {
            self.split_block(block, &mut records);
        }
        records
    }

    fn split_block(&self, block: &MetricData, records: &mut Vec<MetricRecord>) {
        let base = |value: MetricValue, path: &str, subtype: &str| MetricRecord {
            asset_id: self.host_id,
            path: path.to_string(),
            time: block.time,
            unit: String::new(),
            value,
            tags: vec![subtype.to_string()],
            labels: HashMap::new(),
        };

        for m in &block.float_metrics {
            records.push(base(MetricValue::Real(m.value), &m.metric, &m.subtype));
        }
        for m in &block.string_metrics {
            records.push(base(
                MetricValue::Text(m.value.clone()),
                &m.metric,
                &m.subtype,
            ));
        }
        for m in &block.int_metrics {
            records.push(base(MetricValue::Integer(m.value), &m.metric, &m.subtype));
        }
    }
}

impl MetricRecord {
    /// Marshal into the reduced wire format: an 8 element JSON array of
    /// asset id, path, timestamp, type, unit, value, tags and labels.
    pub fn to_wire(&self) -> serde_json::Result<Vec<u8>> {
        let wire = json!([
            self.asset_id,
            self.path,
            self.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.value.kind(),
            self.unit,
            self.value.to_json(),
            self.tags,
            self.labels,
        ]);
        serde_json::to_vec(&wire)
    }

    /// Lookup digest for the profile cache: sha256 over the decimal asset
    /// id concatenated with the metric path.
    pub fn lookup_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.asset_id.to_string().as_bytes());
        hasher.update(self.path.as_bytes());
        hex::encode(hasher.finalize())
    }
}
