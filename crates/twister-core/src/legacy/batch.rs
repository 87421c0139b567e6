//! Parser for the legacy metric batch wire format.
//!
//! The wire format nests metrics in a loosely typed JSON tree:
//!
//! ```json
//! {"host_id":7,"proto_ver":1,"data":[
//!   {"ctime":1700000000,"metrics":{"cpu":{"user":0.5,"nice":0}}}
//! ]}
//! ```
//!
//! Value coercion rules carried over from the producing agents: nested
//! objects recurse under the same metric path, arrays iterate, booleans
//! become 0/1 integers, numeric strings become integers, and floats that
//! can be represented as integers are stored as integers.

use crate::error::ParseError;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

/// A single request payload as sent by the client application. Contains
/// multiple measurement cycles, each consisting of individual metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBatch {
    pub host_id: i64,
    pub protocol: i64,
    pub data: Vec<MetricData>,
}

/// Metric data from a single measurement time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricData {
    pub time: DateTime<Utc>,
    pub float_metrics: Vec<FloatMetric>,
    pub string_metrics: Vec<StringMetric>,
    pub int_metrics: Vec<IntMetric>,
}

/// A single metric value of type f64.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatMetric {
    pub metric: String,
    pub subtype: String,
    pub value: f64,
}

/// A single metric value of type String.
#[derive(Debug, Clone, PartialEq)]
pub struct StringMetric {
    pub metric: String,
    pub subtype: String,
    pub value: String,
}

/// A single metric value of type i64.
#[derive(Debug, Clone, PartialEq)]
pub struct IntMetric {
    pub metric: String,
    pub subtype: String,
    pub value: i64,
}

#[derive(Deserialize)]
struct BatchWire {
    host_id: i64,
    #[serde(rename = "proto_ver", default)]
    protocol: i64,
    #[serde(default)]
    data: Vec<DataWire>,
}

#[derive(Deserialize)]
struct DataWire {
    ctime: i64,
    #[serde(default)]
    metrics: Option<Value>,
}

impl MetricBatch {
    /// Parse a batch from its JSON wire bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let wire: BatchWire = serde_json::from_slice(raw)?;

        let mut data = Vec::with_capacity(wire.data.len());
        for entry in wire.data {
            let mut block = MetricData {
                time: Utc
                    .timestamp_opt(entry.ctime, 0)
                    .single()
                    .unwrap_or_default(),
                float_metrics: Vec::new(),
                string_metrics: Vec::new(),
                int_metrics: Vec::new(),
            };

            let metrics = match entry.metrics {
                Some(Value::Object(map)) => map,
                Some(Value::Null) | None => continue,
                Some(other) => {
                    return Err(ParseError::UnsupportedValue {
                        path: String::new(),
                        kind: value_kind(&other),
                    })
                }
            };

            for (path, value) in metrics {
                walk_value(&path, &path, &value, &mut block)?;
            }
            data.push(block);
        }

        Ok(MetricBatch {
            host_id: wire.host_id,
            protocol: wire.protocol,
            data,
        })
    }

    /// Total number of individual metrics across all data blocks.
    pub fn metric_count(&self) -> usize {
        self.data
            .iter()
            .map(|d| d.float_metrics.len() + d.string_metrics.len() + d.int_metrics.len())
            .sum()
    }
}

/// Recursive walk of one metric subtree. `key` is the subtype candidate,
/// `path` the metric path the values are recorded under.
fn walk_value(key: &str, path: &str, value: &Value, block: &mut MetricData) -> Result<(), ParseError> {
    match value {
        Value::Object(map) => {
            for (sub, inner) in map {
                walk_value(sub, path, inner, block)?;
            }
        }
        Value::Array(items) => {
            for inner in items {
                walk_value(key, path, inner, block)?;
            }
        }
        Value::String(s) => record_string(key, path, s, block),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                record_int(key, path, i, block);
            } else if let Some(f) = n.as_f64() {
                record_float(key, path, f, block);
            } else {
                return Err(ParseError::UnsupportedValue {
                    path: path.to_string(),
                    kind: "number",
                });
            }
        }
        Value::Bool(b) => record_int(key, path, i64::from(*b), block),
        Value::Null => {
            return Err(ParseError::UnsupportedValue {
                path: path.to_string(),
                kind: value_kind(value),
            })
        }
    }
    Ok(())
}

/// A string that is actually a number is recorded as an integer metric.
fn record_string(key: &str, path: &str, value: &str, block: &mut MetricData) {
    if let Ok(i) = value.parse::<i64>() {
        record_int(key, path, i, block);
        return;
    }
    block.string_metrics.push(StringMetric {
        metric: path.to_string(),
        subtype: key.to_string(),
        value: value.to_string(),
    });
}

/// Floats representable as i64 are recorded as integer metrics.
fn record_float(key: &str, path: &str, value: f64, block: &mut MetricData) {
    if value == (value as i64) as f64 {
        record_int(key, path, value as i64, block);
        return;
    }
    block.float_metrics.push(FloatMetric {
        metric: path.to_string(),
        subtype: key.to_string(),
        value,
    });
}

fn record_int(key: &str, path: &str, value: i64, block: &mut MetricData) {
    block.int_metrics.push(IntMetric {
        metric: path.to_string(),
        subtype: key.to_string(),
        value,
    });
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
