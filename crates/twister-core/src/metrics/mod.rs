//! Pipeline metrics and their legacy plugin-metric snapshot format.

mod meter;

pub use meter::{Meter, TICK_INTERVAL_SECS};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metric registry for the splitter pipeline. Counts messages entering
/// and leaving the workers.
pub struct Registry {
    prefix: String,
    pub input: Meter,
    pub output: Meter,
}

/// One exported metric in the legacy plugin format.
#[derive(Debug, Serialize)]
pub struct PluginMetric {
    #[serde(rename = "type")]
    pub kind: String,
    pub metric: String,
    pub value: PluginMetricValue,
}

/// Value container of a plugin metric.
#[derive(Debug, Serialize)]
pub struct PluginMetricValue {
    #[serde(rename = "flpVal")]
    pub flp: f64,
}

/// Snapshot of the registry in the legacy plugin format.
#[derive(Debug, Serialize)]
pub struct PluginMetricBatch {
    pub metrics: Vec<PluginMetric>,
}

impl Registry {
    /// Create a registry. The prefix is `/twister` or
    /// `/twister/<instance>` for named instances.
    pub fn new(instance_name: &str) -> Self {
        let prefix = if instance_name.is_empty() {
            "/twister".to_string()
        } else {
            format!("/twister/{instance_name}")
        };
        Self {
            prefix,
            input: Meter::new(),
            output: Meter::new(),
        }
    }

    /// Export the one-minute rates as a plugin metric batch.
    pub fn snapshot(&self) -> PluginMetricBatch {
        let entry = |name: &str, rate: f64| PluginMetric {
            kind: "float".to_string(),
            metric: format!("{}{}/avg/rate/1min", self.prefix, name),
            value: PluginMetricValue { flp: rate },
        };
        PluginMetricBatch {
            metrics: vec![
                entry("/input/messages.per.second", self.input.rate1()),
                entry("/output/messages.per.second", self.output.rate1()),
            ],
        }
    }

    /// Snapshot serialized to JSON wire bytes.
    pub fn snapshot_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(&self.snapshot()).map_err(Into::into)
    }

    /// Advance both moving averages by one tick.
    pub fn tick(&self) {
        self.input.tick();
        self.output.tick();
    }
}

/// Drive the registry's moving averages until shutdown.
pub async fn run_ticker(registry: Arc<Registry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => registry.tick(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_names_and_prefix() {
        let registry = Registry::new("");
        let snap = registry.snapshot();
        assert_eq!(snap.metrics.len(), 2);
        assert_eq!(
            snap.metrics[0].metric,
            "/twister/input/messages.per.second/avg/rate/1min"
        );
        assert_eq!(
            snap.metrics[1].metric,
            "/twister/output/messages.per.second/avg/rate/1min"
        );

        let named = Registry::new("blue");
        assert!(named.snapshot().metrics[0]
            .metric
            .starts_with("/twister/blue/"));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let registry = Registry::new("");
        registry.input.mark(25);
        registry.tick();

        let raw = registry.snapshot_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let metrics = value.get("metrics").unwrap().as_array().unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0]["type"], "float");
        assert_eq!(metrics[0]["value"]["flpVal"], 5.0);
    }
}
