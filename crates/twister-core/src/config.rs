//! Configuration structures for twister.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration (consumer and producer side)
    pub kafka: KafkaConfig,

    /// Splitter pipeline configuration
    #[serde(default)]
    pub twister: TwisterConfig,

    /// Monitoring profile cache configuration
    #[serde(default)]
    pub lookup: LookupConfig,

    /// Legacy metric socket configuration
    #[serde(default)]
    pub legacy: LegacyConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Miscellaneous settings
    #[serde(default)]
    pub misc: MiscConfig,
}

/// Kafka consumer and producer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub brokers: Vec<String>,

    /// Name of the consumer group to join
    pub consumer_group: String,

    /// Topics to consume from, as a comma separated list
    pub consumer_topics: String,

    /// Where to start consuming when the group has no stored offset
    #[serde(default)]
    pub consumer_offset_strategy: OffsetStrategy,

    /// How often stored offsets are published to the coordinator
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// If true, stored offsets are ignored on startup and consumption
    /// restarts per the offset strategy
    #[serde(default)]
    pub reset_offset_on_startup: bool,

    /// Topic to produce split metrics to
    pub producer_topic: String,

    /// Persistence confidence required from the producer
    #[serde(default)]
    pub producer_response_strategy: RequiredAcks,

    /// Producer retry attempts before a delivery error surfaces
    #[serde(default = "default_producer_retry_attempts")]
    pub producer_retry_attempts: u32,

    /// Transport keepalive interval in milliseconds (0 disables)
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
}

/// Initial offset strategy when the consumer group has no stored offset.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetStrategy {
    /// Start from the oldest available offset
    Oldest,
    /// Start from the newest offset (default)
    #[default]
    Newest,
}

/// Producer acknowledgement policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RequiredAcks {
    /// Fire and forget
    None,
    /// Wait for the partition leader only (default)
    #[default]
    Leader,
    /// Wait for the full in-sync replica set
    All,
}

impl RequiredAcks {
    /// librdkafka `acks` value.
    pub fn as_client_value(&self) -> &'static str {
        match self {
            RequiredAcks::None => "0",
            RequiredAcks::Leader => "1",
            RequiredAcks::All => "all",
        }
    }
}

/// Splitter pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwisterConfig {
    /// Per-worker input queue length
    #[serde(default = "default_handler_queue_length")]
    pub handler_queue_length: usize,

    /// Metric paths that are enriched with profile tags from the cache
    #[serde(default)]
    pub query_metrics: Vec<String>,
}

impl Default for TwisterConfig {
    fn default() -> Self {
        Self {
            handler_queue_length: default_handler_queue_length(),
            query_metrics: Vec::new(),
        }
    }
}

/// Monitoring profile cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub connect: String,

    /// Key prefix for profile entries
    #[serde(default = "default_profile_prefix")]
    pub profile_prefix: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            connect: default_redis_url(),
            profile_prefix: default_profile_prefix(),
        }
    }
}

/// Legacy metric socket configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LegacyConfig {
    /// Path for the metrics export socket. Empty disables the socket.
    #[serde(default)]
    pub socket_path: String,

    /// Periodically log the metric snapshot at debug level
    #[serde(default)]
    pub metrics_debug: bool,

    /// Frequency of the debug snapshot in seconds (0 disables)
    #[serde(default)]
    pub metrics_frequency_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    /// Directory in which to open the logfile. Empty logs to stderr.
    #[serde(default)]
    pub path: String,

    /// Name of the logfile
    #[serde(default)]
    pub file: String,

    /// Reopen the logfile when SIGUSR2 is received
    #[serde(default)]
    pub rotate_on_usr2: bool,

    /// Switch to enable debug logging
    #[serde(default)]
    pub debug: bool,
}

impl LogConfig {
    /// Full path of the logfile, or None when logging to stderr.
    pub fn logfile(&self) -> Option<PathBuf> {
        if self.path.is_empty() || self.file.is_empty() {
            return None;
        }
        Some(PathBuf::from(&self.path).join(&self.file))
    }
}

/// Miscellaneous settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MiscConfig {
    /// Whether to produce metrics on the legacy socket
    #[serde(default)]
    pub produce_metrics: bool,

    /// Name of the application instance
    #[serde(default)]
    pub instance_name: String,
}

impl MiscConfig {
    /// Application identity used for heartbeats and the metric prefix.
    pub fn app_name(&self) -> String {
        if self.instance_name.is_empty() {
            "twister".to_string()
        } else {
            format!("twister/{}", self.instance_name)
        }
    }
}

// Default value functions
fn default_commit_interval_ms() -> u64 {
    2000
}
fn default_producer_retry_attempts() -> u32 {
    3
}
fn default_keepalive_ms() -> u64 {
    3000
}
fn default_handler_queue_length() -> usize {
    16
}
fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}
fn default_profile_prefix() -> String {
    "profile".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.brokers.is_empty() {
            return Err(crate::Error::Config(
                "At least one broker required".into(),
            ));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.kafka.consumer_topics.is_empty() {
            return Err(crate::Error::Config("Consumer topics are required".into()));
        }

        if self.kafka.producer_topic.is_empty() {
            return Err(crate::Error::Config("Producer topic is required".into()));
        }

        if self.twister.handler_queue_length == 0 {
            return Err(crate::Error::Config(
                "Handler queue length must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Consumer topics as a list.
    pub fn consumer_topics(&self) -> Vec<&str> {
        self.kafka
            .consumer_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            kafka: KafkaConfig {
                brokers: vec!["localhost:9092".into()],
                consumer_group: "twister".into(),
                consumer_topics: "metrics.raw".into(),
                consumer_offset_strategy: OffsetStrategy::default(),
                commit_interval_ms: default_commit_interval_ms(),
                reset_offset_on_startup: false,
                producer_topic: "metrics.split".into(),
                producer_response_strategy: RequiredAcks::default(),
                producer_retry_attempts: default_producer_retry_attempts(),
                keepalive_ms: default_keepalive_ms(),
            },
            twister: TwisterConfig::default(),
            lookup: LookupConfig::default(),
            legacy: LegacyConfig::default(),
            log: LogConfig::default(),
            misc: MiscConfig::default(),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_brokers() {
        let mut config = base_config();
        config.kafka.brokers = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_producer_topic() {
        let mut config = base_config();
        config.kafka.producer_topic = "".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Producer topic"));
    }

    #[test]
    fn test_config_validation_zero_queue() {
        let mut config = base_config();
        config.twister.handler_queue_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_consumer_topics_list() {
        let mut config = base_config();
        config.kafka.consumer_topics = "metrics.raw, metrics.bulk,".into();
        assert_eq!(config.consumer_topics(), vec!["metrics.raw", "metrics.bulk"]);
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [kafka]
            brokers = ["broker-1:9092", "broker-2:9092"]
            consumer_group = "twister"
            consumer_topics = "metrics.raw"
            consumer_offset_strategy = "oldest"
            producer_topic = "metrics.split"
            producer_response_strategy = "all"

            [twister]
            handler_queue_length = 64
            query_metrics = ["/sys/disk/fs"]

            [misc]
            instance_name = "blue"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.kafka.consumer_offset_strategy, OffsetStrategy::Oldest);
        assert_eq!(config.kafka.producer_response_strategy, RequiredAcks::All);
        assert_eq!(config.twister.handler_queue_length, 64);
        assert_eq!(config.misc.app_name(), "twister/blue");
        // untouched defaults
        assert_eq!(config.kafka.commit_interval_ms, 2000);
        assert_eq!(config.kafka.producer_retry_attempts, 3);
    }

    #[test]
    fn test_required_acks_client_values() {
        assert_eq!(RequiredAcks::None.as_client_value(), "0");
        assert_eq!(RequiredAcks::Leader.as_client_value(), "1");
        assert_eq!(RequiredAcks::All.as_client_value(), "all");
    }

    #[test]
    fn test_logfile_path() {
        let mut log = LogConfig::default();
        assert!(log.logfile().is_none());
        log.path = "/var/log/twister".into();
        log.file = "twister.log".into();
        assert_eq!(
            log.logfile().unwrap(),
            PathBuf::from("/var/log/twister/twister.log")
        );
    }

    #[test]
    fn test_app_name_default() {
        assert_eq!(MiscConfig::default().app_name(), "twister");
    }
}
