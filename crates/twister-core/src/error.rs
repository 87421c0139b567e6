//! Error types for the twister core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for twister operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for twister.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Legacy wire format error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Profile lookup error
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Dispatch error
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Metric socket error
    #[error("Socket error: {0}")]
    Socket(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Delivery to the producer topic failed after retries
    #[error("Delivery failed on {topic}: {message}")]
    Delivery { topic: String, message: String },

    /// Producer creation or submission error
    #[error("Producer error: {0}")]
    Producer(String),
}

/// Errors from decoding the legacy metric batch wire format.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Payload is not valid JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Payload lacks the host_id field
    #[error("Payload has no host_id")]
    MissingHostId,

    /// A metric value has a shape the format does not define
    #[error("Unsupported value for metric {path}: {kind}")]
    UnsupportedValue { path: String, kind: &'static str },
}

/// Errors from the monitoring profile cache.
#[derive(Error, Debug)]
pub enum LookupError {
    /// Well-known negative result: no profile is configured for the key.
    /// Not an operational failure.
    #[error("Profile lookup: unconfigured")]
    Unconfigured,

    /// The cache itself failed
    #[error("Profile cache error: {0}")]
    Cache(String),
}

impl From<redis::RedisError> for LookupError {
    fn from(err: redis::RedisError) -> Self {
        LookupError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let kafka_err = KafkaError::ConnectionFailed {
            broker: "localhost:9092".into(),
            message: "connection refused".into(),
        };
        let err: Error = kafka_err.into();
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_lookup_unconfigured_is_distinct() {
        assert!(matches!(LookupError::Unconfigured, LookupError::Unconfigured));
        assert!(!matches!(
            LookupError::Cache("gone".into()),
            LookupError::Unconfigured
        ));
    }

    #[test]
    fn test_parse_error_names_path() {
        let err = ParseError::UnsupportedValue {
            path: "/sys/cpu".into(),
            kind: "null",
        };
        assert!(err.to_string().contains("/sys/cpu"));
    }

    #[test]
    fn test_delivery_error() {
        let err = KafkaError::Delivery {
            topic: "metrics.split".into(),
            message: "message timed out".into(),
        };
        assert!(err.to_string().contains("metrics.split"));
    }
}
