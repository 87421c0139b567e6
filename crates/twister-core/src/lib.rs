//! Twister core - ordered fan-out from metric batches to single metrics
//!
//! Twister sits between two Kafka logs. It reads batched host-metric
//! payloads, explodes each batch into self-contained per-metric records,
//! optionally enriches them with monitoring profile tags from a side
//! cache, and produces them downstream - preserving per-host ordering
//! and committing upstream offsets only after every derived record has
//! been acknowledged.

pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod kafka;
pub mod legacy;
pub mod lookup;
pub mod metrics;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use engine::Supervisor;
pub use error::{Error, KafkaError, LookupError, ParseError};
pub use error::Result;
