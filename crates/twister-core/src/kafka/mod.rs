//! Kafka integration: upstream consumer, downstream producer and the
//! delayed offset commit reassembler.

mod commit;
mod consumer;
mod producer;

pub use commit::{spawn_committer, DelayedCommit, OffsetSink};
pub use consumer::{run_consumer, UpstreamConsumer};
pub use producer::{AckProducer, DeliveryAck, DeliveryError, ProducerRecord};
