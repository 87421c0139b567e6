//! Upstream Kafka consumer.
//!
//! Offsets are never committed as messages are read. The consumer stores
//! offsets only when the delayed-commit reassembler reports them fully
//! processed; the client then publishes stored offsets to the coordinator
//! on the configured commit interval.

use crate::config::{Config, OffsetStrategy};
use crate::engine::WorkerPool;
use crate::error::{Error, KafkaError, Result};
use crate::kafka::OffsetSink;
use crate::transport::{CommitNotification, Envelope};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consumer for the upstream metric batch log.
pub struct UpstreamConsumer {
    consumer: StreamConsumer,
    reset_strategy: OffsetStrategy,
    reset_pending: AtomicBool,
}

impl UpstreamConsumer {
    /// Create and subscribe the consumer.
    pub fn new(config: &Config) -> Result<Self> {
        let kafka = &config.kafka;
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", kafka.brokers.join(","))
            .set("group.id", &kafka.consumer_group)
            // offsets are stored by the reassembler and auto-published on
            // the commit interval
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                kafka.commit_interval_ms.to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                match kafka.consumer_offset_strategy {
                    OffsetStrategy::Oldest => "earliest",
                    OffsetStrategy::Newest => "latest",
                },
            );
        if kafka.keepalive_ms > 0 {
            client_config.set("socket.keepalive.enable", "true");
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            KafkaError::ConnectionFailed {
                broker: kafka.brokers.join(","),
                message: e.to_string(),
            }
        })?;

        let topics = config.consumer_topics();
        consumer
            .subscribe(&topics)
            .map_err(|e| KafkaError::ConsumerGroup(e.to_string()))?;

        info!(
            topics = %kafka.consumer_topics,
            group = %kafka.consumer_group,
            servers = %kafka.brokers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            reset_strategy: kafka.consumer_offset_strategy.clone(),
            reset_pending: AtomicBool::new(kafka.reset_offset_on_startup),
        })
    }

    /// Reset the assignment to the configured initial offset. Runs once
    /// after the first delivery, when the assignment is known.
    fn maybe_reset_assignment(&self) {
        if !self.reset_pending.swap(false, Ordering::SeqCst) {
            return;
        }
        let target = match self.reset_strategy {
            OffsetStrategy::Oldest => Offset::Beginning,
            OffsetStrategy::Newest => Offset::End,
        };
        let assignment = match self.consumer.assignment() {
            Ok(tpl) => tpl,
            Err(e) => {
                warn!(error = %e, "Offset reset skipped, no assignment");
                return;
            }
        };
        for elem in assignment.elements() {
            if let Err(e) = self.consumer.seek(
                elem.topic(),
                elem.partition(),
                target,
                Duration::from_secs(5),
            ) {
                warn!(
                    topic = %elem.topic(),
                    partition = %elem.partition(),
                    error = %e,
                    "Offset reset seek failed"
                );
            } else {
                warn!(
                    topic = %elem.topic(),
                    partition = %elem.partition(),
                    "Stored offset discarded on startup"
                );
            }
        }
    }
}

impl OffsetSink for UpstreamConsumer {
    fn commit_upto(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        // Kafka convention: the committed offset is the next one to read
        self.consumer
            .store_offset(topic, partition, offset + 1)
            .map_err(|e| KafkaError::OffsetCommit(e.to_string()))?;
        Ok(())
    }

    fn flush_commits(&self) -> Result<()> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // nothing stored yet is a clean state at shutdown
            Err(rdkafka::error::KafkaError::ConsumerCommit(code))
                if code == rdkafka::types::RDKafkaErrorCode::NoOffset =>
            {
                Ok(())
            }
            Err(e) => Err(KafkaError::OffsetCommit(e.to_string()).into()),
        }
    }
}

/// Receive loop: wraps each delivered message into an envelope and hands
/// it to the dispatcher. Consumer errors are fatal. Confirms its exit via
/// the oneshot so the supervisor can order worker close behind it.
pub async fn run_consumer(
    consumer: std::sync::Arc<UpstreamConsumer>,
    pool: WorkerPool,
    commit: mpsc::Sender<CommitNotification>,
    shutdown: CancellationToken,
    exit: oneshot::Sender<()>,
    death: mpsc::Sender<Error>,
) {
    let mut stream = consumer.consumer.stream();
    let mut offsets: HashMap<(String, i32), i64> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(msg)) => {
                    consumer.maybe_reset_assignment();

                    // copy out of the borrowed message before any await
                    let topic = msg.topic().to_string();
                    let partition = msg.partition();
                    let offset = msg.offset();
                    let payload = msg.payload().map(|p| p.to_vec());
                    drop(msg);

                    let key = (topic.clone(), partition);
                    if let Some(last) = offsets.get(&key) {
                        if offset != last + 1 {
                            warn!(
                                topic = %topic,
                                partition = %partition,
                                expected = last + 1,
                                found = offset,
                                "Unexpected offset"
                            );
                        }
                    }
                    offsets.insert(key, offset);

                    let envelope = Envelope {
                        host_id: 0,
                        payload,
                        topic,
                        partition,
                        offset,
                        commit: commit.clone(),
                    };
                    // a dispatch failure drops the message without commit,
                    // the coordinator redelivers it; an envelope stuck on
                    // a full queue at shutdown is dropped the same way
                    let dispatched = tokio::select! {
                        _ = shutdown.cancelled() => false,
                        result = pool.dispatch(envelope) => {
                            if let Err(e) = result {
                                warn!(error = %e, "Message dropped");
                            }
                            true
                        }
                    };
                    if !dispatched {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Consumer stream failed");
                    let _ = death
                        .send(KafkaError::ConsumerGroup(e.to_string()).into())
                        .await;
                    break;
                }
                None => break,
            },
        }
    }

    let _ = exit.send(());
}
