//! Downstream producer with separate success and error ack streams.
//!
//! Submissions carry an opaque tracking token that is echoed back on the
//! matching ack stream once the delivery reached a terminal state. Closing
//! the input drains every in-flight delivery and then closes both ack
//! streams, which is the end-of-stream sentinel the worker's drain loop
//! waits for.

use crate::config::KafkaConfig;
use crate::engine::TrackingToken;
use crate::error::{KafkaError, Result};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

const ACK_QUEUE_LEN: usize = 256;

/// A record submitted for downstream delivery.
#[derive(Debug)]
pub struct ProducerRecord {
    pub topic: String,
    /// Partitioning key, the decimal asset id
    pub key: String,
    pub value: Vec<u8>,
    pub token: TrackingToken,
}

/// Successful terminal ack for one submitted record.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryAck {
    pub token: TrackingToken,
}

/// Failed terminal ack for one submitted record, surfaced after the
/// producer exhausted its internal retries.
#[derive(Debug)]
pub struct DeliveryError {
    pub token: TrackingToken,
    pub error: KafkaError,
}

/// Async producer handle owned by one worker.
pub struct AckProducer {
    input: Option<mpsc::Sender<ProducerRecord>>,
    pub successes: mpsc::Receiver<DeliveryAck>,
    pub errors: mpsc::Receiver<DeliveryError>,
}

impl AckProducer {
    /// Create the producer client and spawn its delivery pump.
    pub fn spawn(config: &KafkaConfig, client_id: &str) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", client_id)
            .set("acks", config.producer_response_strategy.as_client_value())
            .set(
                "message.send.max.retries",
                config.producer_retry_attempts.to_string(),
            )
            .set("message.timeout.ms", "30000")
            // key-hash partitioning keeps all records of one asset on one
            // downstream partition
            .set("partitioner", "murmur2_random");
        if config.keepalive_ms > 0 {
            client_config.set("socket.keepalive.enable", "true");
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| KafkaError::Producer(e.to_string()))?;

        let (input_tx, input_rx) = mpsc::channel(ACK_QUEUE_LEN);
        let (success_tx, successes) = mpsc::channel(ACK_QUEUE_LEN);
        let (error_tx, errors) = mpsc::channel(ACK_QUEUE_LEN);
        tokio::spawn(pump(producer, input_rx, success_tx, error_tx));

        Ok(Self {
            input: Some(input_tx),
            successes,
            errors,
        })
    }

    /// Assemble a producer handle from raw channels. Used by tests to
    /// substitute the delivery pump.
    pub fn from_parts(
        input: mpsc::Sender<ProducerRecord>,
        successes: mpsc::Receiver<DeliveryAck>,
        errors: mpsc::Receiver<DeliveryError>,
    ) -> Self {
        Self {
            input: Some(input),
            successes,
            errors,
        }
    }

    /// Clone of the submission channel, None once the producer closed.
    pub fn sender(&self) -> Option<mpsc::Sender<ProducerRecord>> {
        self.input.clone()
    }

    /// Close the submission side. In-flight deliveries still complete and
    /// their acks remain readable until both streams report end-of-stream.
    pub fn close_input(&mut self) {
        self.input.take();
    }
}

/// Receives submissions and runs one delivery per record. Exits once the
/// input closed and every delivery reached a terminal state; dropping the
/// ack senders then closes both streams.
async fn pump(
    producer: FutureProducer,
    mut input: mpsc::Receiver<ProducerRecord>,
    successes: mpsc::Sender<DeliveryAck>,
    errors: mpsc::Sender<DeliveryError>,
) {
    let deliveries = TaskTracker::new();

    while let Some(record) = input.recv().await {
        let producer = producer.clone();
        let successes = successes.clone();
        let errors = errors.clone();
        deliveries.spawn(async move {
            let future_record = FutureRecord::to(&record.topic)
                .key(&record.key)
                .payload(&record.value);
            match producer.send(future_record, Timeout::Never).await {
                Ok(_) => {
                    let _ = successes.send(DeliveryAck { token: record.token }).await;
                }
                Err((e, _)) => {
                    let _ = errors
                        .send(DeliveryError {
                            token: record.token,
                            error: KafkaError::Delivery {
                                topic: record.topic.clone(),
                                message: e.to_string(),
                            },
                        })
                        .await;
                }
            }
        });
    }

    deliveries.close();
    deliveries.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_input_drops_sender() {
        let (tx, _rx) = mpsc::channel(1);
        let (_ok_tx, ok_rx) = mpsc::channel(1);
        let (_err_tx, err_rx) = mpsc::channel(1);
        let mut producer = AckProducer::from_parts(tx, ok_rx, err_rx);

        assert!(producer.sender().is_some());
        producer.close_input();
        assert!(producer.sender().is_none());
    }

    #[tokio::test]
    async fn test_ack_streams_close_after_input() {
        let (tx, rx) = mpsc::channel::<ProducerRecord>(1);
        let (ok_tx, ok_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        let mut producer = AckProducer::from_parts(tx, ok_rx, err_rx);

        // a stand-in pump that acks everything as success
        tokio::spawn(async move {
            let mut rx = rx;
            while let Some(record) = rx.recv().await {
                ok_tx.send(DeliveryAck { token: record.token }).await.unwrap();
            }
            drop(err_tx);
        });

        let token = TrackingToken::new();
        producer
            .sender()
            .unwrap()
            .send(ProducerRecord {
                topic: "metrics.split".into(),
                key: "7".into(),
                value: b"{}".to_vec(),
                token,
            })
            .await
            .unwrap();

        let ack = producer.successes.recv().await.unwrap();
        assert_eq!(ack.token, token);

        producer.close_input();
        assert!(producer.successes.recv().await.is_none());
        assert!(producer.errors.recv().await.is_none());
    }
}
