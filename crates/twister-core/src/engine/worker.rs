//! Per-worker event loop.
//!
//! A worker owns its input queue, its in-flight table and its producer.
//! It interleaves inbound batches with producer acks, defers upstream
//! commits until every derived record of a batch has a terminal ack, and
//! drains cleanly on shutdown. It is the only mutator of its own state.

use crate::config::Config;
use crate::engine::tracker::{AckOutcome, InflightTable, TrackingToken};
use crate::error::{Error, LookupError, Result};
use crate::kafka::{AckProducer, ProducerRecord};
use crate::legacy::MetricBatch;
use crate::lookup::ProfileCache;
use crate::metrics::Registry;
use crate::transport::Envelope;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// One splitter worker.
pub struct Worker {
    num: usize,
    input: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
    death: mpsc::Sender<Error>,
    producer: AckProducer,
    cache: Arc<dyn ProfileCache>,
    registry: Arc<Registry>,
    table: InflightTable,
    /// Waiting policy covering commit and submission tasks
    tasks: TaskTracker,
    app_name: String,
    producer_topic: String,
    query_metrics: HashSet<String>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        num: usize,
        config: &Config,
        input: mpsc::Receiver<Envelope>,
        shutdown: CancellationToken,
        death: mpsc::Sender<Error>,
        producer: AckProducer,
        cache: Arc<dyn ProfileCache>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            num,
            input,
            shutdown,
            death,
            producer,
            cache,
            registry,
            table: InflightTable::new(),
            tasks: TaskTracker::new(),
            app_name: config.misc.app_name(),
            producer_topic: config.kafka.producer_topic.clone(),
            query_metrics: config.twister.query_metrics.iter().cloned().collect(),
        }
    }

    /// The worker event loop: running until shutdown, then draining, then
    /// waiting for its outstanding commit tasks.
    pub async fn run(mut self) {
        debug!(worker = self.num, "Worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.drain(false).await;
                    return;
                }
                Some(delivery_error) = self.producer.errors.recv() => {
                    // fatal by policy: report once, then hold position
                    // until the supervisor drives the shutdown
                    let _ = self.death.send(delivery_error.error.into()).await;
                    self.shutdown.cancelled().await;
                    self.producer.close_input();
                    return;
                }
                Some(ack) = self.producer.successes.recv() => {
                    self.update_offset(ack.token);
                }
                received = self.input.recv() => match received {
                    Some(envelope) => {
                        self.registry.input.mark(1);
                        if self.process(envelope).await.is_err() {
                            // fatal reported inside process, shutdown is
                            // already underway
                            self.drain(false).await;
                            return;
                        }
                    }
                    None => {
                        // input closed before the shutdown signal was
                        // observed; wait for it to tell drain from race
                        self.shutdown.cancelled().await;
                        self.drain(true).await;
                        return;
                    }
                },
            }
        }
    }

    /// Consume input until end-of-stream, close the producer, then
    /// consume both ack streams to their sentinels.
    async fn drain(&mut self, mut input_done: bool) {
        let mut successes_done = false;
        let mut errors_done = false;
        if input_done {
            self.producer.close_input();
        }

        while !(input_done && successes_done && errors_done) {
            tokio::select! {
                received = self.input.recv(), if !input_done => match received {
                    Some(envelope) => {
                        let _ = self.process(envelope).await;
                    }
                    None => {
                        input_done = true;
                        // no new submissions can race against close now
                        self.producer.close_input();
                    }
                },
                ack = self.producer.successes.recv(), if !successes_done => match ack {
                    Some(ack) => self.update_offset(ack.token),
                    None => successes_done = true,
                },
                delivery_error = self.producer.errors.recv(), if !errors_done => match delivery_error {
                    Some(e) => error!(worker = self.num, error = %e.error, "Delivery failed during drain"),
                    None => errors_done = true,
                },
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        debug!(worker = self.num, "Worker terminated");
    }

    /// Account a terminal ack; at zero outstanding the batch's envelopes
    /// are scheduled for commit and the entry is erased.
    fn update_offset(&mut self, token: TrackingToken) {
        self.registry.output.mark(1);
        match self.table.ack(&token) {
            AckOutcome::Unknown => {
                warn!(worker = self.num, %token, "Unknown tracking token");
            }
            AckOutcome::Outstanding(_) => {}
            AckOutcome::Retired(envelopes) => {
                for envelope in envelopes {
                    self.schedule_commit(envelope);
                }
            }
        }
    }

    /// Emit the envelope's commit notification without blocking the
    /// event loop.
    fn schedule_commit(&self, envelope: Envelope) {
        self.tasks.spawn(async move {
            let notification = envelope.commit_notification();
            let _ = envelope.commit.send(notification).await;
        });
    }

    /// Handle one envelope. Invalid data is marked as processed and
    /// skipped; only operational failures are fatal.
    async fn process(&mut self, envelope: Envelope) -> Result<()> {
        let payload = match envelope.payload.as_deref() {
            None | Some([]) => {
                warn!(host_id = envelope.host_id, "Ignoring empty message");
                self.schedule_commit(envelope);
                return Ok(());
            }
            Some(payload) => payload,
        };

        if envelope.is_heartbeat() {
            let cache = self.cache.clone();
            let app_name = self.app_name.clone();
            let worker = self.num as i32;
            let bin_ts = payload.to_vec();
            self.tasks.spawn(async move {
                cache.heartbeat(&app_name, worker, &bin_ts).await;
            });
            // heartbeats have no real offset, nothing to commit
            return Ok(());
        }

        let batch = match MetricBatch::parse(payload) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Ignoring invalid data");
                self.schedule_commit(envelope);
                return Ok(());
            }
        };

        let token = TrackingToken::new();
        let mut produced = 0usize;

        for mut record in batch.split() {
            if self.query_metrics.contains(&record.path) {
                match self.cache.get_configuration_id(&record.lookup_id()).await {
                    Ok(tags) => record.tags.extend(tags),
                    Err(LookupError::Unconfigured) => {}
                    Err(e) => {
                        let _ = self.death.send(e.into()).await;
                        self.shutdown.cancelled().await;
                        return Err(Error::Shutdown);
                    }
                }
            }

            let value = match record.to_wire() {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, path = %record.path, "Ignoring invalid data");
                    continue;
                }
            };

            let Some(submit) = self.producer.sender() else {
                // producer already closed, redelivery covers this batch
                return Ok(());
            };
            let submission = ProducerRecord {
                topic: self.producer_topic.clone(),
                key: record.asset_id.to_string(),
                value,
                token,
            };
            // submission must not block the event loop on a full
            // producer queue
            self.tasks.spawn(async move {
                let _ = submit.send(submission).await;
            });
            produced += 1;
        }

        if produced == 0 {
            self.schedule_commit(envelope);
            return Ok(());
        }
        self.table.insert(token, produced, envelope);
        Ok(())
    }
}
