//! Supervisor: spawns the consumer, the workers and the auxiliary
//! services, relays heartbeats, and drives the drain and shutdown
//! ordering across all of them.

use crate::config::Config;
use crate::engine::{Worker, WorkerPool};
use crate::error::{Error, Result};
use crate::kafka::{self, AckProducer, DelayedCommit, UpstreamConsumer};
use crate::legacy::socket::MetricSocket;
use crate::lookup::{ProfileCache, RedisProfileCache};
use crate::metrics::{self, Registry};
use crate::transport::{CommitNotification, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// Queue length of the commit notification channel feeding the
/// reassembler.
const COMMIT_QUEUE_LEN: usize = 512;

/// Cadence of synthesized worker heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// How long residual death and socket errors are drained at shutdown.
const RESIDUAL_DRAIN: Duration = Duration::from_millis(10);

/// Owns the lifecycle of every pipeline task.
pub struct Supervisor {
    config: Arc<Config>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run the pipeline until the shutdown token fires or a handler
    /// dies. Returns true iff a handler death triggered the shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> Result<bool> {
        let config = self.config;
        let registry = Arc::new(Registry::new(&config.misc.instance_name));
        let cache: Arc<dyn ProfileCache> = Arc::new(
            RedisProfileCache::connect(&config.lookup)
                .await
                .map_err(Error::Lookup)?,
        );

        let (death_tx, mut death_rx) = mpsc::channel::<Error>(64);
        let (socket_err_tx, mut socket_err_rx) = mpsc::channel::<Error>(16);
        let (commit_tx, commit_rx) = mpsc::channel::<CommitNotification>(COMMIT_QUEUE_LEN);

        let tasks = TaskTracker::new();

        // moving-average ticker for the meters
        let ticker_shutdown = CancellationToken::new();
        tasks.spawn(metrics::run_ticker(registry.clone(), ticker_shutdown.clone()));

        // optional metrics export socket
        let socket_shutdown = CancellationToken::new();
        if config.misc.produce_metrics {
            if let Some(socket) =
                MetricSocket::new(&config.legacy, registry.clone(), socket_err_tx.clone())
            {
                info!("Launched metrics producer socket");
                let token = socket_shutdown.clone();
                tasks.spawn(async move {
                    if let Err(e) = socket.run(token).await {
                        error!(error = %e, "Metrics socket failed");
                    }
                });
            }
        }

        // one worker per CPU; the count is fixed for the process lifetime
        let worker_count = num_cpus::get().max(1);
        let mut inputs = Vec::with_capacity(worker_count);
        let mut worker_shutdowns = Vec::with_capacity(worker_count);
        for num in 0..worker_count {
            let (input_tx, input_rx) = mpsc::channel(config.twister.handler_queue_length);
            let worker_shutdown = CancellationToken::new();
            let producer = AckProducer::spawn(&config.kafka, &format!("twister.{num}"))?;
            let worker = Worker::new(
                num,
                &config,
                input_rx,
                worker_shutdown.clone(),
                death_tx.clone(),
                producer,
                cache.clone(),
                registry.clone(),
            );
            tasks.spawn(worker.run());
            info!(worker = num, "Launched twister handler");
            inputs.push(input_tx);
            worker_shutdowns.push(worker_shutdown);
        }
        let pool = WorkerPool::new(inputs);

        // upstream consumer and the offset commit reassembler
        let consumer = Arc::new(UpstreamConsumer::new(&config)?);
        let consumer_shutdown = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        tasks.spawn(kafka::run_consumer(
            consumer.clone(),
            pool.clone(),
            commit_tx.clone(),
            consumer_shutdown.clone(),
            exit_tx,
            death_tx.clone(),
        ));

        let commit_shutdown = CancellationToken::new();
        let committer = DelayedCommit::new(consumer.clone(), commit_rx);
        let commit_handle = kafka::spawn_committer(committer, commit_shutdown.clone());

        // give the first heartbeat a full interval
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );

        let mut fault = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal");
                    break;
                }
                Some(err) = death_rx.recv() => {
                    error!(error = %err, "Handler died");
                    fault = true;
                    break;
                }
                Some(err) = socket_err_rx.recv() => {
                    error!(error = %err, "Socket error");
                }
                _ = heartbeat.tick() => {
                    for worker in 0..pool.len() {
                        // do not block the main loop on heartbeats
                        let pool = pool.clone();
                        let commit = commit_tx.clone();
                        tasks.spawn(async move {
                            let _ = pool.send_to(worker, Envelope::heartbeat(commit)).await;
                        });
                    }
                }
            }
        }

        // shutdown ordering: the socket first, then the consumer; the
        // worker inputs must only close once the consumer confirmed its
        // exit, and each worker sees its shutdown signal before that
        socket_shutdown.cancel();
        consumer_shutdown.cancel();
        let _ = exit_rx.await;
        for token in &worker_shutdowns {
            token.cancel();
        }
        drop(pool);

        // read residual handler errors before waiting for quiescence
        let residual = tokio::time::sleep(RESIDUAL_DRAIN);
        tokio::pin!(residual);
        loop {
            tokio::select! {
                Some(err) = death_rx.recv() => error!(error = %err, "Handler died"),
                Some(err) = socket_err_rx.recv() => error!(error = %err, "Socket error"),
                _ = &mut residual => break,
            }
        }

        ticker_shutdown.cancel();
        tasks.close();
        tasks.wait().await;

        // every envelope is gone, stop the reassembler and flush
        drop(commit_tx);
        commit_shutdown.cancel();
        if let Err(e) = commit_handle.await {
            error!(error = %e, "Commit reassembler join failed");
        }

        info!("twister shutdown complete");
        Ok(fault)
    }
}
