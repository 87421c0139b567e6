//! In-order offset commit reassembly.
//!
//! Workers finish envelopes in ack order, not delivery order. The
//! reassembler receives their commit notifications and advances the
//! committed offset of each partition only when the next contiguous
//! offset has been reported, buffering everything that arrives early.

use crate::error::Result;
use crate::transport::CommitNotification;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Destination for reassembled offsets. Implemented by the upstream
/// consumer; tests substitute a recording sink.
pub trait OffsetSink: Send + Sync {
    /// Persist `offset` as processed for the partition.
    fn commit_upto(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// Publish everything stored so far, blocking until durable.
    fn flush_commits(&self) -> Result<()>;
}

struct PartitionState {
    last: i64,
    pending: BTreeSet<i64>,
}

/// Single-writer commit reassembler. All notifications funnel through
/// one channel; per (topic, partition) commits are strictly ascending
/// and contiguous.
pub struct DelayedCommit {
    sink: Arc<dyn OffsetSink>,
    notify: mpsc::Receiver<CommitNotification>,
    partitions: HashMap<(String, i32), PartitionState>,
}

impl DelayedCommit {
    pub fn new(sink: Arc<dyn OffsetSink>, notify: mpsc::Receiver<CommitNotification>) -> Self {
        Self {
            sink,
            notify,
            partitions: HashMap::new(),
        }
    }

    /// Process notifications until shutdown. After the shutdown signal
    /// fires, notifications already enqueued are still drained; a final
    /// flush publishes every stored offset.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                notification = self.notify.recv() => match notification {
                    Some(n) => self.handle(n)?,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    while let Ok(n) = self.notify.try_recv() {
                        self.handle(n)?;
                    }
                    break;
                }
            }
        }
        self.sink.flush_commits()
    }

    fn handle(&mut self, n: CommitNotification) -> Result<()> {
        let key = (n.topic.clone(), n.partition);
        let Some(state) = self.partitions.get_mut(&key) else {
            // first offset seen for this partition
            self.sink.commit_upto(&n.topic, n.partition, n.offset)?;
            self.partitions.insert(
                key,
                PartitionState {
                    last: n.offset,
                    pending: BTreeSet::new(),
                },
            );
            return Ok(());
        };

        if n.offset == state.last + 1 {
            state.last = n.offset;
            self.sink.commit_upto(&n.topic, n.partition, state.last)?;
            // sweep buffered notifications that are now in order
            while state.pending.remove(&(state.last + 1)) {
                state.last += 1;
                self.sink.commit_upto(&n.topic, n.partition, state.last)?;
            }
        } else if n.offset > state.last {
            // out of order, store for later
            state.pending.insert(n.offset);
        } else {
            debug!(
                topic = %n.topic,
                partition = %n.partition,
                offset = %n.offset,
                "Ignoring stale commit notification"
            );
        }
        Ok(())
    }
}

/// Spawn the reassembler onto the runtime, logging a failed run.
pub fn spawn_committer(
    committer: DelayedCommit,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = committer.run(shutdown).await {
            error!(error = %e, "Offset commit reassembler failed");
        }
    })
}
