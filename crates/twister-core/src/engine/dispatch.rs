//! Sharded dispatch of envelopes onto the worker pool.
//!
//! All messages of one host are routed to the same worker so per-host
//! ordering stays intact. Routing peeks a single field out of the
//! payload; it never decodes the batch.

use crate::error::{Error, Result};
use crate::legacy::peek_host_id;
use crate::transport::Envelope;
use tokio::sync::mpsc;

/// Handle onto the worker input queues. The pool size is fixed at
/// startup; changing it requires a restart.
#[derive(Clone)]
pub struct WorkerPool {
    inputs: Vec<mpsc::Sender<Envelope>>,
}

impl WorkerPool {
    pub fn new(inputs: Vec<mpsc::Sender<Envelope>>) -> Self {
        debug_assert!(!inputs.is_empty());
        Self { inputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Worker index for a host id. Unsigned modulus keeps negative and
    /// overflowing ids deterministic.
    pub fn worker_for(&self, host_id: i64) -> usize {
        host_id.rem_euclid(self.inputs.len() as i64) as usize
    }

    /// Route an envelope to the worker owning its host. Blocks when the
    /// destination queue is full; that backpressure is intentional and
    /// propagates to the consumer.
    pub async fn dispatch(&self, mut envelope: Envelope) -> Result<()> {
        let payload = envelope
            .payload
            .as_deref()
            .ok_or_else(|| Error::Dispatch("empty payload".into()))?;
        let host_id = peek_host_id(payload).map_err(|e| Error::Dispatch(e.to_string()))?;
        envelope.host_id = host_id;

        self.send_to(self.worker_for(host_id), envelope).await
    }

    /// Deliver an envelope to a specific worker, bypassing the peek.
    /// Used for synthesized heartbeats.
    pub async fn send_to(&self, worker: usize, envelope: Envelope) -> Result<()> {
        self.inputs[worker]
            .send(envelope)
            .await
            .map_err(|_| Error::Dispatch(format!("worker {worker} input closed")))
    }
}
