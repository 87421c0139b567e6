//! Transport envelope moving messages between consumer, dispatcher and
//! workers, plus the commit notification flowing back to the offset
//! reassembler.

use chrono::Utc;
use tokio::sync::mpsc;

/// Topic name stamped onto synthesized heartbeat envelopes. Heartbeats
/// carry no real coordinates and are never committed.
pub const HEARTBEAT_TOPIC: &str = "twister.heartbeat";

/// Host id reserved for heartbeat envelopes.
pub const HEARTBEAT_HOST_ID: i64 = -1;

/// A single upstream message with its coordinates and the back-channel
/// used to notify the commit reassembler once processing finished.
///
/// An envelope is owned by exactly one worker from dispatch until its
/// commit notification is emitted.
#[derive(Debug)]
pub struct Envelope {
    /// Host the contained batch belongs to, stamped by the dispatcher
    pub host_id: i64,
    /// Raw message payload
    pub payload: Option<Vec<u8>>,
    /// Upstream topic the message was read from
    pub topic: String,
    /// Upstream partition
    pub partition: i32,
    /// Upstream offset
    pub offset: i64,
    /// Channel to the commit reassembler
    pub commit: mpsc::Sender<CommitNotification>,
}

/// Notification that every record derived from the envelope at these
/// coordinates has been durably accepted downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNotification {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Envelope {
    /// Synthesize a heartbeat envelope. The payload is the current wall
    /// clock as big-endian epoch milliseconds.
    pub fn heartbeat(commit: mpsc::Sender<CommitNotification>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            host_id: HEARTBEAT_HOST_ID,
            payload: Some(now.to_be_bytes().to_vec()),
            topic: HEARTBEAT_TOPIC.to_string(),
            partition: -1,
            offset: -1,
            commit,
        }
    }

    /// True if this envelope is a heartbeat sentinel.
    pub fn is_heartbeat(&self) -> bool {
        self.host_id == HEARTBEAT_HOST_ID && self.offset == -1 && self.topic == HEARTBEAT_TOPIC
    }

    /// The commit notification for this envelope's coordinates.
    pub fn commit_notification(&self) -> CommitNotification {
        CommitNotification {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Decode a heartbeat payload back into epoch milliseconds.
pub fn decode_heartbeat(payload: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}
