//! In-flight tracking of batches awaiting downstream acks.
//!
//! Each processed batch gets a fresh tracking token echoed back by the
//! producer on every terminal ack. The table defers the upstream commit
//! of an envelope until its outstanding count reaches zero. Owned
//! exclusively by one worker; never shared.

use crate::transport::Envelope;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Per-batch tracking token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackingToken(Uuid);

impl TrackingToken {
    /// Allocate a fresh random token.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TrackingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct InflightEntry {
    outstanding: usize,
    envelopes: Vec<Envelope>,
}

/// Result of acknowledging one delivery against the table.
pub enum AckOutcome {
    /// The token is not tracked
    Unknown,
    /// Deliveries are still outstanding
    Outstanding(usize),
    /// The batch fully completed; its envelopes are due for commit
    Retired(Vec<Envelope>),
}

/// Worker-local table from tracking token to outstanding work.
#[derive(Default)]
pub struct InflightTable {
    entries: HashMap<TrackingToken, InflightEntry>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a batch that produced `outstanding` records.
    pub fn insert(&mut self, token: TrackingToken, outstanding: usize, envelope: Envelope) {
        debug_assert!(outstanding > 0);
        self.entries.insert(
            token,
            InflightEntry {
                outstanding,
                envelopes: vec![envelope],
            },
        );
    }

    /// Account one terminal ack for the token.
    pub fn ack(&mut self, token: &TrackingToken) -> AckOutcome {
        let Some(entry) = self.entries.get_mut(token) else {
            return AckOutcome::Unknown;
        };
        entry.outstanding -= 1;
        if entry.outstanding > 0 {
            return AckOutcome::Outstanding(entry.outstanding);
        }
        let entry = self.entries.remove(token).expect("entry exists");
        AckOutcome::Retired(entry.envelopes)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
