//! Monotonic heartbeat timestamps shared across workers.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Slot aggregating liveness over all workers.
pub const AGGREGATE_SLOT: i32 = -1;

/// Timestamp map keyed by worker number. Many workers advance it
/// concurrently; timestamps only ever move forward.
#[derive(Debug, Default)]
pub struct HeartbeatClock {
    slots: Mutex<HashMap<i32, DateTime<Utc>>>,
}

/// A slot that was moved forward by an advance call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatUpdate {
    pub slot: i32,
    pub time: DateTime<Utc>,
}

impl HeartbeatClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the aggregate slot and the worker's slot to `time` where
    /// `time` is newer. Returns the slots that actually moved, in the
    /// order aggregate first.
    pub fn advance(&self, worker: i32, time: DateTime<Utc>) -> Vec<HeartbeatUpdate> {
        let mut slots = self.slots.lock().expect("heartbeat clock poisoned");
        let mut updates = Vec::with_capacity(2);

        for slot in [AGGREGATE_SLOT, worker] {
            let entry = slots.entry(slot).or_default();
            if entry.timestamp_millis() == 0 || time > *entry {
                *entry = time;
                updates.push(HeartbeatUpdate { slot, time });
            }
        }
        updates
    }

    /// Last seen timestamp for a slot.
    pub fn get(&self, slot: i32) -> Option<DateTime<Utc>> {
        self.slots
            .lock()
            .expect("heartbeat clock poisoned")
            .get(&slot)
            .copied()
    }
}
