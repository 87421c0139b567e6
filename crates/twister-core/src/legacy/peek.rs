//! Host id peek used by the dispatcher for routing.

use crate::error::ParseError;
use serde::Deserialize;

/// Helper struct deserializing nothing but the host id.
#[derive(Deserialize)]
struct BatchPeek {
    host_id: Option<i64>,
}

/// Extract the host id from a batch payload without decoding the batch.
/// Only the top-level `host_id` field is materialized.
pub fn peek_host_id(raw: &[u8]) -> Result<i64, ParseError> {
    let peek: BatchPeek = serde_json::from_slice(raw)?;
    peek.host_id.ok_or(ParseError::MissingHostId)
}
