//! Decoding and splitting routines for the legacy metric batch format.
//!
//! A batch is the payload delivered by the upstream log. It carries one or
//! more measurement cycles, each consisting of many individual metrics in a
//! loosely typed JSON tree. Splitting a batch yields self-contained
//! per-metric records suitable for downstream forwarding.

mod batch;
mod peek;
pub mod socket;
mod split;

pub use batch::{FloatMetric, IntMetric, MetricBatch, MetricData, StringMetric};
pub use peek::peek_host_id;
pub use split::{MetricRecord, MetricValue};
