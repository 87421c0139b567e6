//! The splitter pipeline: sharded dispatch, per-worker event loops with
//! in-flight offset tracking, and the supervisor owning all lifecycles.

mod dispatch;
mod supervisor;
mod tracker;
mod worker;

pub use dispatch::WorkerPool;
pub use supervisor::Supervisor;
pub use tracker::{AckOutcome, InflightTable, TrackingToken};
pub use worker::Worker;
