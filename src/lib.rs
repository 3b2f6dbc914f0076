//! # queuectl
//!
//! Durable, at-least-once queue of shell commands backed by SQLite.
//!
//! Clients enqueue jobs; a pool of independent workers claims them, runs
//! their commands, retries failures with exponential backoff, and moves
//! jobs that exhaust their retries to a dead-letter queue.

pub mod config;
pub mod dlq;
pub mod error;
pub mod model;
pub mod retry;
pub mod storage;
pub mod telemetry;
pub mod worker;
