//! Metric instrument factories for queuectl.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"queuectl"` meter. Without
//! a registered provider they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for queuectl instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("queuectl")
}

/// Counter: enqueue requests.
/// Labels: `result` ("ok" | "duplicate" | "error").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.jobs.enqueued")
        .with_description("Number of enqueue requests")
        .build()
}

/// Counter: job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.jobs.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: claims that lost the race for their candidate.
pub fn claim_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.claim.conflicts")
        .with_description("Claims that found their candidate already taken")
        .build()
}

/// Counter: dead jobs manually moved back to pending.
pub fn jobs_requeued() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.dlq.requeued")
        .with_description("Dead jobs requeued by an operator")
        .build()
}

/// Histogram: command execution time in milliseconds.
/// Labels: `outcome` ("success" | "failure").
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("queuectl.job.duration_ms")
        .with_description("Command execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
