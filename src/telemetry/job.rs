//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for jobs
//! flowing through a worker.

use tracing::Span;

use crate::model::JobId;

/// Start a span for one execution attempt of a job.
///
/// The `job.state` field is declared empty and is filled by
/// [`record_state_transition`].
pub fn start_job_span(worker: usize, job_id: &JobId, attempt: u32) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.worker" = worker,
        "job.id" = %job_id,
        "job.attempt" = attempt,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit an event inside it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
