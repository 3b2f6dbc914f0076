//! Dead-letter queue: jobs that exhausted their retries.

use tracing::info;

use crate::error::Result;
use crate::model::{Job, JobId, State};
use crate::storage::JobStore;

/// Operator view over `dead` jobs.
pub struct DeadLetterQueue<'a> {
    store: &'a mut JobStore,
}

impl<'a> DeadLetterQueue<'a> {
    pub fn new(store: &'a mut JobStore) -> Self {
        Self { store }
    }

    /// Dead jobs, most recently updated first.
    pub fn list(&self) -> Result<Vec<Job>> {
        self.store.list_by_state(State::Dead)
    }

    /// Requeue a dead job with a fresh retry budget.
    ///
    /// Returns `false` when no dead job has this id; nothing changes then.
    pub fn retry(&mut self, id: &JobId) -> Result<bool> {
        let requeued = self.store.requeue_dead(id)? > 0;
        if requeued {
            info!(job_id = %id, "dead job requeued");
        }
        Ok(requeued)
    }
}
