//! Fixed-size pool of independent workers with an explicit lifecycle.

use std::path::Path;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::storage::{JobStore, StoreOptions};

use super::run::{Worker, WorkerConfig};

/// A set of running workers sharing one shutdown signal and nothing else.
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Open one store connection per worker, then spawn the workers.
    ///
    /// Every connection is opened before any worker starts, so an unusable
    /// database fails here instead of inside a running loop. Must be called
    /// from within a tokio runtime.
    pub fn start(
        count: usize,
        db_path: &Path,
        options: &StoreOptions,
        config: WorkerConfig,
    ) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidInput(
                "worker count must be at least 1".to_string(),
            ));
        }

        let stores = (0..count)
            .map(|_| JobStore::open(db_path, options))
            .collect::<Result<Vec<_>>>()?;

        let shutdown = CancellationToken::new();
        let handles = stores
            .into_iter()
            .enumerate()
            .map(|(i, store)| {
                let worker = Worker::new(i + 1, store, config.clone());
                let token = shutdown.clone();
                tokio::spawn(async move { worker.run(token).await })
            })
            .collect();

        info!(workers = count, db = %db_path.display(), "worker pool started");

        Ok(Self { shutdown, handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Ask every worker to stop. Workers finish the job they are running.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token that stops the pool when cancelled (e.g. from a signal handler).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task aborted");
            }
        }
        info!("worker pool stopped");
    }
}
