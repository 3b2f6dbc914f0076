//! Workers: claim jobs, run their commands, record outcomes.

pub mod exec;
pub mod pool;
pub mod run;

pub use exec::{CommandExecutor, Execution};
pub use pool::WorkerPool;
pub use run::{Tick, Worker, WorkerConfig};
