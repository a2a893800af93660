//! Async sync-job queue.
//!
//! Runs [`crmsync_sync::run_job`] for queued records on blocking threads and
//! honours the returned disposition: released jobs are re-queued after their
//! backoff delay, permanently failed jobs are logged and appended to a
//! dead-letter file.

mod error;
mod runtime;

pub use error::WorkerError;
pub use runtime::{
    dead_letter_path_at, init_tracing, process_all, run, start_blocking, DeadLetter, LogFormat,
    WorkerContext, WorkerHandle, WorkerReport,
};
