use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;

use crmsync_core::SyncConfig;
use crmsync_sync::{
    run_job, JobDisposition, Reconciler, RemoteDirectory, RemoteIdStore, RetryPolicy, SyncJob,
};

use crate::error::{io_err, WorkerError};

const QUEUE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Context and report
// ---------------------------------------------------------------------------

/// Everything a job needs, shared across blocking threads.
pub struct WorkerContext<D: ?Sized> {
    pub directory: Arc<D>,
    pub store: Arc<dyn RemoteIdStore>,
    pub config: Arc<SyncConfig>,
    pub policy: RetryPolicy,
    /// JSON-lines file receiving permanently failed jobs.
    pub dead_letter: Option<PathBuf>,
}

impl<D: ?Sized> Clone for WorkerContext<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            policy: self.policy.clone(),
            dead_letter: self.dead_letter.clone(),
        }
    }
}

impl<D: RemoteDirectory + ?Sized> WorkerContext<D> {
    pub fn new(directory: Arc<D>, store: Arc<dyn RemoteIdStore>, config: SyncConfig) -> Self {
        let policy = RetryPolicy::from(&config.queue);
        Self {
            directory,
            store,
            config: Arc::new(config),
            policy,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, path: impl Into<PathBuf>) -> Self {
        self.dead_letter = Some(path.into());
        self
    }

    fn run(&self, job: &SyncJob) -> JobDisposition {
        let reconciler = Reconciler::new(&*self.directory, &*self.store, &self.config);
        run_job(&reconciler, job, &self.policy)
    }
}

/// Totals for one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub completed: usize,
    pub skipped: usize,
    /// Number of releases (one job can be released several times).
    pub released: usize,
    pub failed: Vec<String>,
    /// Released jobs still waiting when the worker was shut down.
    pub abandoned: usize,
    pub duration_ms: u64,
}

/// A permanently failed job, as written to the dead-letter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub failed_at: DateTime<Utc>,
    pub reason: String,
    pub job: SyncJob,
}

/// `<home>/.crmsync/failed_jobs.jsonl`
pub fn dead_letter_path_at(home: &Path) -> PathBuf {
    home.join(".crmsync").join("failed_jobs.jsonl")
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Sending side of a running worker.
pub struct WorkerHandle {
    jobs: mpsc::Sender<SyncJob>,
    shutdown: broadcast::Sender<()>,
}

impl WorkerHandle {
    pub async fn enqueue(&self, job: SyncJob) -> Result<(), WorkerError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| WorkerError::ChannelClosed("job queue"))
    }

    /// Stop after the job in progress; released jobs still waiting are dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }
}

/// Start the processor on the current runtime.
///
/// The processor exits once every [`WorkerHandle`] is dropped and no released
/// job is waiting, or on [`WorkerHandle::shutdown`].
pub fn run<D: RemoteDirectory + ?Sized + 'static>(
    ctx: WorkerContext<D>,
) -> (WorkerHandle, JoinHandle<Result<WorkerReport, WorkerError>>) {
    let (jobs_tx, jobs_rx) = mpsc::channel::<SyncJob>(QUEUE_CAPACITY);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let shutdown_rx = shutdown_tx.subscribe();
    let processor = tokio::spawn(processor_task(ctx, jobs_rx, shutdown_rx));
    (
        WorkerHandle {
            jobs: jobs_tx,
            shutdown: shutdown_tx,
        },
        processor,
    )
}

/// Queue `jobs`, then wait until all of them are done.
pub async fn process_all<D: RemoteDirectory + ?Sized + 'static>(
    ctx: WorkerContext<D>,
    jobs: Vec<SyncJob>,
) -> Result<WorkerReport, WorkerError> {
    let (handle, processor) = run(ctx);
    for job in jobs {
        handle.enqueue(job).await?;
    }
    drop(handle);
    handle_join("processor", processor.await)
}

/// Start a runtime, process `jobs` and block until done or ctrl-c.
pub fn start_blocking<D: RemoteDirectory + ?Sized + 'static>(
    ctx: WorkerContext<D>,
    jobs: Vec<SyncJob>,
    format: LogFormat,
) -> Result<WorkerReport, WorkerError> {
    init_tracing(format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async move {
        let (handle, processor) = run(ctx);

        let signal_handle = {
            let shutdown = handle.shutdown_sender();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("received ctrl-c, shutting down worker");
                    let _ = shutdown.send(());
                }
            })
        };

        for job in jobs {
            handle.enqueue(job).await?;
        }
        drop(handle);

        let result = handle_join("processor", processor.await);
        signal_handle.abort();
        result
    })
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

enum Next {
    Shutdown,
    ShutdownClosed,
    Job(SyncJob),
    QueueClosed,
    Retry(Result<SyncJob, JoinError>),
}

async fn processor_task<D: RemoteDirectory + ?Sized + 'static>(
    ctx: WorkerContext<D>,
    mut jobs_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<WorkerReport, WorkerError> {
    let started = Instant::now();
    let mut report = WorkerReport::default();
    let mut released: JoinSet<SyncJob> = JoinSet::new();
    let mut queue_open = true;
    let mut shutdown_open = true;

    loop {
        if !queue_open && released.is_empty() {
            break;
        }

        let next = tokio::select! {
            signal = shutdown_rx.recv(), if shutdown_open => match signal {
                Err(broadcast::error::RecvError::Closed) => Next::ShutdownClosed,
                _ => Next::Shutdown,
            },
            maybe_job = jobs_rx.recv(), if queue_open => match maybe_job {
                Some(job) => Next::Job(job),
                None => Next::QueueClosed,
            },
            Some(joined) = released.join_next(), if !released.is_empty() => Next::Retry(joined),
        };

        let job = match next {
            Next::Shutdown => {
                report.abandoned = released.len();
                if report.abandoned > 0 {
                    tracing::warn!(abandoned = report.abandoned, "shutdown with released jobs pending");
                }
                released.abort_all();
                break;
            }
            Next::ShutdownClosed => {
                shutdown_open = false;
                continue;
            }
            Next::QueueClosed => {
                queue_open = false;
                continue;
            }
            Next::Job(job) => job,
            Next::Retry(joined) => joined.map_err(|err| WorkerError::Join {
                task: "release timer",
                message: err.to_string(),
            })?,
        };

        let disposition = {
            let ctx = ctx.clone();
            let job = job.clone();
            tokio::task::spawn_blocking(move || ctx.run(&job))
                .await
                .map_err(|err| WorkerError::Join {
                    task: "sync job",
                    message: err.to_string(),
                })?
        };

        match disposition {
            JobDisposition::Completed(outcome) => {
                report.completed += 1;
                tracing::info!(
                    job = %job.label(),
                    attempt = job.attempt,
                    remote_id = %outcome.remote_id,
                    operation = ?outcome.operation,
                    "job completed"
                );
            }
            JobDisposition::Skipped => {
                report.skipped += 1;
                tracing::debug!(job = %job.label(), "job skipped");
            }
            JobDisposition::Release { after } => {
                report.released += 1;
                tracing::info!(
                    job = %job.label(),
                    attempt = job.attempt,
                    delay_secs = after.as_secs(),
                    "job released"
                );
                released.spawn(release_after(after, job.next_attempt()));
            }
            JobDisposition::Failed { reason } => {
                tracing::error!(job = %job.label(), attempt = job.attempt, %reason, "job failed permanently");
                report.failed.push(format!("{}: {reason}", job.label()));
                if let Some(path) = &ctx.dead_letter {
                    append_dead_letter(
                        path,
                        &DeadLetter {
                            failed_at: Utc::now(),
                            reason,
                            job,
                        },
                    )?;
                }
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

async fn release_after(delay: Duration, job: SyncJob) -> SyncJob {
    tokio::time::sleep(delay).await;
    job
}

fn append_dead_letter(path: &Path, entry: &DeadLetter) -> Result<(), WorkerError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| io_err(path, e))
}

fn handle_join(
    task: &'static str,
    result: Result<Result<WorkerReport, WorkerError>, JoinError>,
) -> Result<WorkerReport, WorkerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(WorkerError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global stderr subscriber (`RUST_LOG`, default `info`). Also
/// captures records emitted through the `log` facade by the sync engine.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn release_after_waits_the_full_delay() {
        let started = Instant::now();
        let job = SyncJob::new(crmsync_core::RecordSnapshot::new(
            "1",
            crmsync_core::RecordKind::Contact,
            crmsync_core::PropertyMap::new(),
        ));
        let back = release_after(Duration::from_secs(30), job.next_attempt()).await;
        assert_eq!(back.attempt, 2);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[test]
    fn dead_letter_lines_append() {
        let home = tempfile::TempDir::new().expect("home");
        let path = dead_letter_path_at(home.path());
        let entry = DeadLetter {
            failed_at: Utc::now(),
            reason: "validation rejected".into(),
            job: SyncJob::new(crmsync_core::RecordSnapshot::new(
                "1",
                crmsync_core::RecordKind::Contact,
                crmsync_core::PropertyMap::new(),
            )),
        };
        append_dead_letter(&path, &entry).expect("first");
        append_dead_letter(&path, &entry).expect("second");

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DeadLetter = serde_json::from_str(lines[1]).expect("parse");
        assert_eq!(parsed.job.record.local_id.0, "1");
    }
}
