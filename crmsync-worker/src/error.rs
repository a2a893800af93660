use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the worker runtime.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WorkerError {
    WorkerError::Io {
        path: path.into(),
        source,
    }
}
