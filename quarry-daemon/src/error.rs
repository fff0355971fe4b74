use std::path::PathBuf;

use thiserror::Error;

use quarry_core::JobId;

/// Error surface for the notifier protocol, server and build controller.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("notifier protocol error: {0}")]
    Protocol(String),

    #[error("build notifier is not running (socket missing: {socket})")]
    NotifierNotRunning { socket: PathBuf },

    #[error("build worker for job {job} exited without reporting a result")]
    WorkerUnreachable { job: JobId },

    #[error("unable to start build worker {program}: {source}")]
    WorkerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
