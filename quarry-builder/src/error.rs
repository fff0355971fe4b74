use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop a build before the compiler can report problems.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("branch descriptor not found: {path}")]
    BranchNotFound { path: PathBuf },

    #[error("invalid build configuration in {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BuildError {
    BuildError::Io {
        path: path.into(),
        source,
    }
}
