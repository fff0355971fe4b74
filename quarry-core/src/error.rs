//! Error types for quarry-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from config and working-copy state operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.quarry/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No persisted state for the requested working copy.
    #[error("working copy state not found at {path}")]
    StateNotFound { path: PathBuf },

    /// Repository name not present in `config.yaml`.
    #[error("unknown repository '{0}'")]
    UnknownRepository(String),

    /// Repository URL does not use an `svn://` or `svn+<tunnel>://` scheme.
    #[error("invalid repository url '{0}': expected svn://host/path or svn+ssh://host/path")]
    InvalidUrl(String),
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
