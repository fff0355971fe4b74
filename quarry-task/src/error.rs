//! Error types for quarry-task.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a task body stopped without producing a result.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Cooperative cancellation reached a checkpoint.
    #[error("task cancelled")]
    Cancelled,

    /// The task body failed.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an error, keeping it reachable through `source()`.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Failed {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}
