//! Error types for quarry-sync.
//!
//! [`VcsError`] is the normalized failure taxonomy every facade operation
//! returns. Native `svn` failures are classified from the `E<code>` the
//! client prints on stderr.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use quarry_core::CoreError;
use quarry_task::TaskError;

/// `svn: E170013: Unable to connect to a repository at URL ...`
pub const SVN_ERR_RA_CANNOT_CREATE_SESSION: u32 = 170_013;
/// `svn: E155004: Working copy '...' locked`
pub const SVN_ERR_WC_LOCKED: u32 = 155_004;
/// `svn: E155037: Previous operation has not finished`
pub const SVN_ERR_WC_CLEANUP_REQUIRED: u32 = 155_037;
/// `svn: E200015: Caught signal`
pub const SVN_ERR_CANCELLED: u32 = 200_015;

const CATEGORY_SIZE: u32 = 5000;
const CATEGORY_RA: u32 = 170_000;
const CATEGORY_RA_SVN: u32 = 210_000;
const CATEGORY_RA_DAV: u32 = 175_000;
const CATEGORY_AUTHN: u32 = 215_000;

/// Normalized version-control failure.
#[derive(Debug, Error)]
pub enum VcsError {
    /// Remote host unreachable or transport-level failure.
    #[error("repository unavailable: {message}")]
    RepositoryUnavailable { code: Option<u32>, message: String },

    /// Credentials rejected by the server.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { code: Option<u32>, message: String },

    /// Working copy locked by an interrupted operation; `cleanup` recovers it.
    #[error("working copy locked: {message}")]
    WorkingCopyLocked { code: u32, message: String },

    #[error("operation cancelled")]
    Cancelled,

    /// Any other client failure, with the native error code when known.
    #[error("{}", vcs_message(.code, .message))]
    Vcs { code: Option<u32>, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid repository url '{0}'")]
    InvalidUrl(String),
}

fn vcs_message(code: &Option<u32>, message: &str) -> String {
    match code {
        Some(code) => format!("svn error E{code}: {message}"),
        None => format!("svn error: {message}"),
    }
}

impl VcsError {
    /// Native `svn` error code, if the failure came from the client.
    pub fn code(&self) -> Option<u32> {
        match self {
            VcsError::RepositoryUnavailable { code, .. }
            | VcsError::AuthenticationFailed { code, .. }
            | VcsError::Vcs { code, .. } => *code,
            VcsError::WorkingCopyLocked { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, VcsError::WorkingCopyLocked { .. })
    }

    /// Unavailable or rejected credentials: the cases callers surface to users.
    pub fn is_connection_problem(&self) -> bool {
        matches!(
            self,
            VcsError::RepositoryUnavailable { .. } | VcsError::AuthenticationFailed { .. }
        )
    }

    /// Classify the stderr text of a failed client invocation.
    pub fn from_stderr(stderr: &str) -> Self {
        let code = parse_error_code(stderr);
        let message = primary_message(stderr);
        match code {
            Some(code) => classify(code, message),
            None => VcsError::Vcs { code: None, message },
        }
    }
}

/// Map a native error code to the taxonomy.
pub fn classify(code: u32, message: String) -> VcsError {
    match code {
        SVN_ERR_WC_LOCKED | SVN_ERR_WC_CLEANUP_REQUIRED => {
            return VcsError::WorkingCopyLocked { code, message }
        }
        SVN_ERR_CANCELLED => return VcsError::Cancelled,
        SVN_ERR_RA_CANNOT_CREATE_SESSION => {
            return VcsError::RepositoryUnavailable {
                code: Some(code),
                message,
            }
        }
        _ => {}
    }
    match code / CATEGORY_SIZE * CATEGORY_SIZE {
        CATEGORY_RA | CATEGORY_AUTHN => VcsError::AuthenticationFailed {
            code: Some(code),
            message,
        },
        CATEGORY_RA_SVN | CATEGORY_RA_DAV => VcsError::RepositoryUnavailable {
            code: Some(code),
            message,
        },
        _ => VcsError::Vcs {
            code: Some(code),
            message,
        },
    }
}

/// First `E<digits>` code following an `svn: ` prefix.
pub fn parse_error_code(stderr: &str) -> Option<u32> {
    stderr.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("svn: E")?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}

/// Text of the first `svn:` error line without its code prefix.
fn primary_message(stderr: &str) -> String {
    let line = stderr
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("svn: E"))
        .or_else(|| stderr.lines().map(str::trim).find(|line| !line.is_empty()))
        .unwrap_or("unknown failure");
    match line.strip_prefix("svn: E") {
        Some(rest) => rest
            .split_once(": ")
            .map(|(_, msg)| msg)
            .unwrap_or(rest)
            .to_string(),
        None => line.to_string(),
    }
}

/// True when the root of an error's `source()` chain is a cancellation
/// signal or a closed communication channel.
pub fn is_cancellation(err: &(dyn StdError + 'static)) -> bool {
    let mut root = err;
    while let Some(next) = root.source() {
        root = next;
    }
    if let Some(vcs) = root.downcast_ref::<VcsError>() {
        return matches!(vcs, VcsError::Cancelled);
    }
    if let Some(task) = root.downcast_ref::<TaskError>() {
        return task.is_cancelled();
    }
    if let Some(io) = root.downcast_ref::<std::io::Error>() {
        return matches!(
            io.kind(),
            ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted
        );
    }
    false
}

/// User-facing message for a failed operation.
pub fn format_error_message(what: &str, err: &VcsError) -> String {
    match err {
        VcsError::AuthenticationFailed { message, .. } => format!(
            "{what}: authentication failed, check the repository credentials\n{message}"
        ),
        VcsError::RepositoryUnavailable { message, .. } => {
            format!("{what}: repository is not available\n{message}")
        }
        other => format!("{what}: {other}"),
    }
}

/// Errors of the synchronizer and delete tasks.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Vcs(#[from] VcsError),

    #[error("state error: {0}")]
    Core(#[from] CoreError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn vcs_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> VcsError {
    VcsError::Io {
        path: path.into(),
        source,
    }
}
