//! Version-control client facade.
//!
//! [`Vcs`] is the only entry point the rest of the workspace uses. It binds a
//! [`VcsBackend`] to one set of credentials, logs every normalized failure at
//! the boundary and owns the lock-recovery policy of `update`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use quarry_core::Credentials;

use crate::error::VcsError;
use crate::svn::SvnCli;

// ---------------------------------------------------------------------------
// 1. Value types
// ---------------------------------------------------------------------------

/// Last-committed revision metadata of a local or remote target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionInfo {
    /// Revision the target is at (`Revision:`), for working copies.
    pub revision: Option<u64>,
    pub committed_revision: Option<u64>,
    pub committed_date: Option<DateTime<Utc>>,
}

impl RevisionInfo {
    /// Both committed revision and date are known.
    pub fn is_committed(&self) -> bool {
        self.committed_revision.is_some() && self.committed_date.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Path relative to the listed URL, `/`-separated, no trailing slash.
    pub path: String,
    pub kind: NodeKind,
}

impl DirEntry {
    /// Last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Empty,
    Files,
    Immediates,
    Infinity,
}

impl Depth {
    pub fn as_arg(self) -> &'static str {
        match self {
            Depth::Empty => "empty",
            Depth::Files => "files",
            Depth::Immediates => "immediates",
            Depth::Infinity => "infinity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Revision {
    #[default]
    Head,
    Number(u64),
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Head => f.write_str("HEAD"),
            Revision::Number(rev) => write!(f, "{rev}"),
        }
    }
}

/// What happened to one item during checkout/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Started,
    Completed,
    Add,
    Delete,
    Update,
    Restore,
    Other(String),
}

impl UpdateAction {
    /// Structural markers that do not correspond to an item.
    pub fn is_marker(&self) -> bool {
        matches!(self, UpdateAction::Started | UpdateAction::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub action: UpdateAction,
    pub path: PathBuf,
    pub kind: NodeKind,
}

/// Receives per-item events and is polled for cancellation by long-running
/// operations. Returning `Err` aborts the operation with that error.
pub trait EventSink {
    fn handle_event(&mut self, event: &UpdateEvent) -> Result<(), VcsError>;
    fn check_cancelled(&self) -> Result<(), VcsError>;
}

// ---------------------------------------------------------------------------
// 2. Backend seam
// ---------------------------------------------------------------------------

/// Raw client operations. Implementations create their client state per
/// call; nothing is shared between calls.
pub trait VcsBackend: Send + Sync {
    fn is_working_copy(&self, path: &Path) -> bool {
        path.join(".svn").is_dir()
    }

    /// `Ok(None)` when a local target does not exist.
    fn info(
        &self,
        target: &str,
        remote: bool,
        credentials: Option<&Credentials>,
    ) -> Result<Option<RevisionInfo>, VcsError>;

    fn list(
        &self,
        url: &str,
        depth: Depth,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<DirEntry>, VcsError>;

    fn estimate_changes(
        &self,
        path: &Path,
        url: &str,
        revision: Revision,
        credentials: Option<&Credentials>,
        sink: &mut dyn EventSink,
    ) -> Result<u64, VcsError>;

    fn checkout(
        &self,
        url: &str,
        path: &Path,
        revision: Revision,
        credentials: Option<&Credentials>,
        sink: &mut dyn EventSink,
    ) -> Result<(), VcsError>;

    fn update(
        &self,
        path: &Path,
        revision: Revision,
        credentials: Option<&Credentials>,
        sink: &mut dyn EventSink,
    ) -> Result<(), VcsError>;

    fn cleanup(&self, path: &Path) -> Result<(), VcsError>;

    fn export(
        &self,
        url: &str,
        path: &Path,
        depth: Option<Depth>,
        credentials: Option<&Credentials>,
    ) -> Result<(), VcsError>;

    fn cat(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>, VcsError>;
}

// ---------------------------------------------------------------------------
// 3. Facade
// ---------------------------------------------------------------------------

/// Authenticated client facade. Cheap to clone.
#[derive(Clone)]
pub struct Vcs {
    backend: Arc<dyn VcsBackend>,
    credentials: Option<Credentials>,
}

impl fmt::Debug for Vcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vcs")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Vcs {
    pub fn new(backend: Arc<dyn VcsBackend>, credentials: Option<Credentials>) -> Self {
        Self {
            backend,
            credentials,
        }
    }

    /// Facade over the `svn` command-line client found on `PATH`.
    pub fn svn(credentials: Option<Credentials>) -> Self {
        Self::new(Arc::new(SvnCli::default()), credentials)
    }

    /// Same backend, other credentials.
    pub fn with_credentials(&self, credentials: Option<Credentials>) -> Self {
        Self::new(self.backend.clone(), credentials)
    }

    fn creds(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_working_copy(&self, path: &Path) -> bool {
        self.backend.is_working_copy(path)
    }

    /// Committed revision info; `None` on any failure or for a missing local
    /// target.
    pub fn info(&self, target: &str, remote: bool) -> Option<RevisionInfo> {
        match self.backend.info(target, remote, self.creds()) {
            Ok(info) => info,
            Err(err) => {
                log_failure("info", &err);
                None
            }
        }
    }

    /// Remote reachability check.
    pub fn check_connection(&self, url: &str) -> Result<(), VcsError> {
        self.backend
            .info(url, true, self.creds())
            .map(|_| ())
            .inspect_err(|err| log_failure("info", err))
    }

    pub fn list(&self, url: &str, depth: Depth) -> Result<Vec<DirEntry>, VcsError> {
        self.backend
            .list(url, depth, self.creds())
            .inspect_err(|err| log_failure("list", err))
    }

    /// Number of file-level changes an update to `revision` would apply.
    /// Does not touch the working copy.
    pub fn estimate_changes(
        &self,
        path: &Path,
        url: &str,
        revision: Revision,
        sink: &mut dyn EventSink,
    ) -> Result<u64, VcsError> {
        self.backend
            .estimate_changes(path, url, revision, self.creds(), sink)
            .inspect_err(|err| log_failure("diff", err))
    }

    /// Checkout when `path` is not a working copy, update in place otherwise.
    ///
    /// A locked working copy is cleaned up and the update retried exactly
    /// once; a second lock failure is returned as a generic error.
    pub fn update(
        &self,
        url: &str,
        path: &Path,
        revision: Revision,
        sink: &mut dyn EventSink,
    ) -> Result<(), VcsError> {
        let result = if self.is_working_copy(path) {
            self.update_with_recovery(path, revision, sink)
        } else {
            self.backend
                .checkout(url, path, revision, self.creds(), sink)
        };
        result.inspect_err(|err| log_failure("update", err))
    }

    fn update_with_recovery(
        &self,
        path: &Path,
        revision: Revision,
        sink: &mut dyn EventSink,
    ) -> Result<(), VcsError> {
        match self.backend.update(path, revision, self.creds(), sink) {
            Err(err) if err.is_locked() => {
                tracing::warn!("Perform cleanup");
                self.backend.cleanup(path)?;
                tracing::info!("Continue update after recovery");
            }
            other => return other,
        }
        match self.backend.update(path, revision, self.creds(), sink) {
            Err(VcsError::WorkingCopyLocked { code, message }) => Err(VcsError::Vcs {
                code: Some(code),
                message,
            }),
            other => other,
        }
    }

    pub fn export(&self, url: &str, path: &Path, depth: Option<Depth>) -> Result<(), VcsError> {
        self.backend
            .export(url, path, depth, self.creds())
            .inspect_err(|err| log_failure("export", err))
    }

    /// Content of `relative` under `url` at HEAD; `None` on failure.
    pub fn read_file(&self, url: &str, relative: &str) -> Option<Vec<u8>> {
        let target = format!(
            "{}/{}",
            url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        );
        match self.backend.cat(&target, self.creds()) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log_failure("read", &err);
                None
            }
        }
    }
}

fn log_failure(operation: &str, err: &VcsError) {
    match err {
        VcsError::Cancelled => tracing::debug!("SVN operation '{operation}' cancelled"),
        other => match other.code() {
            Some(code) => {
                tracing::warn!("SVN operation '{operation}' error [E{code}]: {other}")
            }
            None => tracing::warn!("SVN operation '{operation}' error: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_display() {
        assert_eq!(Revision::Head.to_string(), "HEAD");
        assert_eq!(Revision::Number(42).to_string(), "42");
    }

    #[test]
    fn dir_entry_name_is_last_component() {
        let entry = DirEntry {
            path: "dev/2.1".into(),
            kind: NodeKind::Dir,
        };
        assert_eq!(entry.name(), "2.1");
    }

    #[test]
    fn committed_requires_revision_and_date() {
        let mut info = RevisionInfo {
            committed_revision: Some(3),
            ..RevisionInfo::default()
        };
        assert!(!info.is_committed());
        info.committed_date = Some(Utc::now());
        assert!(info.is_committed());
    }
}
