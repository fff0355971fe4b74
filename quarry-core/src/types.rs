//! Domain types shared by the controller and the build worker.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Persisted types are serializable via serde + serde_yaml.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::branch::BranchKind;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a configured repository (key in `config.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryName(pub String);

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RepositoryName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RepositoryName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Name of one version (a directory under a branch, e.g. `dev/2.1.10`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionName(pub String);

impl fmt::Display for VersionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VersionName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for VersionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque token addressing one worker-process invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Synchronization status of a working copy.
///
/// Always derived from disk + VCS metadata; the persisted copy is only a
/// display cache and is re-verified on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local directory does not exist.
    #[default]
    Absent,
    /// Directory exists but is not a working copy.
    Invalid,
    /// Working copy without a committed revision/date (partial checkout).
    Interrupted,
    /// Fully synchronized.
    Successful,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Absent => write!(f, "absent"),
            SyncStatus::Invalid => write!(f, "invalid"),
            SyncStatus::Interrupted => write!(f, "interrupted"),
            SyncStatus::Successful => write!(f, "successful"),
        }
    }
}

/// Target runtime environment a build produces artifacts for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEnvironment {
    Common,
    Server,
    Explorer,
    Web,
    CommonClient,
}

impl RuntimeEnvironment {
    pub fn all() -> &'static [RuntimeEnvironment] {
        &[
            RuntimeEnvironment::Common,
            RuntimeEnvironment::Server,
            RuntimeEnvironment::Explorer,
            RuntimeEnvironment::Web,
            RuntimeEnvironment::CommonClient,
        ]
    }
}

impl fmt::Display for RuntimeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeEnvironment::Common => write!(f, "common"),
            RuntimeEnvironment::Server => write!(f, "server"),
            RuntimeEnvironment::Explorer => write!(f, "explorer"),
            RuntimeEnvironment::Web => write!(f, "web"),
            RuntimeEnvironment::CommonClient => write!(f, "common_client"),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Username/password pair; absence means anonymous access.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Working copy
// ---------------------------------------------------------------------------

/// A local directory bound to one remote branch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    pub repository: RepositoryName,
    pub version: VersionName,
    pub branch: BranchKind,
    pub local_path: PathBuf,
    pub remote_url: String,
    pub credentials: Option<Credentials>,
}

impl WorkingCopy {
    /// Path of `path` relative to the working-copy root, for progress messages.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.local_path).unwrap_or(path)
    }
}

/// Persisted synchronization state of one working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCopyState {
    pub repository: RepositoryName,
    pub version: VersionName,
    #[serde(default)]
    pub branch: BranchKind,
    #[serde(default)]
    pub status: SyncStatus,
    /// False while the working copy is being mutated or is absent.
    #[serde(default)]
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_revision: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl WorkingCopyState {
    pub fn new(repository: RepositoryName, branch: BranchKind, version: VersionName) -> Self {
        Self {
            repository,
            version,
            branch,
            status: SyncStatus::Absent,
            loaded: false,
            built_revision: None,
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Build job
// ---------------------------------------------------------------------------

/// One worker-process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub job_id: JobId,
    pub source_path: PathBuf,
    pub clean: bool,
    environments: BTreeSet<RuntimeEnvironment>,
}

impl BuildJob {
    /// New job targeting every runtime environment.
    pub fn new(source_path: impl Into<PathBuf>, clean: bool) -> Self {
        Self {
            job_id: JobId::new(),
            source_path: source_path.into(),
            clean,
            environments: RuntimeEnvironment::all().iter().copied().collect(),
        }
    }

    pub fn environments(&self) -> &BTreeSet<RuntimeEnvironment> {
        &self.environments
    }

    /// Positional worker arguments: `<job-id> <path> <1|0>`.
    pub fn worker_args(&self) -> Vec<String> {
        vec![
            self.job_id.to_string(),
            self.source_path.display().to_string(),
            if self.clean { "1" } else { "0" }.to_string(),
        ]
    }

    /// Parse the positional worker arguments produced by [`BuildJob::worker_args`].
    ///
    /// Any clean flag other than `"1"` selects an incremental build.
    pub fn from_worker_args<S: AsRef<str>>(args: &[S]) -> Option<Self> {
        let [job, path, clean] = args else {
            return None;
        };
        let job_id = job.as_ref().parse().ok()?;
        let mut job = Self::new(PathBuf::from(path.as_ref()), clean.as_ref() == "1");
        job.job_id = job_id;
        Some(job)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
