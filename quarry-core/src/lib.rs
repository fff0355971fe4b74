//! Quarry core library — domain types, branch registry, config, working-copy
//! state persistence, errors.
//!
//! - [`types`] — newtypes, [`SyncStatus`], [`BuildJob`], [`WorkingCopy`]
//! - [`branch`] — remote directory → [`BranchKind`] registry
//! - [`config`] — `~/.quarry/config.yaml`
//! - [`state`] — per-working-copy YAML state
//! - [`paths`] — filesystem layout and URL helpers

use std::path::PathBuf;

pub mod branch;
pub mod config;
pub mod error;
pub mod paths;
pub mod state;
pub mod types;

pub use branch::{BranchKind, BranchRegistry};
pub use config::{AuthConfig, Config, RepositoryConfig};
pub use error::CoreError;
pub use types::{
    BuildJob, Credentials, JobId, RepositoryName, RuntimeEnvironment, SyncStatus, VersionName,
    WorkingCopy, WorkingCopyState,
};

/// The current user's home directory.
pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}
