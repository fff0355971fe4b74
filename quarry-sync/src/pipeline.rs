//! Shared task construction used by the CLI and the build controller.

use std::path::Path;

use quarry_core::{BranchKind, Config, RepositoryName, VersionName, WorkingCopy};

use crate::delete::DeleteTask;
use crate::error::SyncError;
use crate::update::UpdateTask;
use crate::vcs::Vcs;

/// One working copy addressed by repository, branch kind and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub repository: RepositoryName,
    pub branch: BranchKind,
    pub version: VersionName,
}

impl Target {
    pub fn development(repository: &str, version: &str) -> Self {
        Self {
            repository: RepositoryName::from(repository),
            branch: BranchKind::Development,
            version: VersionName::from(version),
        }
    }
}

/// Working copy plus a facade authenticated for its repository.
pub fn resolve(config: &Config, vcs: &Vcs, target: &Target) -> Result<(Vcs, WorkingCopy), SyncError> {
    let wc = config.working_copy(&target.repository, target.branch, &target.version)?;
    Ok((vcs.with_credentials(wc.credentials.clone()), wc))
}

pub fn update_task(
    home: &Path,
    config: &Config,
    vcs: &Vcs,
    target: &Target,
) -> Result<UpdateTask, SyncError> {
    let (vcs, wc) = resolve(config, vcs, target)?;
    Ok(UpdateTask::new(home, vcs, wc))
}

pub fn delete_task(
    home: &Path,
    config: &Config,
    vcs: &Vcs,
    target: &Target,
) -> Result<DeleteTask, SyncError> {
    let (vcs, wc) = resolve(config, vcs, target)?;
    Ok(DeleteTask::new(home, vcs, wc))
}

/// Check the target's repository before any working copy is touched.
pub fn check_online(config: &Config, vcs: &Vcs, target: &Target) -> Result<(), SyncError> {
    let repo = config.repository(&target.repository)?;
    vcs.with_credentials(repo.auth.credentials())
        .check_connection(&repo.url)?;
    Ok(())
}
