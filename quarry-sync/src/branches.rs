//! Remote branch and version discovery.

use std::collections::BTreeSet;
use std::path::Path;

use quarry_core::{state, BranchKind, BranchRegistry, RepositoryConfig, VersionName};

use crate::error::SyncError;
use crate::vcs::{Depth, NodeKind, Vcs};

/// Where a branch listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Remote,
    /// Repository offline; derived from persisted working copies.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branches {
    pub kinds: Vec<BranchKind>,
    pub source: Source,
}

/// Branch kinds present under the repository root.
///
/// Unrecognized directories are ignored. When the repository cannot be
/// reached, the kinds of already persisted working copies are returned.
pub fn discover_branches_at(
    home: &Path,
    vcs: &Vcs,
    repo: &RepositoryConfig,
    registry: &BranchRegistry,
) -> Result<Branches, SyncError> {
    match vcs.list(&repo.url, Depth::Immediates) {
        Ok(entries) => {
            let kinds: BTreeSet<BranchKind> = entries
                .iter()
                .filter(|entry| entry.kind == NodeKind::Dir)
                .filter_map(|entry| registry.kind_for(entry.name()))
                .collect();
            Ok(Branches {
                kinds: kinds.into_iter().collect(),
                source: Source::Remote,
            })
        }
        Err(err) if err.is_connection_problem() => {
            tracing::warn!(
                "Repository '{}' is offline, using local working copies: {err}",
                repo.name
            );
            let kinds: BTreeSet<BranchKind> = state::list_at(home)?
                .into_iter()
                .filter(|record| record.repository == repo.name)
                .map(|record| record.branch)
                .collect();
            Ok(Branches {
                kinds: kinds.into_iter().collect(),
                source: Source::Local,
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Version directories under a branch, e.g. `<repo>/dev/*`.
pub fn list_versions(
    vcs: &Vcs,
    repo: &RepositoryConfig,
    kind: BranchKind,
) -> Result<Vec<VersionName>, SyncError> {
    let url = repo.branch_url(kind.remote_dir());
    let mut versions: Vec<VersionName> = vcs
        .list(&url, Depth::Immediates)?
        .into_iter()
        .filter(|entry| entry.kind == NodeKind::Dir)
        .map(|entry| VersionName::from(entry.name()))
        .collect();
    versions.sort();
    Ok(versions)
}
