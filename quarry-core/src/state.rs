//! Per-working-copy YAML state.
//!
//! # Storage layout
//!
//! ```text
//! ~/.quarry/
//!   state/
//!     <repository>/
//!       <branch-dir>/
//!         <version>.yaml   (one file per working copy — mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function takes the home directory explicitly (`fn_at(home, …)`);
//! callers resolve it once through [`crate::home`] and tests pass a `TempDir`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::branch::BranchKind;
use crate::error::{io_err, CoreError};
use crate::paths::state_root;
use crate::types::{RepositoryName, VersionName, WorkingCopyState};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.quarry/state/<repository>/<branch-dir>/<version>.yaml` — pure, no I/O.
pub fn state_path_at(
    home: &Path,
    repository: &RepositoryName,
    branch: BranchKind,
    version: &VersionName,
) -> PathBuf {
    state_root(home)
        .join(&repository.0)
        .join(branch.remote_dir())
        .join(format!("{}.yaml", version.0))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load one working-copy state.
///
/// Returns `CoreError::StateNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(
    home: &Path,
    repository: &RepositoryName,
    branch: BranchKind,
    version: &VersionName,
) -> Result<WorkingCopyState, CoreError> {
    let path = state_path_at(home, repository, branch, version);
    if !path.exists() {
        return Err(CoreError::StateNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// Load one working-copy state, or a fresh `Absent` record if none is stored.
pub fn load_or_new_at(
    home: &Path,
    repository: &RepositoryName,
    branch: BranchKind,
    version: &VersionName,
) -> Result<WorkingCopyState, CoreError> {
    match load_at(home, repository, branch, version) {
        Ok(state) => Ok(state),
        Err(CoreError::StateNotFound { .. }) => Ok(WorkingCopyState::new(
            repository.clone(),
            branch,
            version.clone(),
        )),
        Err(err) => Err(err),
    }
}

/// Walk `<home>/.quarry/state/*/*/*.yaml`. Sorted by repository, branch
/// directory, then version.
pub fn list_at(home: &Path) -> Result<Vec<WorkingCopyState>, CoreError> {
    let root = state_root(home);
    if !root.exists() {
        return Ok(vec![]);
    }

    let mut result = Vec::new();
    for repo_dir in sorted_entries(&root, |t| t.is_dir())? {
        for branch_dir in sorted_entries(&repo_dir, |t| t.is_dir())? {
            for path in sorted_entries(&branch_dir, |t| t.is_file())? {
                if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                    continue;
                }
                let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
                let state: WorkingCopyState = serde_yaml::from_str(&contents)
                    .map_err(|e| CoreError::Parse { path, source: e })?;
                result.push(state);
            }
        }
    }
    Ok(result)
}

fn sorted_entries(
    dir: &Path,
    keep: impl Fn(&std::fs::FileType) -> bool,
) -> Result<Vec<PathBuf>, CoreError> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| keep(&t)).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic) / remove
// ---------------------------------------------------------------------------

/// Atomically persist a working-copy state, stamping `updated_at`.
pub fn save_at(home: &Path, state: &mut WorkingCopyState) -> Result<(), CoreError> {
    state.updated_at = Utc::now();
    let path = state_path_at(home, &state.repository, state.branch, &state.version);
    let yaml = serde_yaml::to_string(state)?;
    write_atomic(&path, &yaml)
}

/// Delete a working-copy state record; missing records are not an error.
/// The branch and repository directories are removed once they hold no
/// more records.
pub fn remove_at(
    home: &Path,
    repository: &RepositoryName,
    branch: BranchKind,
    version: &VersionName,
) -> Result<(), CoreError> {
    let path = state_path_at(home, repository, branch, version);
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_err(&path, err)),
    }
    let root = state_root(home);
    for dir in path.ancestors().skip(1).take_while(|dir| *dir != root.as_path()) {
        let empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty {
            break;
        }
        std::fs::remove_dir(dir).map_err(|e| io_err(dir, e))?;
    }
    Ok(())
}

/// Write flow: `.tmp` sibling → `chmod 0600` → `rename`.
///
/// `.tmp` is always in the same directory as the target (same filesystem).
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), CoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("path has no parent")));
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncStatus;
    use tempfile::TempDir;

    fn repo() -> RepositoryName {
        RepositoryName::from("main")
    }
    fn ver() -> VersionName {
        VersionName::from("2.1.10")
    }

    #[test]
    fn state_path_is_correct() {
        let home = TempDir::new().unwrap();
        let path = state_path_at(home.path(), &repo(), BranchKind::Development, &ver());
        assert!(path.ends_with(".quarry/state/main/dev/2.1.10.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let mut state = WorkingCopyState::new(repo(), BranchKind::Development, ver());
        state.status = SyncStatus::Successful;
        state.loaded = true;
        state.built_revision = Some(4120);
        save_at(home.path(), &mut state).unwrap();

        let loaded = load_at(home.path(), &repo(), BranchKind::Development, &ver()).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_cleans_up_tmp_and_sets_mode() {
        let home = TempDir::new().unwrap();
        let mut state = WorkingCopyState::new(repo(), BranchKind::Development, ver());
        save_at(home.path(), &mut state).unwrap();
        let path = state_path_at(home.path(), &repo(), BranchKind::Development, &ver());
        assert!(!path.with_extension("yaml.tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn load_or_new_defaults_to_absent() {
        let home = TempDir::new().unwrap();
        let state = load_or_new_at(home.path(), &repo(), BranchKind::Release, &ver()).unwrap();
        assert_eq!(state.status, SyncStatus::Absent);
        assert_eq!(state.branch, BranchKind::Release);
        assert!(!state.loaded);
    }

    #[test]
    fn branches_of_one_version_keep_separate_records() {
        let home = TempDir::new().unwrap();
        let mut dev = WorkingCopyState::new(repo(), BranchKind::Development, ver());
        dev.status = SyncStatus::Successful;
        save_at(home.path(), &mut dev).unwrap();
        let mut release = WorkingCopyState::new(repo(), BranchKind::Release, ver());
        release.status = SyncStatus::Interrupted;
        save_at(home.path(), &mut release).unwrap();

        let load = |branch| load_at(home.path(), &repo(), branch, &ver()).unwrap();
        assert_eq!(load(BranchKind::Development), dev);
        assert_eq!(load(BranchKind::Release), release);
        assert_eq!(list_at(home.path()).unwrap().len(), 2);

        remove_at(home.path(), &repo(), BranchKind::Release, &ver()).unwrap();
        assert!(state_root(home.path()).join("main").join("dev").exists());
        assert!(!state_root(home.path()).join("main").join("releases").exists());
    }

    #[test]
    fn remove_deletes_record_and_empty_repo_dir() {
        let home = TempDir::new().unwrap();
        let mut state = WorkingCopyState::new(repo(), BranchKind::Development, ver());
        save_at(home.path(), &mut state).unwrap();
        remove_at(home.path(), &repo(), BranchKind::Development, &ver()).unwrap();
        assert!(matches!(
            load_at(home.path(), &repo(), BranchKind::Development, &ver()).unwrap_err(),
            CoreError::StateNotFound { .. }
        ));
        assert!(!state_root(home.path()).join("main").exists());
        remove_at(home.path(), &repo(), BranchKind::Development, &ver())
            .expect("second remove is a no-op");
    }

    #[test]
    fn list_is_sorted() {
        let home = TempDir::new().unwrap();
        for (r, v) in [("zeta", "1"), ("alpha", "2"), ("alpha", "1")] {
            let mut state = WorkingCopyState::new(
                RepositoryName::from(r),
                BranchKind::Development,
                VersionName::from(v),
            );
            save_at(home.path(), &mut state).unwrap();
        }
        let listed: Vec<_> = list_at(home.path())
            .unwrap()
            .into_iter()
            .map(|s| format!("{}/{}", s.repository, s.version))
            .collect();
        assert_eq!(listed, ["alpha/1", "alpha/2", "zeta/1"]);
    }
}
