//! Pausable removal of a working copy from disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use quarry_core::{state, SyncStatus, WorkingCopy};
use quarry_task::{Task, TaskContext, TaskError, TaskOutcome};

use crate::error::{io_err, SyncError};
use crate::record::{mark_not_loaded, reconcile};
use crate::status::derive_status;
use crate::vcs::Vcs;

pub struct DeleteTask {
    home: PathBuf,
    vcs: Vcs,
    working_copy: WorkingCopy,
}

impl DeleteTask {
    pub fn new(home: impl Into<PathBuf>, vcs: Vcs, working_copy: WorkingCopy) -> Self {
        Self {
            home: home.into(),
            vcs,
            working_copy,
        }
    }

    fn remove_tree(&self, ctx: &TaskContext) -> Result<u64, TaskError> {
        let root = &self.working_copy.local_path;
        ctx.set_progress(0, "Calculating files");
        let entries = collect_post_order(root).map_err(TaskError::from_error)?;
        let total = entries.len() as u64;

        let mut processed = 0u64;
        for entry in &entries {
            ctx.check_paused();
            ctx.check_cancelled()?;
            remove_entry(entry).map_err(TaskError::from_error)?;
            processed += 1;
            let relative = self.working_copy.relative(entry);
            ctx.set_progress(
                (processed * 100 / total.max(1)) as u8,
                format!("Deleting: {}", relative.display()),
            );
        }

        // <url-dir>/<branch-dir>/<version>: prune the branch and url levels.
        for dir in root.ancestors().skip(1).take(2) {
            if !remove_if_empty(dir).map_err(TaskError::from_error)? {
                break;
            }
        }
        Ok(processed)
    }
}

impl Task for DeleteTask {
    type Output = u64;

    fn title(&self) -> String {
        format!(
            "Delete working copy: {}",
            self.working_copy.local_path.display()
        )
    }

    fn pausable(&self) -> bool {
        true
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<u64, TaskError> {
        mark_not_loaded(&self.home, &self.working_copy).map_err(TaskError::from_error)?;
        let removed = self.remove_tree(ctx)?;
        tracing::info!(
            "Deleted working copy {} ({removed} entries)",
            self.working_copy.local_path.display()
        );
        Ok(removed)
    }

    fn finished(&mut self, outcome: &TaskOutcome<u64>) {
        let wc = &self.working_copy;
        let gone = !matches!(outcome, TaskOutcome::Cancelled)
            && derive_status(&self.vcs, &wc.local_path) == SyncStatus::Absent;
        let result = if gone {
            state::remove_at(&self.home, &wc.repository, wc.branch, &wc.version)
                .map_err(SyncError::from)
        } else {
            reconcile(&self.home, &self.vcs, wc).map(|_| ())
        };
        if let Err(err) = result {
            tracing::error!(
                "Unable to update state of working copy {}: {err}",
                wc.local_path.display()
            );
        }
    }
}

/// Every entry under `root` (and `root` itself), children before parents.
fn collect_post_order(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut ordered = Vec::new();
    match std::fs::symlink_metadata(root) {
        Ok(_) => visit(root, &mut ordered)?,
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(root, err)),
    }
    Ok(ordered)
}

fn visit(path: &Path, ordered: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    if meta.is_dir() {
        let mut children: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| io_err(path, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        children.sort();
        for child in children {
            visit(&child, ordered)?;
        }
    }
    ordered.push(path.to_path_buf());
    Ok(())
}

fn remove_entry(path: &Path) -> Result<(), SyncError> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir(path),
        Ok(meta) => {
            clear_readonly(path, meta.permissions());
            std::fs::remove_file(path)
        }
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// `.svn/pristine` files are stored read-only.
fn clear_readonly(path: &Path, mut permissions: std::fs::Permissions) {
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        let _ = std::fs::set_permissions(path, permissions);
    }
}

/// True when `dir` is gone afterwards.
fn remove_if_empty(dir: &Path) -> Result<bool, SyncError> {
    let empty = match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(io_err(dir, err)),
    };
    if empty {
        std::fs::remove_dir(dir).map_err(|e| io_err(dir, e))?;
    }
    Ok(empty)
}
