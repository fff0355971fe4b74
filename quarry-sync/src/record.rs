//! Persisted working-copy record updates shared by the update and delete tasks.

use std::path::Path;

use quarry_core::{state, SyncStatus, WorkingCopy};

use crate::error::SyncError;
use crate::status::derive_status;
use crate::vcs::Vcs;

/// Persist `loaded = false` before the working copy becomes unstable.
pub(crate) fn mark_not_loaded(home: &Path, wc: &WorkingCopy) -> Result<(), SyncError> {
    let mut record = state::load_or_new_at(home, &wc.repository, wc.branch, &wc.version)?;
    record.loaded = false;
    state::save_at(home, &mut record)?;
    Ok(())
}

/// Recompute the status from disk, set `loaded = status != Absent`, persist.
pub(crate) fn reconcile(home: &Path, vcs: &Vcs, wc: &WorkingCopy) -> Result<SyncStatus, SyncError> {
    let status = derive_status(vcs, &wc.local_path);
    let mut record = state::load_or_new_at(home, &wc.repository, wc.branch, &wc.version)?;
    record.status = status;
    record.loaded = status != SyncStatus::Absent;
    state::save_at(home, &mut record)?;
    Ok(status)
}
