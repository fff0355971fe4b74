//! Working-copy status, always derived from disk and client metadata.

use std::path::Path;

use quarry_core::SyncStatus;

use crate::vcs::{RevisionInfo, Vcs};

/// `dd-MM-yyyy HH:mm` as shown next to the revision number.
const REVISION_DATE_FORMAT: &str = "%d-%m-%Y %H:%M";

/// Absent: no directory. Invalid: not a working copy. Interrupted: no
/// committed revision/date recorded. Successful otherwise.
pub fn derive_status(vcs: &Vcs, path: &Path) -> SyncStatus {
    if !path.exists() {
        return SyncStatus::Absent;
    }
    if !vcs.is_working_copy(path) {
        return SyncStatus::Invalid;
    }
    match vcs.info(&path.display().to_string(), false) {
        Some(info) if info.is_committed() => SyncStatus::Successful,
        _ => SyncStatus::Interrupted,
    }
}

/// `<rev> / <dd-MM-yyyy HH:mm>`, when both parts are known.
pub fn revision_label(info: &RevisionInfo) -> Option<String> {
    let revision = info.committed_revision?;
    let date = info.committed_date?;
    Some(format!(
        "{revision} / {}",
        date.format(REVISION_DATE_FORMAT)
    ))
}

/// Label for a successful working copy; `None` for any other status.
pub fn local_revision_label(vcs: &Vcs, path: &Path, status: SyncStatus) -> Option<String> {
    if status != SyncStatus::Successful {
        return None;
    }
    vcs.info(&path.display().to_string(), false)
        .as_ref()
        .and_then(revision_label)
}

/// Committed revision of a local working copy.
pub fn local_revision(vcs: &Vcs, path: &Path) -> Option<u64> {
    vcs.info(&path.display().to_string(), false)
        .and_then(|info| info.committed_revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn label_uses_day_first_format() {
        let info = RevisionInfo {
            revision: Some(90),
            committed_revision: Some(88),
            committed_date: Some(Utc.with_ymd_and_hms(2024, 2, 7, 9, 5, 0).unwrap()),
        };
        assert_eq!(revision_label(&info).as_deref(), Some("88 / 07-02-2024 09:05"));
    }

    #[test]
    fn label_missing_without_date() {
        let info = RevisionInfo {
            committed_revision: Some(88),
            ..RevisionInfo::default()
        };
        assert!(revision_label(&info).is_none());
    }
}
