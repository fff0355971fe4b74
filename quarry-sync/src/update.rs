//! Working-copy synchronizer task.
//!
//! Flow:
//! 1. persist `loaded = false`
//! 2. estimate pending changes; zero means nothing to do
//! 3. checkout/update, counting per-item events into a [`ChangeRecord`]
//! 4. log a summary (or a cancellation notice)
//! 5. `finished`: recompute status, persist `loaded`, refresh the revision label

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use quarry_core::{SyncStatus, WorkingCopy};
use quarry_task::{Task, TaskContext, TaskError, TaskOutcome};

use crate::error::{format_error_message, is_cancellation, VcsError};
use crate::record::{mark_not_loaded, reconcile};
use crate::status::local_revision_label;
use crate::vcs::{EventSink, NodeKind, Revision, UpdateAction, UpdateEvent, Vcs};

/// Per-action counters of one update run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub added: u64,
    pub deleted: u64,
    pub changed: u64,
    pub restored: u64,
    /// Non-directory items seen, classified or not.
    pub processed: u64,
}

impl ChangeRecord {
    /// `processed * 100 / estimate`, clamped to 100.
    pub fn percent(&self, estimate: u64) -> u8 {
        if estimate == 0 {
            return 100;
        }
        (self.processed.saturating_mul(100) / estimate).min(100) as u8
    }

    /// Multi-line completion summary listing non-zero counters and the total.
    pub fn summary(&self, path: &str) -> String {
        let mut text = format!("UPDATE [{path}] finished");
        for (label, count) in [
            ("Added:   ", self.added),
            ("Deleted: ", self.deleted),
            ("Restored:", self.restored),
            ("Changed: ", self.changed),
        ] {
            if count > 0 {
                let _ = write!(text, "\n    * {label} {count}");
            }
        }
        let _ = write!(text, "\n    * Total:    {}", self.processed);
        text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub estimate: u64,
    pub changes: ChangeRecord,
}

/// Forwards task cancellation to client operations that emit no item events.
pub struct CancelCheck<'a> {
    ctx: &'a TaskContext,
}

impl<'a> CancelCheck<'a> {
    pub fn new(ctx: &'a TaskContext) -> Self {
        Self { ctx }
    }
}

impl EventSink for CancelCheck<'_> {
    fn handle_event(&mut self, _event: &UpdateEvent) -> Result<(), VcsError> {
        self.check_cancelled()
    }

    fn check_cancelled(&self) -> Result<(), VcsError> {
        if self.ctx.is_cancelled() {
            Err(VcsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Counts update events and turns them into task progress.
struct UpdateSink<'a> {
    ctx: &'a TaskContext,
    working_copy: &'a WorkingCopy,
    estimate: u64,
    record: ChangeRecord,
}

impl EventSink for UpdateSink<'_> {
    fn handle_event(&mut self, event: &UpdateEvent) -> Result<(), VcsError> {
        self.check_cancelled()?;
        if event.action.is_marker() || event.kind == NodeKind::Dir {
            return Ok(());
        }

        self.record.processed += 1;
        let relative = self.working_copy.relative(&event.path).display().to_string();
        self.ctx.set_progress(
            self.record.percent(self.estimate),
            format!("Updating: {relative}"),
        );

        match &event.action {
            UpdateAction::Add => self.record.added += 1,
            UpdateAction::Delete => self.record.deleted += 1,
            UpdateAction::Update => self.record.changed += 1,
            UpdateAction::Restore => self.record.restored += 1,
            other => tracing::warn!("Unexpected update action {other:?} / {relative}"),
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), VcsError> {
        if self.ctx.is_cancelled() {
            Err(VcsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Brings one working copy up to date with its remote branch.
pub struct UpdateTask {
    home: PathBuf,
    vcs: Vcs,
    working_copy: WorkingCopy,
    revision: Revision,
    status: Option<SyncStatus>,
    revision_label: Option<String>,
}

impl UpdateTask {
    pub fn new(home: impl Into<PathBuf>, vcs: Vcs, working_copy: WorkingCopy) -> Self {
        Self {
            home: home.into(),
            vcs,
            working_copy,
            revision: Revision::Head,
            status: None,
            revision_label: None,
        }
    }

    /// Synchronize to `revision` instead of HEAD.
    pub fn at_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    /// Status recomputed by the last `finished` call.
    pub fn status(&self) -> Option<SyncStatus> {
        self.status
    }

    /// `<rev> / <date>` recomputed by the last `finished` call.
    pub fn revision_label(&self) -> Option<&str> {
        self.revision_label.as_deref()
    }

    fn path_label(&self) -> String {
        self.working_copy.local_path.display().to_string()
    }

    fn synchronize(&self, ctx: &TaskContext) -> Result<UpdateReport, VcsError> {
        let path = self.path_label();
        let local = &self.working_copy.local_path;
        let url = &self.working_copy.remote_url;

        ctx.set_progress(0, "Calculating changes");
        let estimate =
            self.vcs
                .estimate_changes(local, url, self.revision, &mut CancelCheck::new(ctx))?;
        if estimate == 0 {
            tracing::info!("No need to update working copy: {path}");
            return Ok(UpdateReport::default());
        }

        tracing::info!("UPDATE [{path}] started");
        let mut sink = UpdateSink {
            ctx,
            working_copy: &self.working_copy,
            estimate,
            record: ChangeRecord::default(),
        };
        self.vcs.update(url, local, self.revision, &mut sink)?;
        let changes = sink.record;

        ctx.set_progress(100, "Updated");
        tracing::info!("{}", changes.summary(&path));
        Ok(UpdateReport { estimate, changes })
    }
}

impl Task for UpdateTask {
    type Output = UpdateReport;

    fn title(&self) -> String {
        format!("Update working copy: {}", self.path_label())
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<UpdateReport, TaskError> {
        mark_not_loaded(&self.home, &self.working_copy).map_err(TaskError::from_error)?;

        match self.synchronize(ctx) {
            Ok(report) => Ok(report),
            Err(err) if is_cancellation(&err) => {
                tracing::warn!("UPDATE [{}] canceled", self.path_label());
                Err(TaskError::Cancelled)
            }
            Err(err) => {
                let message = format_error_message(
                    &format!("Unable to update working copy {}", self.path_label()),
                    &err,
                );
                tracing::error!("{message}");
                Err(TaskError::Failed {
                    message,
                    source: Some(Box::new(err)),
                })
            }
        }
    }

    fn finished(&mut self, _outcome: &TaskOutcome<UpdateReport>) {
        match reconcile(&self.home, &self.vcs, &self.working_copy) {
            Ok(status) => {
                self.status = Some(status);
                self.revision_label =
                    local_revision_label(&self.vcs, &self.working_copy.local_path, status);
                tracing::debug!(
                    "Working copy {} is {status} ({})",
                    self.path_label(),
                    self.revision_label.as_deref().unwrap_or("no revision")
                );
            }
            Err(err) => tracing::error!(
                "Unable to persist state of working copy {}: {err}",
                self.path_label()
            ),
        }
    }
}
