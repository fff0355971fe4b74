//! # quarry-sync
//!
//! Version-control facade and working-copy synchronization.
//!
//! [`Vcs`] wraps the `svn` client behind [`VcsBackend`]; [`UpdateTask`] and
//! [`DeleteTask`] are the task-model units that change a working copy on
//! disk. Status is always derived from disk via [`status::derive_status`].

pub mod branches;
pub mod delete;
pub mod error;
pub mod pipeline;
mod record;
pub mod status;
pub mod svn;
pub mod update;
pub mod vcs;

pub use delete::DeleteTask;
pub use error::{format_error_message, is_cancellation, SyncError, VcsError};
pub use update::{ChangeRecord, UpdateReport, UpdateTask};
pub use vcs::{
    Depth, DirEntry, EventSink, NodeKind, Revision, RevisionInfo, UpdateAction, UpdateEvent, Vcs,
    VcsBackend,
};
