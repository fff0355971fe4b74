//! Cancellation, pause and progress plumbing handed to a running task body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::TaskError;

/// Progress sink: `(percent, status message)`.
pub type ProgressFn = Arc<dyn Fn(u8, &str) + Send + Sync>;

/// Shared cancel/pause flags of one task (and its children).
#[derive(Debug)]
pub struct TaskControl {
    cancelled: AtomicBool,
    pausable: bool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl TaskControl {
    pub fn new(pausable: bool) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            pausable,
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    /// Request cancellation. Also wakes a body blocked in a pause.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.lock_paused();
        self.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pausable(&self) -> bool {
        self.pausable
    }

    /// Pause a pausable task. Returns false for tasks that cannot pause.
    pub fn pause(&self) -> bool {
        if !self.pausable {
            return false;
        }
        *self.lock_paused() = true;
        true
    }

    pub fn resume(&self) {
        *self.lock_paused() = false;
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.lock_paused()
    }

    /// Block the calling thread while paused. Returns early on cancellation.
    pub fn wait_while_paused(&self) {
        let mut paused = self.lock_paused();
        while *paused && !self.is_cancelled() {
            paused = self
                .resumed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock_paused(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle a task body uses to poll cancellation/pause and report progress.
#[derive(Clone)]
pub struct TaskContext {
    control: Arc<TaskControl>,
    progress: ProgressFn,
}

impl TaskContext {
    pub fn new(control: Arc<TaskControl>, progress: ProgressFn) -> Self {
        Self { control, progress }
    }

    /// A context with its own control and no progress sink.
    pub fn detached() -> Self {
        Self::new(Arc::new(TaskControl::new(false)), Arc::new(|_, _| {}))
    }

    pub fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// `Err(TaskError::Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Blocks while the task is paused.
    pub fn check_paused(&self) {
        self.control.wait_while_paused();
    }

    /// Report progress; percentages above 100 are clamped.
    pub fn set_progress(&self, percent: u8, status: impl AsRef<str>) {
        (self.progress)(percent.min(100), status.as_ref());
    }

    /// Context for child `index` of `count` in a group: same control, progress
    /// mapped into the child's slice of the parent's 0..=100 range.
    pub fn scoped(&self, index: usize, count: usize) -> TaskContext {
        let parent = self.progress.clone();
        let count = count.max(1);
        let progress: ProgressFn = Arc::new(move |percent, status| {
            let overall = (index * 100 + usize::from(percent.min(100))) / count;
            parent(overall.min(100) as u8, status);
        });
        TaskContext::new(self.control.clone(), progress)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}
