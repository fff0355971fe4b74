use std::fmt;

use crate::context::TaskContext;
use crate::error::TaskError;

/// Unit of long-running work with a separate completion phase.
///
/// `execute` runs on a blocking worker thread. `finished` runs afterwards
/// on the executor's dispatch thread, never concurrently with `execute`.
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    fn title(&self) -> String;

    fn pausable(&self) -> bool {
        false
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<Self::Output, TaskError>;

    fn finished(&mut self, _outcome: &TaskOutcome<Self::Output>) {}
}

/// How `execute` ended, as seen by `finished`.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Finished(T),
    Cancelled,
    Failed(TaskError),
}

impl<T> TaskOutcome<T> {
    /// Cancellation wins over whatever the body returned.
    pub fn from_result(result: Result<T, TaskError>, cancelled: bool) -> Self {
        match result {
            _ if cancelled => TaskOutcome::Cancelled,
            Ok(value) => TaskOutcome::Finished(value),
            Err(TaskError::Cancelled) => TaskOutcome::Cancelled,
            Err(err) => TaskOutcome::Failed(err),
        }
    }

    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Finished(_) => TaskState::Finished,
            TaskOutcome::Cancelled => TaskState::Cancelled,
            TaskOutcome::Failed(_) => TaskState::Failed,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            TaskOutcome::Failed(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Cancelled | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Object-safe view of a [`Task`] used as a group member.
///
/// `run` executes the body and then its completion hook in place.
pub trait ChildTask: Send {
    fn title(&self) -> String;
    fn pausable(&self) -> bool;
    fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;
}

impl<T: Task> ChildTask for T {
    fn title(&self) -> String {
        Task::title(self)
    }

    fn pausable(&self) -> bool {
        Task::pausable(self)
    }

    fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let result = self.execute(ctx);
        let outcome = TaskOutcome::from_result(result, ctx.is_cancelled());
        self.finished(&outcome);
        match outcome {
            TaskOutcome::Finished(_) => Ok(()),
            TaskOutcome::Cancelled => Err(TaskError::Cancelled),
            TaskOutcome::Failed(err) => Err(err),
        }
    }
}
