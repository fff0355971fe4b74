//! Background task model: cancellable, optionally pausable units of work
//! with progress reporting, sequential groups and a bounded executor.

pub mod context;
pub mod error;
pub mod executor;
pub mod group;
pub mod task;

pub use context::{ProgressFn, TaskContext, TaskControl};
pub use error::TaskError;
pub use executor::{TaskExecutor, TaskHandle, TaskSnapshot, DISPATCH_THREAD};
pub use group::GroupTask;
pub use task::{ChildTask, Task, TaskOutcome, TaskState};
