use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use tokio::sync::{oneshot, watch, Semaphore};

use crate::context::{ProgressFn, TaskContext, TaskControl};
use crate::error::TaskError;
use crate::task::{Task, TaskOutcome, TaskState};

/// Name of the thread every completion hook runs on.
pub const DISPATCH_THREAD: &str = "task-dispatch";

type DispatchJob = Box<dyn FnOnce() + Send + 'static>;

/// Point-in-time view of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub title: String,
    pub state: TaskState,
    pub percent: u8,
    pub status: String,
    pub paused: bool,
    pub error: Option<String>,
}

impl TaskSnapshot {
    fn pending(title: String) -> Self {
        Self {
            title,
            state: TaskState::Pending,
            percent: 0,
            status: String::new(),
            paused: false,
            error: None,
        }
    }
}

/// Caller-side handle: observe, cancel, pause, resume, await.
#[derive(Clone)]
pub struct TaskHandle {
    control: Arc<TaskControl>,
    snapshot: Arc<watch::Sender<TaskSnapshot>>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.control.cancel();
        self.snapshot.send_modify(|s| s.paused = false);
    }

    /// Returns false if the task is not pausable or already done.
    pub fn pause(&self) -> bool {
        if self.snapshot.borrow().state.is_terminal() || !self.control.pause() {
            return false;
        }
        self.snapshot.send_modify(|s| s.paused = true);
        true
    }

    pub fn resume(&self) {
        self.control.resume();
        self.snapshot.send_modify(|s| s.paused = false);
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshot.subscribe()
    }

    /// Wait until the task reaches a terminal state, completion hook included.
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.snapshot.subscribe();
        let outcome = rx.wait_for(|s| s.state.is_terminal()).await;
        match outcome {
            Ok(snapshot) => snapshot.state,
            Err(_) => self.snapshot.borrow().state,
        }
    }
}

/// Runs tasks with bounded parallelism.
///
/// Bodies run on tokio's blocking pool; completion hooks are serialized on
/// one dedicated dispatch thread.
pub struct TaskExecutor {
    permits: Arc<Semaphore>,
    dispatch: mpsc::Sender<DispatchJob>,
}

impl TaskExecutor {
    pub fn new(max_parallel: usize) -> std::io::Result<Self> {
        let (dispatch, jobs) = mpsc::channel::<DispatchJob>();
        thread::Builder::new()
            .name(DISPATCH_THREAD.to_string())
            .spawn(move || {
                while let Ok(job) = jobs.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("task completion hook panicked");
                    }
                }
            })?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            dispatch,
        })
    }

    /// Submit a task. Must be called from within a tokio runtime.
    pub fn execute<T: Task>(&self, task: T) -> TaskHandle {
        let control = Arc::new(TaskControl::new(task.pausable()));
        let (tx, _) = watch::channel(TaskSnapshot::pending(task.title()));
        let handle = TaskHandle {
            control: control.clone(),
            snapshot: Arc::new(tx),
        };

        let permits = self.permits.clone();
        let dispatch = self.dispatch.clone();
        let snapshot = handle.snapshot.clone();
        tokio::spawn(run_task(task, control, snapshot, permits, dispatch));
        handle
    }
}

async fn run_task<T: Task>(
    mut task: T,
    control: Arc<TaskControl>,
    snapshot: Arc<watch::Sender<TaskSnapshot>>,
    permits: Arc<Semaphore>,
    dispatch: mpsc::Sender<DispatchJob>,
) {
    let title = task.title();
    let Ok(_permit) = permits.acquire_owned().await else {
        publish(&snapshot, TaskState::Failed, Some("executor closed".to_string()));
        return;
    };

    let outcome = if control.is_cancelled() {
        TaskOutcome::Cancelled
    } else {
        snapshot.send_modify(|s| s.state = TaskState::Running);
        tracing::debug!(task = %title, "task started");
        let ctx = TaskContext::new(control.clone(), progress_sink(snapshot.clone()));
        // The task comes back even when its body unwinds, so `finished` always runs.
        let joined = tokio::task::spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(|| task.execute(&ctx)));
            (task, result)
        })
        .await;
        match joined {
            Ok((returned, Ok(result))) => {
                task = returned;
                TaskOutcome::from_result(result, control.is_cancelled())
            }
            Ok((returned, Err(payload))) => {
                task = returned;
                let message = format!("task panicked: {}", panic_message(payload.as_ref()));
                tracing::error!(task = %title, "{message}");
                TaskOutcome::Failed(TaskError::failed(message))
            }
            Err(err) => {
                tracing::error!(task = %title, error = %err, "task body did not complete");
                publish(&snapshot, TaskState::Failed, Some(err.to_string()));
                return;
            }
        }
    };

    let state = outcome.state();
    let error = outcome.error_message();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let job: DispatchJob = Box::new(move || {
        task.finished(&outcome);
        let _ = done_tx.send(());
    });
    if dispatch.send(job).is_err() {
        tracing::warn!(task = %title, "dispatch thread gone, completion hook skipped");
    } else if done_rx.await.is_err() {
        tracing::warn!(task = %title, "completion hook did not return");
    }

    tracing::debug!(task = %title, state = %state, "task done");
    publish(&snapshot, state, error);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn progress_sink(snapshot: Arc<watch::Sender<TaskSnapshot>>) -> ProgressFn {
    Arc::new(move |percent, status| {
        snapshot.send_modify(|s| {
            s.percent = percent;
            s.status = status.to_string();
        });
    })
}

fn publish(snapshot: &watch::Sender<TaskSnapshot>, state: TaskState, error: Option<String>) {
    snapshot.send_modify(|s| {
        s.state = state;
        s.paused = false;
        s.error = error;
        if state == TaskState::Finished {
            s.percent = 100;
        }
    });
}
