//! Executor scheduling, completion-hook dispatch, pause and cancellation.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use quarry_task::{
    Task, TaskContext, TaskError, TaskExecutor, TaskOutcome, TaskState, DISPATCH_THREAD,
};

struct Recorder {
    finished_on: Arc<Mutex<Option<String>>>,
}

impl Task for Recorder {
    type Output = u32;

    fn title(&self) -> String {
        "recorder".to_string()
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<u32, TaskError> {
        ctx.set_progress(40, "working");
        Ok(7)
    }

    fn finished(&mut self, outcome: &TaskOutcome<u32>) {
        assert!(matches!(outcome, TaskOutcome::Finished(7)));
        *self.finished_on.lock().unwrap() = std::thread::current().name().map(str::to_string);
    }
}

/// Blocks in `execute` until the gate sender fires or is dropped.
struct Gated {
    name: &'static str,
    gate: Mutex<mpsc::Receiver<()>>,
    ran: Arc<Mutex<bool>>,
}

impl Gated {
    fn new(name: &'static str) -> (Self, mpsc::Sender<()>, Arc<Mutex<bool>>) {
        let (tx, rx) = mpsc::channel();
        let ran = Arc::new(Mutex::new(false));
        (
            Self {
                name,
                gate: Mutex::new(rx),
                ran: ran.clone(),
            },
            tx,
            ran,
        )
    }
}

impl Task for Gated {
    type Output = ();

    fn title(&self) -> String {
        self.name.to_string()
    }

    fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        *self.ran.lock().unwrap() = true;
        let _ = self.gate.lock().unwrap().recv();
        Ok(())
    }
}

struct Looping;

impl Task for Looping {
    type Output = ();

    fn title(&self) -> String {
        "looping".to_string()
    }

    fn pausable(&self) -> bool {
        true
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        loop {
            ctx.check_paused();
            ctx.check_cancelled()?;
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

struct Failing;

impl Task for Failing {
    type Output = ();

    fn title(&self) -> String {
        "failing".to_string()
    }

    fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Err(TaskError::failed("connection refused"))
    }
}

struct Panicking {
    outcome: Arc<Mutex<Option<TaskState>>>,
}

impl Task for Panicking {
    type Output = ();

    fn title(&self) -> String {
        "panicking".to_string()
    }

    fn execute(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        panic!("boom");
    }

    fn finished(&mut self, outcome: &TaskOutcome<()>) {
        *self.outcome.lock().unwrap() = Some(outcome.state());
    }
}

async fn wait_for_state(handle: &quarry_task::TaskHandle, state: TaskState) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
        .await
        .expect("state reached in time")
        .expect("sender alive");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finished_runs_on_dispatch_thread() {
    let executor = TaskExecutor::new(2).expect("executor");
    let finished_on = Arc::new(Mutex::new(None));
    let handle = executor.execute(Recorder {
        finished_on: finished_on.clone(),
    });

    assert_eq!(handle.wait().await, TaskState::Finished);
    assert_eq!(finished_on.lock().unwrap().as_deref(), Some(DISPATCH_THREAD));
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.percent, 100);
    assert_eq!(snapshot.status, "working");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallelism_is_bounded() {
    let executor = TaskExecutor::new(1).expect("executor");
    let (first, release_first, _) = Gated::new("first");
    let (second, release_second, second_ran) = Gated::new("second");

    let first = executor.execute(first);
    let second = executor.execute(second);

    wait_for_state(&first, TaskState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.snapshot().state, TaskState::Pending);
    assert!(!*second_ran.lock().unwrap());

    release_first.send(()).unwrap();
    release_second.send(()).unwrap();
    assert_eq!(first.wait().await, TaskState::Finished);
    assert_eq!(second.wait().await, TaskState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_pending_task_skips_body() {
    let executor = TaskExecutor::new(1).expect("executor");
    let (blocker, release, _) = Gated::new("blocker");
    let (queued, _release_queued, queued_ran) = Gated::new("queued");

    let blocker = executor.execute(blocker);
    let queued = executor.execute(queued);
    wait_for_state(&blocker, TaskState::Running).await;

    queued.cancel();
    release.send(()).unwrap();
    assert_eq!(queued.wait().await, TaskState::Cancelled);
    assert!(!*queued_ran.lock().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_then_cancel_ends_cancelled() {
    let executor = TaskExecutor::new(1).expect("executor");
    let handle = executor.execute(Looping);
    wait_for_state(&handle, TaskState::Running).await;

    assert!(handle.pause());
    assert!(handle.snapshot().paused);
    handle.cancel();
    assert_eq!(handle.wait().await, TaskState::Cancelled);
    assert!(!handle.snapshot().paused);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_pausable_task_refuses_pause() {
    let executor = TaskExecutor::new(1).expect("executor");
    let (gated, release, _) = Gated::new("gated");
    let handle = executor.execute(gated);
    assert!(!handle.pause());
    release.send(()).unwrap();
    assert_eq!(handle.wait().await, TaskState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_and_panic_are_reported() {
    let executor = TaskExecutor::new(2).expect("executor");
    let failing = executor.execute(Failing);
    let outcome = Arc::new(Mutex::new(None));
    let panicking = executor.execute(Panicking {
        outcome: outcome.clone(),
    });

    assert_eq!(failing.wait().await, TaskState::Failed);
    assert_eq!(
        failing.snapshot().error.as_deref(),
        Some("connection refused")
    );
    assert_eq!(panicking.wait().await, TaskState::Failed);
    assert_eq!(
        panicking.snapshot().error.as_deref(),
        Some("task panicked: boom")
    );
    // The completion hook still runs, seeing the failure.
    assert_eq!(*outcome.lock().unwrap(), Some(TaskState::Failed));
}
