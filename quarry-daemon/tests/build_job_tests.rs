//! Build jobs end to end over a real notifier socket, with worker threads
//! standing in for worker processes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;

use quarry_core::{state, BranchKind, BuildJob, RepositoryName, VersionName, WorkingCopy};
use quarry_daemon::{
    BuildTask, DaemonError, JobRegistry, NotifierClient, NotifierServer, ProcessLauncher,
    WorkerLauncher, WorkerProcess,
};
use quarry_sync::Vcs;
use quarry_task::{TaskExecutor, TaskHandle, TaskState};

type Script = Arc<dyn Fn(&NotifierClient) + Send + Sync>;

struct ThreadWorker {
    handle: JoinHandle<()>,
    killed: Arc<AtomicBool>,
}

impl WorkerProcess for ThreadWorker {
    fn has_exited(&mut self) -> std::io::Result<bool> {
        Ok(self.handle.is_finished())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ThreadLauncher {
    home: PathBuf,
    script: Script,
    killed: Arc<AtomicBool>,
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, job: &BuildJob) -> Result<Box<dyn WorkerProcess>, DaemonError> {
        let home = self.home.clone();
        let job_id = job.job_id;
        let script = self.script.clone();
        let handle = thread::spawn(move || {
            if let Ok(client) = NotifierClient::attach(&home, job_id) {
                script(&client);
            }
        });
        Ok(Box::new(ThreadWorker {
            handle,
            killed: self.killed.clone(),
        }))
    }
}

struct Fixture {
    home: TempDir,
    server: NotifierServer,
    executor: TaskExecutor,
    killed: Arc<AtomicBool>,
}

impl Fixture {
    async fn start() -> Self {
        let home = TempDir::new().expect("home");
        let server = NotifierServer::start(home.path(), JobRegistry::new())
            .await
            .expect("notifier");
        Self {
            home,
            server,
            executor: TaskExecutor::new(2).expect("executor"),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn working_copy(&self) -> WorkingCopy {
        WorkingCopy {
            repository: RepositoryName::from("main"),
            version: VersionName::from("2.1"),
            branch: BranchKind::Development,
            local_path: self.home.path().join("work").join("2.1"),
            remote_url: "svn://host/repo/dev/2.1".into(),
            credentials: None,
        }
    }

    fn build(&self, script: Script) -> TaskHandle {
        let launcher = ThreadLauncher {
            home: self.home.path().to_path_buf(),
            script,
            killed: self.killed.clone(),
        };
        let task = BuildTask::new(
            self.home.path(),
            Vcs::svn(None),
            self.working_copy(),
            false,
            self.server.registry().clone(),
            Arc::new(launcher),
        )
        .with_poll_interval(Duration::from_millis(10));
        self.executor.execute(task)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_exit_without_result_fails_the_job() {
    let fx = Fixture::start().await;
    let handle = fx.build(Arc::new(|client| client.set_progress(40)));

    assert_eq!(handle.wait().await, TaskState::Failed);
    let error = handle.snapshot().error.unwrap_or_default();
    assert!(error.contains("exited without reporting"), "{error}");
    assert!(fx.server.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_worker_program_fails_the_job() {
    let fx = Fixture::start().await;
    let program = fx.home.path().join("bin").join("quarry-worker");
    let task = BuildTask::new(
        fx.home.path(),
        Vcs::svn(None),
        fx.working_copy(),
        false,
        fx.server.registry().clone(),
        Arc::new(ProcessLauncher::new(&program)),
    );
    let handle = fx.executor.execute(task);

    assert_eq!(handle.wait().await, TaskState::Failed);
    let error = handle.snapshot().error.unwrap_or_default();
    assert!(error.starts_with("unable to start build worker"), "{error}");
    assert!(error.contains("quarry-worker"), "{error}");
    assert!(fx.server.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finished_job_records_build() {
    let fx = Fixture::start().await;
    let handle = fx.build(Arc::new(|client| {
        client.description("Compiling modules");
        client.set_status("Build module: core: ");
        client.set_progress(50);
        client.error("Build warnings. Total warnings: 1");
        client.finished().unwrap();
    }));

    assert_eq!(handle.wait().await, TaskState::Finished);
    assert_eq!(handle.snapshot().percent, 100);

    let wc = fx.working_copy();
    let record = state::load_at(fx.home.path(), &wc.repository, wc.branch, &wc.version).unwrap();
    assert_eq!(record.branch, BranchKind::Development);
    assert_eq!(record.built_revision, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_job_carries_the_worker_cause() {
    let fx = Fixture::start().await;
    let handle = fx.build(Arc::new(|client| {
        client
            .failed("Build failed. Total errors: 2, total warnings: 0")
            .unwrap();
    }));

    assert_eq!(handle.wait().await, TaskState::Failed);
    assert_eq!(
        handle.snapshot().error.as_deref(),
        Some("Build failed. Total errors: 2, total warnings: 0")
    );
    let wc = fx.working_copy();
    assert!(state::load_at(fx.home.path(), &wc.repository, wc.branch, &wc.version).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_the_first_terminal_signal_counts() {
    let fx = Fixture::start().await;
    let handle = fx.build(Arc::new(|client| {
        client.finished().unwrap();
        client.failed("too late").unwrap();
        assert!(client.is_terminated());
    }));

    assert_eq!(handle.wait().await, TaskState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_waits_while_task_is_paused() {
    let fx = Fixture::start().await;
    let saw_pause = Arc::new(AtomicBool::new(false));
    let flag = saw_pause.clone();
    let handle = fx.build(Arc::new(move |client| {
        for _ in 0..200 {
            if client.is_paused() {
                flag.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        client.wait_while_paused();
        client.finished().unwrap();
    }));

    assert!(handle.pause());
    for _ in 0..200 {
        if saw_pause.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_pause.load(Ordering::SeqCst));
    handle.resume();

    assert_eq!(handle.wait().await, TaskState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_stops_the_worker() {
    let fx = Fixture::start().await;
    let handle = fx.build(Arc::new(|client| {
        client.set_progress(10);
        thread::sleep(Duration::from_millis(500));
    }));

    for _ in 0..200 {
        if handle.snapshot().percent == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.cancel();

    assert_eq!(handle.wait().await, TaskState::Cancelled);
    assert!(fx.killed.load(Ordering::SeqCst));
}
