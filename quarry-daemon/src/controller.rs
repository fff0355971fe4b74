//! Controller side of a build job: spawn the worker, mirror its reports into
//! the task, classify how it ended.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::Serialize;

use quarry_core::{state, BuildJob, Config, JobId, WorkingCopy};
use quarry_sync::pipeline::{self, Target};
use quarry_sync::status::local_revision;
use quarry_sync::{SyncError, Vcs};
use quarry_task::{GroupTask, Task, TaskContext, TaskError, TaskOutcome};

use crate::error::DaemonError;
use crate::server::{JobRegistry, NotifierEvent};

/// Worker executable name looked up next to the running binary.
pub const WORKER_BINARY: &str = "quarry-worker";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// 1. Worker processes
// ---------------------------------------------------------------------------

/// A running worker, polled without blocking.
pub trait WorkerProcess: Send {
    /// True once the process has exited.
    fn has_exited(&mut self) -> std::io::Result<bool>;

    fn kill(&mut self) -> std::io::Result<()>;
}

impl WorkerProcess for Child {
    fn has_exited(&mut self) -> std::io::Result<bool> {
        Ok(self.try_wait()?.is_some())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self)?;
        let _ = self.wait();
        Ok(())
    }
}

/// Starts one worker per build job.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, job: &BuildJob) -> Result<Box<dyn WorkerProcess>, DaemonError>;
}

/// Runs the worker binary with `<job-id> <path> <1|0>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The configured worker program, else `quarry-worker` beside the current executable.
    pub fn from_config(config: &Config) -> Self {
        if let Some(program) = &config.worker_program {
            return Self::new(program);
        }
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
            .filter(|path| path.exists());
        Self::new(sibling.unwrap_or_else(|| PathBuf::from(WORKER_BINARY)))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, job: &BuildJob) -> Result<Box<dyn WorkerProcess>, DaemonError> {
        let child = Command::new(&self.program)
            .args(job.worker_args())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| DaemonError::WorkerSpawn {
                program: self.program.clone(),
                source,
            })?;
        tracing::info!(
            job = %job.job_id,
            pid = child.id(),
            program = %self.program.display(),
            "build worker started",
        );
        Ok(Box::new(child))
    }
}

// ---------------------------------------------------------------------------
// 2. Build task
// ---------------------------------------------------------------------------

/// Result of a job whose worker reported `finished`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub job_id: Option<JobId>,
    /// Non-fatal problems the worker reported through `error`.
    pub warnings: Vec<String>,
}

/// Builds one working copy in a separate worker process.
pub struct BuildTask {
    home: PathBuf,
    vcs: Vcs,
    working_copy: WorkingCopy,
    clean: bool,
    registry: JobRegistry,
    launcher: Arc<dyn WorkerLauncher>,
    poll_interval: Duration,
}

impl BuildTask {
    pub fn new(
        home: impl Into<PathBuf>,
        vcs: Vcs,
        working_copy: WorkingCopy,
        clean: bool,
        registry: JobRegistry,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            home: home.into(),
            vcs,
            working_copy,
            clean,
            registry,
            launcher,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn supervise(
        &self,
        job: JobId,
        events: &Receiver<NotifierEvent>,
        worker: &mut dyn WorkerProcess,
        ctx: &TaskContext,
    ) -> Result<BuildReport, TaskError> {
        let mut mirror = Mirror::new(job);

        loop {
            if ctx.is_cancelled() {
                tracing::warn!(job = %job, "build cancelled, stopping worker");
                if let Err(err) = worker.kill() {
                    tracing::warn!(job = %job, error = %err, "unable to stop build worker");
                }
                return Err(TaskError::Cancelled);
            }

            if let Some(result) = mirror.drain(events, ctx) {
                reap(worker, job);
                return result;
            }

            let exited = worker.has_exited().map_err(TaskError::from_error)?;
            if exited {
                // Reports sent just before exit are already queued.
                if let Some(result) = mirror.drain(events, ctx) {
                    return result;
                }
                tracing::error!(job = %job, "build worker exited without a result");
                return Err(TaskError::from_error(DaemonError::WorkerUnreachable { job }));
            }

            sleep(self.poll_interval);
        }
    }
}

impl Task for BuildTask {
    type Output = BuildReport;

    fn title(&self) -> String {
        format!("Build working copy: {}", self.working_copy.local_path.display())
    }

    fn pausable(&self) -> bool {
        true
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<BuildReport, TaskError> {
        ctx.check_cancelled()?;
        ctx.set_progress(0, "Starting build worker");

        let job = BuildJob::new(&self.working_copy.local_path, self.clean);
        let pause_ctx = ctx.clone();
        let events = self
            .registry
            .register(job.job_id, Arc::new(move || pause_ctx.is_paused()));

        let result = match self.launcher.launch(&job) {
            Ok(mut worker) => self.supervise(job.job_id, &events, &mut *worker, ctx),
            Err(err) => Err(TaskError::from_error(err)),
        };
        self.registry.unregister(job.job_id);
        result
    }

    fn finished(&mut self, outcome: &TaskOutcome<BuildReport>) {
        if !matches!(outcome, TaskOutcome::Finished(_)) {
            return;
        }
        let wc = &self.working_copy;
        let revision = local_revision(&self.vcs, &wc.local_path);
        let recorded = state::load_or_new_at(&self.home, &wc.repository, wc.branch, &wc.version)
            .and_then(|mut record| {
                record.built_revision = revision;
                state::save_at(&self.home, &mut record)
            });
        match recorded {
            Ok(()) => tracing::info!(
                path = %wc.local_path.display(),
                revision = ?revision,
                "build recorded",
            ),
            Err(err) => tracing::error!(
                path = %wc.local_path.display(),
                error = %err,
                "unable to record built revision",
            ),
        }
    }
}

/// Task-side view of the worker's reports.
struct Mirror {
    job: JobId,
    percent: u8,
    status: String,
    warnings: Vec<String>,
}

impl Mirror {
    fn new(job: JobId) -> Self {
        Self {
            job,
            percent: 0,
            status: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Apply queued events; `Some` once a terminal signal arrived.
    fn drain(
        &mut self,
        events: &Receiver<NotifierEvent>,
        ctx: &TaskContext,
    ) -> Option<Result<BuildReport, TaskError>> {
        loop {
            let event = match events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            };
            match event {
                NotifierEvent::Attached => {
                    tracing::debug!(job = %self.job, "build worker attached");
                }
                NotifierEvent::Description(text) | NotifierEvent::Status(text) => {
                    self.status = text;
                    ctx.set_progress(self.percent, &self.status);
                }
                NotifierEvent::Progress(percent) => {
                    self.percent = percent;
                    ctx.set_progress(self.percent, &self.status);
                }
                NotifierEvent::Error(cause) => {
                    tracing::warn!(job = %self.job, "build worker reported: {cause}");
                    self.warnings.push(cause);
                }
                NotifierEvent::Failed(cause) => {
                    tracing::error!(job = %self.job, "build failed: {cause}");
                    return Some(Err(TaskError::failed(cause)));
                }
                NotifierEvent::Finished => {
                    ctx.set_progress(100, "Built");
                    return Some(Ok(BuildReport {
                        job_id: Some(self.job),
                        warnings: std::mem::take(&mut self.warnings),
                    }));
                }
            }
        }
    }
}

/// Give a worker that already reported a result a moment to exit.
fn reap(worker: &mut dyn WorkerProcess, job: JobId) {
    let deadline = Instant::now() + REAP_TIMEOUT;
    while Instant::now() < deadline {
        match worker.has_exited() {
            Ok(true) | Err(_) => return,
            Ok(false) => sleep(POLL_INTERVAL),
        }
    }
    tracing::debug!(job = %job, "build worker still running after reporting");
}

// ---------------------------------------------------------------------------
// 3. Task construction
// ---------------------------------------------------------------------------

/// Shared collaborators for build and refresh tasks.
#[derive(Clone)]
pub struct BuildContext {
    pub home: PathBuf,
    pub registry: JobRegistry,
    pub launcher: Arc<dyn WorkerLauncher>,
}

pub fn build_task(
    ctx: &BuildContext,
    config: &Config,
    vcs: &Vcs,
    target: &Target,
    clean: bool,
) -> Result<BuildTask, SyncError> {
    let (vcs, wc) = pipeline::resolve(config, vcs, target)?;
    Ok(BuildTask::new(
        &ctx.home,
        vcs,
        wc,
        clean,
        ctx.registry.clone(),
        ctx.launcher.clone(),
    ))
}

/// Update then build; the build never starts if the update did not finish.
pub fn refresh_task(
    ctx: &BuildContext,
    config: &Config,
    vcs: &Vcs,
    target: &Target,
    clean: bool,
) -> Result<GroupTask, SyncError> {
    let update = pipeline::update_task(&ctx.home, config, vcs, target)?;
    let build = build_task(ctx, config, vcs, target, clean)?;
    Ok(GroupTask::new(format!(
        "Refresh {} {}",
        target.repository, target.version
    ))
    .with(update)
    .with(build))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorded(Arc<Mutex<Vec<(u8, String)>>>);

    fn recording_ctx() -> (TaskContext, Recorded) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = TaskContext::new(
            Arc::new(quarry_task::TaskControl::new(true)),
            Arc::new(move |percent: u8, status: &str| {
                sink.lock().unwrap().push((percent, status.to_string()))
            }),
        );
        (ctx, Recorded(seen))
    }

    #[test]
    fn mirror_pairs_status_with_progress() {
        let (ctx, seen) = recording_ctx();
        let (tx, rx) = std::sync::mpsc::channel();
        let job = JobId::new();
        tx.send(NotifierEvent::Description("Compiling".into())).unwrap();
        tx.send(NotifierEvent::Progress(40)).unwrap();
        tx.send(NotifierEvent::Error("deprecated call".into())).unwrap();

        let mut mirror = Mirror::new(job);
        assert!(mirror.drain(&rx, &ctx).is_none());
        assert_eq!(
            seen.0.lock().unwrap().as_slice(),
            [(0, "Compiling".to_string()), (40, "Compiling".to_string())]
        );

        tx.send(NotifierEvent::Finished).unwrap();
        let report = mirror.drain(&rx, &ctx).unwrap().unwrap();
        assert_eq!(report.warnings, ["deprecated call"]);
        assert_eq!(report.job_id, Some(job));
    }

    #[test]
    fn mirror_turns_failed_into_task_error() {
        let (ctx, _) = recording_ctx();
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(NotifierEvent::Failed("Build failed. Total errors: 1, total warnings: 0".into()))
            .unwrap();
        let err = Mirror::new(JobId::new()).drain(&rx, &ctx).unwrap().unwrap_err();
        assert!(err.to_string().starts_with("Build failed"));
    }

    #[test]
    fn configured_worker_program_wins() {
        let home = tempfile::TempDir::new().unwrap();
        let mut config = Config::default_at(home.path());
        config.worker_program = Some(PathBuf::from("/opt/quarry/bin/quarry-worker"));
        let launcher = ProcessLauncher::from_config(&config);
        assert_eq!(launcher.program(), Path::new("/opt/quarry/bin/quarry-worker"));
    }
}
