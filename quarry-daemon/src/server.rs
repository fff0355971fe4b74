use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use quarry_core::paths::{run_dir, socket_path};
use quarry_core::JobId;

use crate::error::{io_err, DaemonError};
use crate::protocol::{NotifierRequest, NotifierResponse};

/// Answers `is_paused` for one job.
pub type PauseCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// What a worker reported, in arrival order per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    Attached,
    Description(String),
    Status(String),
    Progress(u8),
    Error(String),
    Failed(String),
    Finished,
}

impl NotifierEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotifierEvent::Failed(_) | NotifierEvent::Finished)
    }
}

struct JobEntry {
    events: mpsc::Sender<NotifierEvent>,
    paused: PauseCheck,
    terminal_seen: bool,
}

// ---------------------------------------------------------------------------
// 1. Job registry
// ---------------------------------------------------------------------------

/// Jobs the controller currently accepts reports for.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept reports for `job`; events arrive on the returned receiver.
    pub fn register(&self, job: JobId, paused: PauseCheck) -> mpsc::Receiver<NotifierEvent> {
        let (events, receiver) = mpsc::channel();
        self.lock().insert(
            job,
            JobEntry {
                events,
                paused,
                terminal_seen: false,
            },
        );
        tracing::debug!(job = %job, "job registered with notifier");
        receiver
    }

    pub fn unregister(&self, job: JobId) {
        if self.lock().remove(&job).is_some() {
            tracing::debug!(job = %job, "job unregistered from notifier");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply one request. Unknown jobs are rejected; the first terminal
    /// signal per job is forwarded and later ones are acknowledged only.
    pub fn dispatch(&self, request: NotifierRequest) -> NotifierResponse {
        let Some(job) = request.job() else {
            return NotifierResponse::ok(json!({ "running": true, "jobs": self.len() }));
        };

        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(&job) else {
            tracing::warn!(job = %job, "notifier request for unknown job");
            return NotifierResponse::error(format!("unknown job '{job}'"));
        };

        let event = match request {
            NotifierRequest::IsPaused { .. } => {
                let is_paused = entry.paused.clone();
                drop(jobs);
                return NotifierResponse::ok(json!(is_paused()));
            }
            NotifierRequest::Attach { .. } => NotifierEvent::Attached,
            NotifierRequest::Description { text, .. } => NotifierEvent::Description(text),
            NotifierRequest::SetStatus { text, .. } => NotifierEvent::Status(text),
            NotifierRequest::SetProgress { percent, .. } => NotifierEvent::Progress(percent.min(100)),
            NotifierRequest::Error { cause, .. } => NotifierEvent::Error(cause),
            NotifierRequest::Failed { cause, .. } => NotifierEvent::Failed(cause),
            NotifierRequest::Finished { .. } => NotifierEvent::Finished,
            NotifierRequest::Status => return NotifierResponse::empty(),
        };

        if event.is_terminal() {
            if entry.terminal_seen {
                tracing::debug!(job = %job, "ignoring repeated terminal signal");
                return NotifierResponse::empty();
            }
            entry.terminal_seen = true;
        }
        if entry.events.send(event).is_err() {
            tracing::debug!(job = %job, "job receiver dropped, event discarded");
        }
        NotifierResponse::empty()
    }
}

// ---------------------------------------------------------------------------
// 2. Socket server
// ---------------------------------------------------------------------------

/// Controller-side notifier endpoint at `<home>/.quarry/run/build-notifier.sock`.
pub struct NotifierServer {
    socket: PathBuf,
    registry: JobRegistry,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<Result<(), DaemonError>>,
}

impl NotifierServer {
    /// Bind the socket and start accepting clients on the current runtime.
    pub async fn start(home: &Path, registry: JobRegistry) -> Result<Self, DaemonError> {
        let run = run_dir(home);
        if !run.exists() {
            fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
        }

        let socket = socket_path(home);
        prepare_socket_for_bind(&socket)?;
        let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
        set_socket_permissions(&socket)?;
        tracing::info!(socket = %socket.display(), "build notifier listening");

        let (shutdown, _) = broadcast::channel::<()>(4);
        let handle = tokio::spawn(accept_loop(
            listener,
            socket.clone(),
            registry.clone(),
            shutdown.subscribe(),
        ));

        Ok(Self {
            socket,
            registry,
            shutdown,
            handle,
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Stop accepting clients and remove the socket file.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        let _ = self.shutdown.send(());
        handle_join("notifier_server", self.handle.await)
    }
}

async fn accept_loop(
    listener: UnixListener,
    socket: PathBuf,
    registry: JobRegistry,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, registry).await {
                        tracing::error!(error = %err, "notifier client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_client(stream: UnixStream, registry: JobRegistry) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("notifier socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<NotifierRequest>(&line) {
            Ok(request) => registry.dispatch(request),
            Err(err) => NotifierResponse::error(format!("invalid request JSON: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &NotifierResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("notifier socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("notifier socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("notifier socket flush", e))?;
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "notifier socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale notifier socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

/// Install the `fmt` subscriber used by the `quarry` and `quarry-worker` binaries.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn never_paused() -> PauseCheck {
        Arc::new(|| false)
    }

    #[test]
    fn unknown_job_is_rejected() {
        let registry = JobRegistry::new();
        let response = registry.dispatch(NotifierRequest::Finished { job: JobId::new() });
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("unknown job"));
    }

    #[test]
    fn first_terminal_signal_wins() {
        let registry = JobRegistry::new();
        let job = JobId::new();
        let events = registry.register(job, never_paused());

        registry.dispatch(NotifierRequest::SetProgress { job, percent: 140 });
        registry.dispatch(NotifierRequest::Failed {
            job,
            cause: "boom".into(),
        });
        let late = registry.dispatch(NotifierRequest::Finished { job });
        assert!(late.ok);

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            [
                NotifierEvent::Progress(100),
                NotifierEvent::Failed("boom".into()),
            ]
        );
    }

    #[test]
    fn pause_check_answers_is_paused() {
        let registry = JobRegistry::new();
        let job = JobId::new();
        let paused = Arc::new(AtomicBool::new(false));
        let flag = paused.clone();
        let _events = registry.register(job, Arc::new(move || flag.load(Ordering::SeqCst)));

        let answer = |r: NotifierResponse| r.data.and_then(|d| d.as_bool());
        assert_eq!(answer(registry.dispatch(NotifierRequest::IsPaused { job })), Some(false));
        paused.store(true, Ordering::SeqCst);
        assert_eq!(answer(registry.dispatch(NotifierRequest::IsPaused { job })), Some(true));
    }

    #[test]
    fn unregistered_job_is_unknown_again() {
        let registry = JobRegistry::new();
        let job = JobId::new();
        let _events = registry.register(job, never_paused());
        assert_eq!(registry.len(), 1);
        registry.unregister(job);
        assert!(registry.is_empty());
        assert!(!registry.dispatch(NotifierRequest::Attach { job }).ok);
    }

    #[test]
    fn stale_socket_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("stale.sock");
        fs::write(&socket, "").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_answers_status_and_removes_socket() {
        let home = TempDir::new().unwrap();
        let server = NotifierServer::start(home.path(), JobRegistry::new())
            .await
            .unwrap();
        let socket = server.socket().to_path_buf();
        assert!(socket.exists());

        let home_path = home.path().to_path_buf();
        let status = tokio::task::spawn_blocking(move || crate::protocol::request_status(&home_path))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status["jobs"], 0);

        server.shutdown().await.unwrap();
        assert!(!socket.exists());
    }
}
