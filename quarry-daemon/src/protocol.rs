//! Build notifier wire format and the blocking worker-side client.
//!
//! One JSON object per line in each direction:
//! `{"cmd":"set_progress","job":"<uuid>","percent":40}` →
//! `{"ok":true,"data":null}`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quarry_core::paths::socket_path;
use quarry_core::JobId;

use crate::error::{io_err, DaemonError};

/// Attempts for `attach`, `failed`, `finished` and `status`.
pub const DELIVERY_ATTEMPTS: usize = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(100);
/// Interval between `is_paused` polls while the job is paused.
pub const PAUSE_POLL: Duration = Duration::from_millis(250);

/// Newline-delimited request, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum NotifierRequest {
    Attach { job: JobId },
    Description { job: JobId, text: String },
    SetStatus { job: JobId, text: String },
    SetProgress { job: JobId, percent: u8 },
    IsPaused { job: JobId },
    Error { job: JobId, cause: String },
    Failed { job: JobId, cause: String },
    Finished { job: JobId },
    /// Server liveness and registered job count.
    Status,
}

impl NotifierRequest {
    pub fn job(&self) -> Option<JobId> {
        match self {
            NotifierRequest::Attach { job }
            | NotifierRequest::Description { job, .. }
            | NotifierRequest::SetStatus { job, .. }
            | NotifierRequest::SetProgress { job, .. }
            | NotifierRequest::IsPaused { job }
            | NotifierRequest::Error { job, .. }
            | NotifierRequest::Failed { job, .. }
            | NotifierRequest::Finished { job } => Some(*job),
            NotifierRequest::Status => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotifierRequest::Failed { .. } | NotifierRequest::Finished { .. }
        )
    }
}

/// Newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierResponse {
    pub ok: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifierResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Send one request to the notifier socket and return one response.
pub fn send_request(home: &Path, request: &NotifierRequest) -> Result<NotifierResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::NotifierNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::NotifierNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "notifier closed connection before responding".to_string(),
        ));
    }

    let response: NotifierResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Send with up to [`DELIVERY_ATTEMPTS`] tries while the notifier is unreachable.
fn send_with_retry(home: &Path, request: &NotifierRequest) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..DELIVERY_ATTEMPTS {
        match send_request(home, request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::NotifierNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt + 1 < DELIVERY_ATTEMPTS {
                    sleep(RETRY_DELAY);
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("notifier retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    send_with_retry(home, &NotifierRequest::Status)
}

fn response_into_data(response: NotifierResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown notifier error".to_string()),
        ))
    }
}

// ---------------------------------------------------------------------------
// Worker-side client
// ---------------------------------------------------------------------------

/// Job-scoped handle a worker process reports through.
///
/// Progress calls are fire-and-forget. Exactly one of [`finished`] or
/// [`failed`] is delivered per client; later terminal calls are no-ops.
///
/// [`finished`]: NotifierClient::finished
/// [`failed`]: NotifierClient::failed
#[derive(Debug)]
pub struct NotifierClient {
    home: PathBuf,
    job: JobId,
    terminal_sent: AtomicBool,
}

impl NotifierClient {
    /// Look up the notifier and register this process for `job`.
    ///
    /// Fails if the endpoint cannot be reached or the job is unknown to it.
    pub fn attach(home: impl Into<PathBuf>, job: JobId) -> Result<Self, DaemonError> {
        let home = home.into();
        send_with_retry(&home, &NotifierRequest::Attach { job })?;
        tracing::debug!(job = %job, "attached to build notifier");
        Ok(Self {
            home,
            job,
            terminal_sent: AtomicBool::new(false),
        })
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn description(&self, text: impl Into<String>) {
        self.notify(NotifierRequest::Description {
            job: self.job,
            text: text.into(),
        });
    }

    pub fn set_status(&self, text: impl Into<String>) {
        self.notify(NotifierRequest::SetStatus {
            job: self.job,
            text: text.into(),
        });
    }

    pub fn set_progress(&self, percent: u8) {
        self.notify(NotifierRequest::SetProgress {
            job: self.job,
            percent: percent.min(100),
        });
    }

    /// Non-fatal problem; the build continues.
    pub fn error(&self, cause: impl Into<String>) {
        self.notify(NotifierRequest::Error {
            job: self.job,
            cause: cause.into(),
        });
    }

    /// False when the controller cannot be asked.
    pub fn is_paused(&self) -> bool {
        match send_request(&self.home, &NotifierRequest::IsPaused { job: self.job })
            .and_then(response_into_data)
        {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                tracing::debug!(job = %self.job, error = %err, "pause query failed");
                false
            }
        }
    }

    /// Block while the controller reports the job as paused.
    pub fn wait_while_paused(&self) {
        let mut announced = false;
        while self.is_paused() {
            if !announced {
                tracing::info!(job = %self.job, "build paused");
                announced = true;
            }
            sleep(PAUSE_POLL);
        }
        if announced {
            tracing::info!(job = %self.job, "build resumed");
        }
    }

    pub fn finished(&self) -> Result<(), DaemonError> {
        self.terminal(NotifierRequest::Finished { job: self.job })
    }

    pub fn failed(&self, cause: impl Into<String>) -> Result<(), DaemonError> {
        self.terminal(NotifierRequest::Failed {
            job: self.job,
            cause: cause.into(),
        })
    }

    /// True once a terminal signal has been handed to the transport.
    pub fn is_terminated(&self) -> bool {
        self.terminal_sent.load(Ordering::SeqCst)
    }

    fn notify(&self, request: NotifierRequest) {
        if let Err(err) = send_request(&self.home, &request).and_then(response_into_data) {
            tracing::debug!(job = %self.job, error = %err, "notifier update dropped");
        }
    }

    fn terminal(&self, request: NotifierRequest) -> Result<(), DaemonError> {
        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            tracing::debug!(job = %self.job, "terminal signal already sent");
            return Ok(());
        }
        send_with_retry(&self.home, &request).map(|_| ())
    }
}
