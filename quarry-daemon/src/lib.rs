//! Build notifier: the wire protocol a worker process reports through, the
//! controller-side socket server, and the task that drives one build job.

pub mod controller;
mod error;
pub mod protocol;
pub mod server;

pub use controller::{
    build_task, refresh_task, BuildContext, BuildReport, BuildTask, ProcessLauncher,
    WorkerLauncher, WorkerProcess,
};
pub use error::DaemonError;
pub use protocol::{request_status, send_request, NotifierClient, NotifierRequest, NotifierResponse};
pub use server::{init_tracing, JobRegistry, NotifierEvent, NotifierServer, PauseCheck};
