//! One build job inside the worker process.

use std::panic;
use std::sync::Arc;

use quarry_core::BuildJob;
use quarry_daemon::{DaemonError, NotifierClient};

use crate::compiler::{BuildAction, ModuleCompiler};
use crate::enumerate::enumerate;
use crate::error::BuildError;
use crate::model::Branch;
use crate::problems::{BuildOutcome, ProblemHandler};
use crate::progress::{ModuleProgress, Reporter};

/// Load the branch at the job's source path, enumerate what to compile and
/// run the compiler over it.
pub fn run_job(
    job: &BuildJob,
    reporter: &dyn Reporter,
    compiler: &mut dyn ModuleCompiler,
) -> Result<BuildOutcome, BuildError> {
    tracing::info!(job = %job.job_id, path = %job.source_path.display(), clean = job.clean, "build started");

    reporter.description("Load definitions...");
    let branch = Branch::load(&job.source_path)?;
    let plan = enumerate(&branch, job.environments());

    reporter.description(if job.clean { "Clean and build" } else { "Build" });
    let mut progress = ModuleProgress::new(reporter, plan.progress_denominator());
    let mut problems = ProblemHandler::default();
    compiler.execute(
        &branch,
        &plan,
        BuildAction::from_clean_flag(job.clean),
        &mut progress,
        &mut problems,
    )?;

    tracing::info!(
        job = %job.job_id,
        modules = progress.built(),
        errors = problems.errors_count(),
        warnings = problems.warnings_count(),
        "build completed",
    );
    Ok(problems.outcome())
}

/// Deliver the terminal signal for a job result.
pub fn report(
    reporter: &dyn Reporter,
    result: Result<BuildOutcome, BuildError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(BuildOutcome::Clean) => reporter.finished(),
        Ok(BuildOutcome::Warnings(summary)) => {
            reporter.error(&summary);
            reporter.finished()
        }
        Ok(BuildOutcome::Failed(summary)) => reporter.failed(&summary),
        Err(err) => {
            tracing::error!(error = %err, "build aborted");
            reporter.failed(&err.to_string())
        }
    }
}

/// Report panics as `failed` before the default hook runs.
pub fn install_fault_handler(client: Arc<NotifierClient>) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let cause = match info.location() {
            Some(at) => format!("worker panicked at {at}: {message}"),
            None => format!("worker panicked: {message}"),
        };
        if let Err(err) = client.failed(cause) {
            tracing::error!(error = %err, "could not report worker panic");
        }
        previous(info);
    }));
}
