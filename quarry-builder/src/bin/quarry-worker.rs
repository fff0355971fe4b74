//! `quarry-worker <job-id> <source-path> <1|0>`
//!
//! Spawned by the controller for one build job; everything it has to say
//! goes through the build notifier.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use quarry_builder::{install_fault_handler, report, run_job, CommandCompiler};
use quarry_core::BuildJob;
use quarry_daemon::{init_tracing, NotifierClient};

const USAGE: &str = "usage: quarry-worker <job-id> <source-path> <1|0>";

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(job) = BuildJob::from_worker_args(&args) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match run(job) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(job: BuildJob) -> Result<()> {
    let home = quarry_core::home()?;
    let client = Arc::new(
        NotifierClient::attach(&home, job.job_id).context("build notifier unreachable")?,
    );
    install_fault_handler(Arc::clone(&client));

    let result = CommandCompiler::from_root(&job.source_path)
        .and_then(|mut compiler| run_job(&job, client.as_ref(), &mut compiler));
    report(client.as_ref(), result).context("failed to deliver build result")?;
    Ok(())
}
