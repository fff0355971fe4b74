//! Running one task to completion on a local executor, rendering its
//! snapshot stream and turning Ctrl-C into cancellation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use tokio::runtime::Runtime;

use quarry_core::Config;
use quarry_daemon::{BuildContext, JobRegistry, NotifierServer, ProcessLauncher};
use quarry_sync::Vcs;
use quarry_task::{Task, TaskExecutor, TaskSnapshot, TaskState};

/// Everything a task command needs: home, config, VCS facade and a runtime.
pub struct Session {
    pub home: PathBuf,
    pub config: Config,
    pub vcs: Vcs,
    runtime: Runtime,
}

impl Session {
    pub fn open() -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = Config::load_at(&home).context("failed to load config")?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        Ok(Self {
            home,
            config,
            vcs: Vcs::svn(None),
            runtime,
        })
    }

    pub fn run<T: Task>(&self, task: T) -> Result<()> {
        self.runtime.block_on(self.drive(task))
    }

    /// Start the build notifier for the duration of one task built by `make`.
    pub fn run_with_notifier<T, F>(&self, make: F) -> Result<()>
    where
        T: Task,
        F: FnOnce(&BuildContext) -> Result<T>,
    {
        self.runtime.block_on(async {
            let server = NotifierServer::start(&self.home, JobRegistry::new())
                .await
                .context("failed to start build notifier")?;
            let ctx = BuildContext {
                home: self.home.clone(),
                registry: server.registry().clone(),
                launcher: Arc::new(ProcessLauncher::from_config(&self.config)),
            };

            let result = match make(&ctx) {
                Ok(task) => self.drive(task).await,
                Err(err) => Err(err),
            };
            if let Err(err) = server.shutdown().await {
                tracing::warn!(error = %err, "build notifier did not shut down cleanly");
            }
            result
        })
    }

    async fn drive<T: Task>(&self, task: T) -> Result<()> {
        let executor = TaskExecutor::new(self.config.max_parallel_tasks)
            .context("failed to start task executor")?;
        let handle = executor.execute(task);
        let mut snapshots = handle.subscribe();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut cancelling = false;
        let mut line = ProgressLine::default();

        let last = loop {
            let snapshot = snapshots.borrow_and_update().clone();
            line.render(&snapshot);
            if snapshot.state.is_terminal() {
                break snapshot;
            }

            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break handle.snapshot();
                    }
                }
                _ = &mut ctrl_c, if !cancelling => {
                    cancelling = true;
                    eprintln!("{}", "cancelling...".yellow());
                    handle.cancel();
                }
            }
        };

        finish(last)
    }
}

fn finish(snapshot: TaskSnapshot) -> Result<()> {
    match snapshot.state {
        TaskState::Finished => {
            println!("{} {}", "✓".green(), snapshot.title);
            Ok(())
        }
        // Cancellation exits 0.
        TaskState::Cancelled => {
            println!("{} {} cancelled", "■".yellow(), snapshot.title);
            Ok(())
        }
        _ => Err(anyhow!(
            "{} failed: {}",
            snapshot.title,
            snapshot.error.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}

/// Prints a line whenever percent, status or pause state changes.
#[derive(Default)]
struct ProgressLine {
    last: Option<(u8, String, bool)>,
}

impl ProgressLine {
    fn render(&mut self, snapshot: &TaskSnapshot) {
        if snapshot.state != TaskState::Running {
            return;
        }
        let current = (snapshot.percent, snapshot.status.clone(), snapshot.paused);
        if self.last.as_ref() == Some(&current) {
            return;
        }
        let paused = if snapshot.paused {
            " (paused)".bright_black().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {}{}",
            format!("[{:>3}%]", snapshot.percent).cyan(),
            snapshot.status,
            paused
        );
        self.last = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: TaskState, error: Option<&str>) -> TaskSnapshot {
        TaskSnapshot {
            title: "Update working copy".to_string(),
            state,
            percent: 40,
            status: "Updating: src/a.txt".to_string(),
            paused: false,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn cancelled_task_exits_cleanly() {
        assert!(finish(snapshot(TaskState::Cancelled, None)).is_ok());
        assert!(finish(snapshot(TaskState::Finished, None)).is_ok());
    }

    #[test]
    fn failed_task_carries_its_error() {
        let err = finish(snapshot(TaskState::Failed, Some("disk full"))).unwrap_err();
        assert_eq!(err.to_string(), "Update working copy failed: disk full");

        let err = finish(snapshot(TaskState::Failed, None)).unwrap_err();
        assert!(err.to_string().ends_with("unknown error"));
    }
}
