//! `quarry notifier status`

use anyhow::{Context, Result};
use clap::Subcommand;

use quarry_core::paths::socket_path;
use quarry_daemon::{request_status, DaemonError};

#[derive(Subcommand, Debug)]
pub enum NotifierCommand {
    /// Query the build notifier of a running build.
    Status,
}

pub fn run(command: NotifierCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        NotifierCommand::Status => {
            let status = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::NotifierNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query build notifier"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render notifier status JSON")?
            );
        }
    }
    Ok(())
}
