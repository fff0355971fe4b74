//! `quarry status` — every persisted working copy with its on-disk status.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use quarry_core::{state, Config, SyncStatus, WorkingCopyState};
use quarry_sync::status::{derive_status, local_revision_label};
use quarry_sync::Vcs;

/// Arguments for `quarry status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let rows = collect(&home, &Vcs::svn(None))?;
        if self.json {
            print_json(&rows)?;
        } else {
            print_table(rows);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct WorkingCopyRow {
    repository: String,
    branch: String,
    version: String,
    status: SyncStatus,
    loaded: bool,
    local_revision: Option<String>,
    built_revision: Option<u64>,
    path: Option<String>,
}

#[derive(Serialize)]
struct StatusJson<'a> {
    summary: SummaryJson,
    working_copies: &'a [WorkingCopyRow],
}

#[derive(Serialize)]
struct SummaryJson {
    working_copies: usize,
    successful: usize,
    loaded: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "loaded")]
    loaded: String,
    #[tabled(rename = "local revision")]
    local_revision: String,
    #[tabled(rename = "built revision")]
    built_revision: String,
}

/// Status is derived from disk when the repository is still configured;
/// otherwise the persisted value is shown.
fn collect(home: &Path, vcs: &Vcs) -> Result<Vec<WorkingCopyRow>> {
    let config = Config::load_at(home).context("failed to load config")?;
    let records = state::list_at(home).context("failed to read working-copy state")?;

    Ok(records
        .into_iter()
        .map(|record| row(&config, vcs, record))
        .collect())
}

fn row(config: &Config, vcs: &Vcs, record: WorkingCopyState) -> WorkingCopyRow {
    let resolved = config
        .working_copy(&record.repository, record.branch, &record.version)
        .ok();
    let (status, local_revision, path) = match &resolved {
        Some(wc) => {
            let status = derive_status(vcs, &wc.local_path);
            let label = local_revision_label(vcs, &wc.local_path, status);
            (status, label, Some(wc.local_path.display().to_string()))
        }
        None => (record.status, None, None),
    };

    WorkingCopyRow {
        repository: record.repository.0,
        branch: record.branch.to_string(),
        version: record.version.0,
        status,
        loaded: record.loaded,
        local_revision,
        built_revision: record.built_revision,
        path,
    }
}

fn print_json(rows: &[WorkingCopyRow]) -> Result<()> {
    let payload = StatusJson {
        summary: SummaryJson {
            working_copies: rows.len(),
            successful: rows
                .iter()
                .filter(|r| r.status == SyncStatus::Successful)
                .count(),
            loaded: rows.iter().filter(|r| r.loaded).count(),
        },
        working_copies: rows,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: Vec<WorkingCopyRow>) {
    println!(
        "Quarry v{} | {} working copies",
        env!("CARGO_PKG_VERSION"),
        rows.len()
    );
    if rows.is_empty() {
        println!("No working copies.");
        println!("Run: quarry update <repo> <version>");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            repository: row.repository,
            version: row.version,
            status: status_label(row.status),
            loaded: if row.loaded { "yes" } else { "no" }.to_string(),
            local_revision: row.local_revision.unwrap_or_else(|| "-".to_string()),
            built_revision: row
                .built_revision
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn status_label(status: SyncStatus) -> String {
    let label = status.to_string();
    match status {
        SyncStatus::Successful => label.green().to_string(),
        SyncStatus::Interrupted => label.yellow().to_string(),
        SyncStatus::Invalid => label.red().to_string(),
        SyncStatus::Absent => label.bright_black().to_string(),
    }
}
