//! Quarry — working-copy synchronization and build orchestration CLI.
//!
//! # Usage
//!
//! ```text
//! quarry repo list
//! quarry repo add <name> <url> [--username <u> --password <p>]
//! quarry branches <repo> [--versions]
//! quarry status [--json]
//! quarry update <repo> <version> [--branch dev|releases]
//! quarry build <repo> <version> [--clean] [--branch ...]
//! quarry refresh <repo> <version> [--clean] [--branch ...]
//! quarry delete <repo> <version> [--branch ...]
//! quarry notifier status
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    branches::BranchesArgs,
    notifier::NotifierCommand,
    repo::RepoCommand,
    status::StatusArgs,
    tasks::{BuildArgs, TargetArgs, UpdateArgs},
};
use quarry_core::BranchKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Synchronize and build source working copies",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage configured repositories.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },

    /// List the branch kinds (and optionally versions) of a repository.
    Branches(BranchesArgs),

    /// Show every known working copy.
    Status(StatusArgs),

    /// Check out or update a working copy.
    Update(UpdateArgs),

    /// Build a working copy in a worker process.
    Build(BuildArgs),

    /// Update a working copy, then build it.
    Refresh(BuildArgs),

    /// Delete a working copy from disk.
    Delete(TargetArgs),

    /// Inspect the build notifier endpoint.
    Notifier {
        #[command(subcommand)]
        command: NotifierCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared BranchKind argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `BranchKind` from its remote directory name.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchKindArg(pub BranchKind);

impl FromStr for BranchKindArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self(BranchKind::Development)),
            "releases" | "release" => Ok(Self(BranchKind::Release)),
            other => Err(format!(
                "unknown branch '{other}'; expected: dev, releases"
            )),
        }
    }
}

impl fmt::Display for BranchKindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.remote_dir())
    }
}

impl From<BranchKindArg> for BranchKind {
    fn from(b: BranchKindArg) -> Self {
        b.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    quarry_daemon::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Repo { command } => commands::repo::run(command),
        Commands::Branches(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Update(args) => commands::tasks::update(args),
        Commands::Build(args) => commands::tasks::build(args),
        Commands::Refresh(args) => commands::tasks::refresh(args),
        Commands::Delete(args) => commands::tasks::delete(args),
        Commands::Notifier { command } => commands::notifier::run(command),
    }
}
