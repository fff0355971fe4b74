//! `quarry update|build|refresh|delete <repo> <version>`

use anyhow::{bail, Result};
use clap::Args;

use quarry_core::{RepositoryName, VersionName};
use quarry_daemon::{build_task, refresh_task};
use quarry_sync::pipeline::{self, Target};
use quarry_sync::{format_error_message, Revision, SyncError};

use super::runner::Session;
use crate::BranchKindArg;

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Configured repository name.
    pub repository: String,

    /// Version directory under the branch, e.g. 2.1.
    pub version: String,

    /// Branch directory: dev | releases.
    #[arg(long, short = 'b', default_value = "dev")]
    pub branch: BranchKindArg,
}

impl TargetArgs {
    fn target(&self) -> Target {
        Target {
            repository: RepositoryName::from(self.repository.as_str()),
            branch: self.branch.into(),
            version: VersionName::from(self.version.as_str()),
        }
    }
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Synchronize to this revision instead of HEAD.
    #[arg(long, short = 'r')]
    pub revision: Option<u64>,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Clean before building.
    #[arg(long)]
    pub clean: bool,
}

pub fn update(args: UpdateArgs) -> Result<()> {
    let session = Session::open()?;
    let target = args.target.target();
    ensure_online(&session, &target, "update")?;

    let mut task = pipeline::update_task(&session.home, &session.config, &session.vcs, &target)?;
    if let Some(revision) = args.revision {
        task = task.at_revision(Revision::Number(revision));
    }
    session.run(task)
}

pub fn build(args: BuildArgs) -> Result<()> {
    let session = Session::open()?;
    let target = args.target.target();
    session.run_with_notifier(|ctx| {
        Ok(build_task(ctx, &session.config, &session.vcs, &target, args.clean)?)
    })
}

pub fn refresh(args: BuildArgs) -> Result<()> {
    let session = Session::open()?;
    let target = args.target.target();
    ensure_online(&session, &target, "refresh")?;

    session.run_with_notifier(|ctx| {
        Ok(refresh_task(ctx, &session.config, &session.vcs, &target, args.clean)?)
    })
}

pub fn delete(args: TargetArgs) -> Result<()> {
    let session = Session::open()?;
    let task = pipeline::delete_task(&session.home, &session.config, &session.vcs, &args.target())?;
    session.run(task)
}

/// Abort with the user-facing message when the repository cannot be reached.
fn ensure_online(session: &Session, target: &Target, what: &str) -> Result<()> {
    match pipeline::check_online(&session.config, &session.vcs, target) {
        Ok(()) => Ok(()),
        Err(SyncError::Vcs(err)) => bail!("{}", format_error_message(what, &err)),
        Err(err) => Err(err.into()),
    }
}
