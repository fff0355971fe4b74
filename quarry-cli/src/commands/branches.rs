//! `quarry branches <repo>` — remote branch kinds and their versions.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use quarry_core::{BranchRegistry, Config, RepositoryName};
use quarry_sync::branches::{discover_branches_at, list_versions, Source};
use quarry_sync::{format_error_message, SyncError, Vcs};

#[derive(Args, Debug)]
pub struct BranchesArgs {
    /// Configured repository name.
    pub repository: String,

    /// Also list the versions under each branch.
    #[arg(long)]
    pub versions: bool,
}

impl BranchesArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = Config::load_at(&home).context("failed to load config")?;
        let repo = config.repository(&RepositoryName::from(self.repository.as_str()))?;
        let vcs = Vcs::svn(repo.auth.credentials());

        let branches = discover_branches_at(&home, &vcs, repo, &BranchRegistry::builtin())
            .with_context(|| format!("failed to list branches of '{}'", repo.name))?;
        if branches.source == Source::Local {
            println!("{}", "repository offline; showing local working copies".yellow());
        }
        if branches.kinds.is_empty() {
            println!("No branches found.");
            return Ok(());
        }

        for kind in branches.kinds {
            println!("{} ({})", kind.to_string().bold(), kind.remote_dir());
            if !self.versions || branches.source == Source::Local {
                continue;
            }
            match list_versions(&vcs, repo, kind) {
                Ok(versions) => {
                    for version in versions {
                        println!("  {version}");
                    }
                }
                Err(SyncError::Vcs(err)) => {
                    println!("  {}", format_error_message("list versions", &err).red());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
