//! `quarry repo list` and `quarry repo add <name> <url>`

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use quarry_core::{AuthConfig, Config, RepositoryConfig, RepositoryName};

/// Manage repositories in `~/.quarry/config.yaml`.
#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// List configured repositories.
    List,

    /// Add or replace a repository.
    Add(AddArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Repository name used by every other command.
    pub name: String,

    /// Repository root, e.g. svn://host/path or svn+ssh://host/path.
    pub url: String,

    #[arg(long, short = 'u', requires = "password")]
    pub username: Option<String>,

    #[arg(long, short = 'p', requires = "username")]
    pub password: Option<String>,
}

pub fn run(cmd: RepoCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match cmd {
        RepoCommand::List => list(&home),
        RepoCommand::Add(args) => add(&home, args),
    }
}

fn list(home: &std::path::Path) -> Result<()> {
    let config = Config::load_at(home).context("failed to load config")?;
    if config.repositories.is_empty() {
        println!("No repositories configured.");
        println!("Run: quarry repo add <name> <url>");
        return Ok(());
    }

    for repo in &config.repositories {
        let auth = match &repo.auth {
            AuthConfig::None => "anonymous".to_string(),
            AuthConfig::Password { username, .. } => format!("user {username}"),
        };
        println!("{} {} ({auth})", repo.name, repo.url);
    }
    Ok(())
}

fn add(home: &std::path::Path, args: AddArgs) -> Result<()> {
    if args.name.trim().is_empty() {
        bail!("repository name must not be empty");
    }

    let auth = match (args.username, args.password) {
        (Some(username), Some(password)) => AuthConfig::Password { username, password },
        _ => AuthConfig::None,
    };
    let mut config = Config::load_at(home).context("failed to load config")?;
    config.add_repository(RepositoryConfig {
        name: RepositoryName::from(args.name.as_str()),
        url: args.url,
        auth,
    })?;
    config.save_at(home).context("failed to save config")?;

    println!("✓ Added repository '{}'", args.name);
    Ok(())
}
