//! `~/.quarry/config.yaml` — repositories, work directory, executor size.
//!
//! A missing file yields [`Config::default_at`]; repository URLs are
//! validated on load and on [`Config::add_repository`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::branch::BranchKind;
use crate::error::{io_err, CoreError};
use crate::paths::{config_path, default_work_dir, validate_repo_url, working_copy_path};
use crate::types::{Credentials, RepositoryName, VersionName, WorkingCopy};

pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 2;

/// Authentication mode for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Anonymous/public access.
    #[default]
    None,
    Password { username: String, password: String },
}

impl AuthConfig {
    pub fn credentials(&self) -> Option<Credentials> {
        match self {
            AuthConfig::None => None,
            AuthConfig::Password { username, password } => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
        }
    }
}

/// One remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: RepositoryName,
    pub url: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl RepositoryConfig {
    /// URL of a branch-kind directory, e.g. `<url>/dev`.
    pub fn branch_url(&self, remote_dir: &str) -> String {
        format!("{}/{remote_dir}", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub work_dir: PathBuf,
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Worker binary; defaults to `quarry-worker` next to the running executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

fn default_max_parallel_tasks() -> usize {
    DEFAULT_MAX_PARALLEL_TASKS
}

impl Config {
    pub fn default_at(home: &Path) -> Self {
        Self {
            work_dir: default_work_dir(home),
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            worker_program: None,
            repositories: vec![],
        }
    }

    /// Load `<home>/.quarry/config.yaml`, or defaults if it does not exist.
    pub fn load_at(home: &Path) -> Result<Self, CoreError> {
        let path = config_path(home);
        if !path.exists() {
            return Ok(Self::default_at(home));
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let config: Config =
            serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
        for repo in &config.repositories {
            validate_repo_url(&repo.url)?;
        }
        Ok(config)
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, CoreError> {
        Self::load_at(&crate::home()?)
    }

    /// Atomically save to `<home>/.quarry/config.yaml`.
    pub fn save_at(&self, home: &Path) -> Result<(), CoreError> {
        let path = config_path(home);
        let yaml = serde_yaml::to_string(self)?;
        crate::state::write_atomic(&path, &yaml)
    }

    pub fn repository(&self, name: &RepositoryName) -> Result<&RepositoryConfig, CoreError> {
        self.repositories
            .iter()
            .find(|repo| &repo.name == name)
            .ok_or_else(|| CoreError::UnknownRepository(name.0.clone()))
    }

    /// Register a repository; replaces an existing entry with the same name.
    pub fn add_repository(&mut self, repo: RepositoryConfig) -> Result<(), CoreError> {
        validate_repo_url(&repo.url)?;
        self.repositories.retain(|existing| existing.name != repo.name);
        self.repositories.push(repo);
        self.repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }

    /// Resolve the working copy for `version` under a branch of `repository`.
    pub fn working_copy(
        &self,
        repository: &RepositoryName,
        branch: BranchKind,
        version: &VersionName,
    ) -> Result<WorkingCopy, CoreError> {
        let repo = self.repository(repository)?;
        Ok(WorkingCopy {
            repository: repo.name.clone(),
            version: version.clone(),
            branch,
            local_path: working_copy_path(&self.work_dir, &repo.url, branch, version),
            remote_url: format!("{}/{}", repo.branch_url(branch.remote_dir()), version.0),
            credentials: repo.auth.credentials(),
        })
    }
}
