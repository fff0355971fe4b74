//! Filesystem layout.
//!
//! ```text
//! ~/.quarry/
//!   config.yaml
//!   state/<repository>/<branch-dir>/<version>.yaml  (working-copy state, mode 0600)
//!   run/build-notifier.sock                          (notifier endpoint)
//!   work/versions/<url-dir>/<branch-dir>/<version>/  (default working-copy root)
//! ```

use std::path::{Path, PathBuf};

use crate::branch::BranchKind;
use crate::error::CoreError;
use crate::types::VersionName;

/// Fixed logical service name of the build notifier endpoint.
pub const NOTIFIER_SERVICE: &str = "build-notifier";

pub const CONFIG_FILE: &str = "config.yaml";

pub fn quarry_root(home: &Path) -> PathBuf {
    home.join(".quarry")
}

pub fn config_path(home: &Path) -> PathBuf {
    quarry_root(home).join(CONFIG_FILE)
}

pub fn state_root(home: &Path) -> PathBuf {
    quarry_root(home).join("state")
}

pub fn run_dir(home: &Path) -> PathBuf {
    quarry_root(home).join("run")
}

/// `<home>/.quarry/run/build-notifier.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(format!("{NOTIFIER_SERVICE}.sock"))
}

pub fn default_work_dir(home: &Path) -> PathBuf {
    quarry_root(home).join("work")
}

/// `<work_dir>/versions/<url-dir>/<branch-dir>/<version>`
pub fn working_copy_path(
    work_dir: &Path,
    repo_url: &str,
    branch: BranchKind,
    version: &VersionName,
) -> PathBuf {
    work_dir
        .join("versions")
        .join(url_to_dir_name(repo_url))
        .join(branch.remote_dir())
        .join(&version.0)
}

/// Validate an `svn://` or `svn+<tunnel>://` repository URL.
pub fn validate_repo_url(url: &str) -> Result<(), CoreError> {
    let invalid = || CoreError::InvalidUrl(url.to_string());
    let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
    let scheme_ok = scheme == "svn"
        || scheme
            .strip_prefix("svn+")
            .is_some_and(|tunnel| {
                !tunnel.is_empty() && tunnel.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
    let rest_ok = !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-' | ':'));
    if scheme_ok && rest_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Directory name for a repository URL: scheme stripped, separators become `.`.
///
/// `svn+ssh://host.example/repos/app` → `host.example.repos.app`
pub fn url_to_dir_name(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    rest.trim_end_matches(['/', '\\']).replace(['/', '\\'], ".")
}
