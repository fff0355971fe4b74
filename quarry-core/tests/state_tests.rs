//! Working-copy state error messages, atomic-write safety, and config integration.

use assert_fs::prelude::*;
use predicates::prelude::*;
use quarry_core::{
    state,
    types::{RepositoryName, SyncStatus, VersionName, WorkingCopyState},
    BranchKind, Config, CoreError,
};
use std::fs;

fn repo() -> RepositoryName { RepositoryName::from("main") }
fn ver() -> VersionName { VersionName::from("3.2.0") }

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_state_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = state::load_at(home.path(), &repo(), BranchKind::Development, &ver()).unwrap_err();
    assert!(matches!(err, CoreError::StateNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("3.2.0.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".quarry").join("state").join("main").join("dev");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("3.2.0.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = state::load_at(home.path(), &repo(), BranchKind::Development, &ver()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("3.2.0.yaml"));
}

#[test]
fn load_or_new_propagates_parse_errors() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".quarry").join("state").join("main").join("dev");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("3.2.0.yaml"), b"- a list, not a mapping\n").expect("write");

    let err = state::load_or_new_at(home.path(), &repo(), BranchKind::Development, &ver()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Persisted content
// ---------------------------------------------------------------------------

#[test]
fn saved_state_is_human_readable_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut wc = WorkingCopyState::new(repo(), BranchKind::Development, ver());
    wc.status = SyncStatus::Interrupted;
    state::save_at(home.path(), &mut wc).expect("save");

    home.child(".quarry/state/main/dev/3.2.0.yaml")
        .assert(predicate::str::contains("status: interrupted"))
        .assert(predicate::str::contains("loaded: false"));
}

#[test]
fn built_revision_omitted_until_set() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut wc = WorkingCopyState::new(repo(), BranchKind::Development, ver());
    state::save_at(home.path(), &mut wc).expect("save");
    home.child(".quarry/state/main/dev/3.2.0.yaml")
        .assert(predicate::str::contains("built_revision").not());

    wc.built_revision = Some(77);
    state::save_at(home.path(), &mut wc).expect("save");
    home.child(".quarry/state/main/dev/3.2.0.yaml")
        .assert(predicate::str::contains("built_revision: 77"));
}

// ---------------------------------------------------------------------------
// 3. Config file
// ---------------------------------------------------------------------------

#[test]
fn config_file_with_defaults_for_optional_fields() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".quarry/config.yaml")
        .write_str(
            "work_dir: /srv/work\nrepositories:\n  - name: main\n    url: svn+ssh://scm.local/app\n",
        )
        .expect("write config");

    let config = Config::load_at(home.path()).expect("load");
    assert_eq!(config.max_parallel_tasks, 2);
    assert!(config.worker_program.is_none());
    assert_eq!(config.repositories.len(), 1);
    assert!(config.repositories[0].auth.credentials().is_none());
}
