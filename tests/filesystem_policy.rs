//! `FSPolicy` containment and symlink behavior driven through both the
//! standalone policy API and the `ShellCommand` driver, plus its quantified
//! invariants.

mod common;

use common::{fresh_blocklist, test_config};
use sandrun::cancel::CancelToken;
use sandrun::driver::{shell_command, ShellCommandRequest};
use sandrun::fs_policy::FSPolicy;
use sandrun::session::SessionStore;
use sandrun::shell::ShellName;
use std::time::Duration;
use tempfile::TempDir;

#[cfg(unix)]
#[tokio::test]
async fn scenario_9_workdir_outside_allowed_roots_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let blocklist = fresh_blocklist();
    let sessions = SessionStore::new(Duration::ZERO, 0);

    let err = shell_command(
        ShellCommandRequest {
            commands: vec!["pwd".to_string()],
            workdir: Some(other.path().to_str().unwrap().to_string()),
            shell: ShellName::Sh,
            ..Default::default()
        },
        &config,
        &blocklist,
        &sessions,
        CancelToken::new(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("outside allowed roots"));
}

#[test]
fn empty_allowed_roots_disables_the_sandbox() {
    let policy = FSPolicy::builder().build().unwrap();
    assert!(policy.allowed_roots().is_empty());
    assert!(policy.resolve_path("/etc/hosts", "").is_ok());
}

#[test]
fn resolving_a_path_inside_one_of_several_roots_succeeds() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let policy = FSPolicy::builder()
        .allowed_root(first.path())
        .allowed_root(second.path())
        .build()
        .unwrap();

    let resolved = policy
        .resolve_path(second.path().join("file.txt").to_str().unwrap(), "")
        .unwrap();
    assert!(resolved.starts_with(second.path().canonicalize().unwrap()));
}

#[cfg(unix)]
#[test]
fn block_symlinks_false_permits_symlinked_components() {
    let tmp = TempDir::new().unwrap();
    let real_dir = tmp.path().join("real");
    std::fs::create_dir(&real_dir).unwrap();
    let link_dir = tmp.path().join("link");
    std::os::unix::fs::symlink(&real_dir, &link_dir).unwrap();

    let policy = FSPolicy::builder()
        .allowed_root(tmp.path())
        .block_symlinks(false)
        .build()
        .unwrap();
    assert!(policy.verify_dir_resolved(&link_dir).is_ok());
}

#[cfg(unix)]
#[test]
fn require_existing_regular_file_rejects_a_directory() {
    let tmp = TempDir::new().unwrap();
    let policy = FSPolicy::builder().allowed_root(tmp.path()).build().unwrap();
    let err = policy
        .require_existing_regular_file_resolved(tmp.path())
        .unwrap_err();
    assert!(err.to_string().contains("not a regular file"));
}

#[test]
fn ensure_dir_resolved_respects_max_new_dirs() {
    let tmp = TempDir::new().unwrap();
    let policy = FSPolicy::builder()
        .allowed_root(tmp.path())
        .block_symlinks(true)
        .build()
        .unwrap();
    let target = tmp.path().join("a/b/c");
    let err = policy.ensure_dir_resolved(&target, 1).unwrap_err();
    assert!(err.to_string().contains("too many parent directories"));
}
