// Shared test helpers — not all items used by every test binary.
#![allow(unused)]

use sandrun::blocklist::Blocklist;
use sandrun::config::{Config, ConfigBuilder, ExecutionPolicy, RunScriptPolicy};
use sandrun::session::SessionStore;
use std::time::Duration;
use tempfile::TempDir;

/// A config scoped to a fresh temp dir, with no extra limits applied.
pub fn test_config(tmp: &TempDir) -> Config {
    ConfigBuilder::new().allowed_root(tmp.path()).build().unwrap()
}

pub fn test_config_with_policy(tmp: &TempDir, policy: ExecutionPolicy) -> Config {
    ConfigBuilder::new()
        .allowed_root(tmp.path())
        .default_execution_policy(policy)
        .build()
        .unwrap()
}

pub fn test_config_with_script_policy(tmp: &TempDir, policy: RunScriptPolicy) -> Config {
    ConfigBuilder::new()
        .allowed_root(tmp.path())
        .run_script_policy(policy)
        .build()
        .unwrap()
}

pub fn fresh_sessions() -> SessionStore {
    SessionStore::new(Duration::ZERO, 0)
}

pub fn fresh_blocklist() -> Blocklist {
    Blocklist::new()
}
