//! Per-session working directory and environment, referenced by opaque ID
//! across calls. Sessions live only in process memory; nothing here is
//! persisted to disk.

pub mod store;

pub use store::SessionStore;

use crate::errors::ExecError;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Hard limits on a session's environment overlay.
pub const MAX_ENV_ENTRIES: usize = 256;
pub const MAX_ENV_KEY_BYTES: usize = 256;
pub const MAX_ENV_VALUE_BYTES: usize = 32 * 1024;
pub const MAX_ENV_TOTAL_BYTES: usize = 256 * 1024;

struct SessionState {
    workdir: Option<String>,
    env: HashMap<String, String>,
    closed: bool,
}

/// An in-memory session: working directory + environment overlay, guarded
/// by its own lock so a handle cloned out of the store never races a
/// concurrent mutation.
pub struct Session {
    pub id: String,
    state: RwLock<SessionState>,
}

/// Canonicalize an env key for case-(in)sensitive comparison: uppercase on
/// Windows (case-insensitive env), unchanged elsewhere.
fn canonical_key(key: &str) -> String {
    if cfg!(windows) {
        key.to_uppercase()
    } else {
        key.to_string()
    }
}

fn is_valid_process_env_key(key: &str) -> bool {
    !key.is_empty() && !key.contains('\0') && !key.contains('=')
}

/// Validate a caller-supplied environment map against the hard limits
/// above. Does not mutate anything; callers merge only after this passes.
pub fn validate_env(entries: &HashMap<String, String>) -> Result<(), ExecError> {
    if entries.len() > MAX_ENV_ENTRIES {
        return Err(ExecError::invalid(format!(
            "too many env entries: {} (max {})",
            entries.len(),
            MAX_ENV_ENTRIES
        )));
    }
    let mut total = 0usize;
    for (key, value) in entries {
        if key.trim().is_empty() {
            return Err(ExecError::invalid("env key must not be empty or blank"));
        }
        if key.contains('\0') || value.contains('\0') {
            return Err(ExecError::invalid("env key/value must not contain NUL"));
        }
        if key.contains('=') {
            return Err(ExecError::invalid(format!(
                "env key must not contain '=': {key}"
            )));
        }
        if key.len() > MAX_ENV_KEY_BYTES {
            return Err(ExecError::invalid(format!(
                "env key too long: {key} ({} bytes, max {MAX_ENV_KEY_BYTES})",
                key.len()
            )));
        }
        if value.len() > MAX_ENV_VALUE_BYTES {
            return Err(ExecError::invalid(format!(
                "env value for {key} too long ({} bytes, max {MAX_ENV_VALUE_BYTES})",
                value.len()
            )));
        }
        total += key.len() + value.len();
    }
    if total > MAX_ENV_TOTAL_BYTES {
        return Err(ExecError::invalid(format!(
            "env total size too large: {total} bytes (max {MAX_ENV_TOTAL_BYTES})"
        )));
    }
    Ok(())
}

impl Session {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            state: RwLock::new(SessionState {
                workdir: None,
                env: HashMap::new(),
                closed: false,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().expect("session lock poisoned").closed
    }

    pub(crate) fn close(&self) {
        self.state.write().expect("session lock poisoned").closed = true;
    }

    pub fn workdir(&self) -> Option<String> {
        self.state.read().expect("session lock poisoned").workdir.clone()
    }

    /// Store the session workdir as-is; policy validation happens when the
    /// effective workdir is resolved through [`crate::fs_policy::FSPolicy`].
    pub fn set_workdir(&self, path: impl Into<String>) -> Result<(), ExecError> {
        let mut state = self.state.write().expect("session lock poisoned");
        if state.closed {
            return Err(ExecError::policy(format!("session {} is closed", self.id)));
        }
        state.workdir = Some(path.into());
        Ok(())
    }

    /// Validate and merge `entries` into the session's env overlay.
    pub fn add_to_env(&self, entries: &HashMap<String, String>) -> Result<(), ExecError> {
        validate_env(entries)?;
        let mut state = self.state.write().expect("session lock poisoned");
        if state.closed {
            return Err(ExecError::policy(format!("session {} is closed", self.id)));
        }
        if cfg!(windows) {
            // Rebuild with canonicalized keys so duplicate-case entries
            // can't coexist on a case-insensitive platform.
            let mut rebuilt: HashMap<String, String> = state
                .env
                .drain()
                .map(|(k, v)| (canonical_key(&k), v))
                .collect();
            for (k, v) in entries {
                rebuilt.insert(canonical_key(k), v.clone());
            }
            state.env = rebuilt;
        } else {
            for (k, v) in entries {
                state.env.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    /// First non-blank among `input`, the session workdir, `default`, and
    /// the process CWD.
    pub fn get_effective_workdir(&self, input: &str, default: &str) -> Result<String, ExecError> {
        let state = self.state.read().expect("session lock poisoned");
        if state.closed {
            return Err(ExecError::policy(format!("session {} is closed", self.id)));
        }
        if !input.trim().is_empty() {
            return Ok(input.trim().to_string());
        }
        if let Some(workdir) = &state.workdir {
            if !workdir.trim().is_empty() {
                return Ok(workdir.trim().to_string());
            }
        }
        if !default.trim().is_empty() {
            return Ok(default.trim().to_string());
        }
        let cwd = std::env::current_dir().map_err(ExecError::Io)?;
        Ok(cwd.to_string_lossy().into_owned())
    }

    /// Compose process env (layer 1) + session env (layer 2) + `overrides`
    /// (layer 3, already validated by the caller), deduplicated by
    /// canonical key and emitted sorted by canonical key for determinism.
    pub fn get_effective_env(
        &self,
        overrides: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>, ExecError> {
        let state = self.state.read().expect("session lock poisoned");
        if state.closed {
            return Err(ExecError::policy(format!("session {} is closed", self.id)));
        }

        let mut merged: BTreeMap<String, (String, String)> = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if is_valid_process_env_key(&key) && !value.contains('\0') {
                merged.insert(canonical_key(&key), (key, value));
            }
        }
        for (key, value) in &state.env {
            merged.insert(canonical_key(key), (key.clone(), value.clone()));
        }
        for (key, value) in overrides {
            merged.insert(canonical_key(key), (key.clone(), value.clone()));
        }

        Ok(merged.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_env_rejects_too_many_entries() {
        let mut entries = HashMap::new();
        for i in 0..(MAX_ENV_ENTRIES + 1) {
            entries.insert(format!("KEY{i}"), "v".to_string());
        }
        assert!(validate_env(&entries).is_err());
    }

    #[test]
    fn validate_env_rejects_equals_in_key() {
        let mut entries = HashMap::new();
        entries.insert("FOO=BAR".to_string(), "v".to_string());
        assert!(validate_env(&entries).is_err());
    }

    #[test]
    fn validate_env_rejects_nul() {
        let mut entries = HashMap::new();
        entries.insert("FOO".to_string(), "bad\0value".to_string());
        assert!(validate_env(&entries).is_err());
    }

    #[test]
    fn validate_env_rejects_blank_key() {
        let mut entries = HashMap::new();
        entries.insert("   ".to_string(), "v".to_string());
        assert!(validate_env(&entries).is_err());
    }

    #[test]
    fn set_workdir_and_get_effective_workdir_priority() {
        let session = Session::new("sess_test".to_string());
        assert_eq!(
            session.get_effective_workdir("", "/default").unwrap(),
            "/default"
        );
        session.set_workdir("/from-session").unwrap();
        assert_eq!(
            session.get_effective_workdir("", "/default").unwrap(),
            "/from-session"
        );
        assert_eq!(
            session.get_effective_workdir("/from-input", "/default").unwrap(),
            "/from-input"
        );
    }

    #[test]
    fn closed_session_rejects_further_use() {
        let session = Session::new("sess_test".to_string());
        session.close();
        assert!(session.set_workdir("/x").is_err());
        assert!(session.get_effective_workdir("", "").is_err());
        assert!(session.get_effective_env(&HashMap::new()).is_err());
    }

    #[test]
    fn effective_env_is_sorted_and_deterministic() {
        let session = Session::new("sess_test".to_string());
        let mut session_env = HashMap::new();
        session_env.insert("ZEBRA".to_string(), "1".to_string());
        session_env.insert("ALPHA".to_string(), "2".to_string());
        session.add_to_env(&session_env).unwrap();

        let overrides = HashMap::new();
        let first = session.get_effective_env(&overrides).unwrap();
        let second = session.get_effective_env(&overrides).unwrap();
        assert_eq!(first, second);

        let keys: Vec<&str> = first.iter().map(|(k, _)| k.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn overrides_win_over_session_env_for_same_key() {
        let session = Session::new("sess_test".to_string());
        let mut session_env = HashMap::new();
        session_env.insert("FOO".to_string(), "from-session".to_string());
        session.add_to_env(&session_env).unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("FOO".to_string(), "from-override".to_string());

        let effective = session.get_effective_env(&overrides).unwrap();
        let foo = effective.iter().find(|(k, _)| k == "FOO").unwrap();
        assert_eq!(foo.1, "from-override");
    }
}
