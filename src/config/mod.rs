//! Engine configuration: an immutable record built through a validating
//! builder. Held live behind [`ConfigHandle`] (`RwLock<Arc<Config>>`) so
//! callers can push a new config without racing in-flight commands — every
//! driver entry point takes one `Arc<Config>` snapshot at call start.

pub mod loader;

use crate::errors::ExecError;
use crate::fs_policy::FSPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const HARD_MAX_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_COMMANDS: usize = 64;
pub const HARD_MAX_COMMANDS: usize = 64;
pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 64 * 1024;
pub const HARD_MAX_COMMAND_LENGTH: usize = 64 * 1024;
pub const DEFAULT_MAX_ARG_BYTES: usize = 16 * 1024;

/// Interpreter invocation mode for a script-runner extension mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterMode {
    /// Execute the script directly (it must be marked executable).
    Direct,
    /// Run the script through the wrapper shell as its argument.
    Shell,
    /// Run the script through a named interpreter command.
    Interpreter,
}

/// How to invoke the interpreter for one file extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpreter {
    #[serde(default)]
    pub shell: Option<crate::shell::ShellName>,
    pub mode: InterpreterMode,
    /// Required iff `mode == Interpreter`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.mode == InterpreterMode::Interpreter && self.command.is_none() {
            return Err(ExecError::invalid(
                "interpreter mode requires a non-empty command",
            ));
        }
        Ok(())
    }
}

/// Per-call execution limits. A field value of zero means "use the
/// configured default"; all numeric fields are clamped to their hard maxima.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub allow_dangerous: bool,
    /// Zero means "use the default timeout".
    #[serde(default)]
    pub timeout_secs: u64,
    /// Zero means "use the default output cap". Negative values are
    /// rejected by callers before reaching here.
    #[serde(default)]
    pub max_output_bytes: i64,
    #[serde(default)]
    pub max_commands: usize,
    #[serde(default)]
    pub max_command_length: usize,
}

impl ExecutionPolicy {
    /// True when every field is at its zero value, i.e. "inherit the
    /// engine-wide default entirely".
    pub fn is_zero_valued(&self) -> bool {
        !self.allow_dangerous
            && self.timeout_secs == 0
            && self.max_output_bytes == 0
            && self.max_commands == 0
            && self.max_command_length == 0
    }

    /// Resolve this policy into clamped, always-valid effective limits.
    pub fn effective(&self) -> EffectiveExecutionPolicy {
        let timeout = if self.timeout_secs == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_secs).min(HARD_MAX_TIMEOUT)
        };
        let max_output_bytes = crate::capped_writer::clamp_capacity(self.max_output_bytes);
        let max_commands = if self.max_commands == 0 {
            DEFAULT_MAX_COMMANDS
        } else {
            self.max_commands.min(HARD_MAX_COMMANDS)
        };
        let max_command_length = if self.max_command_length == 0 {
            DEFAULT_MAX_COMMAND_LENGTH
        } else {
            self.max_command_length.min(HARD_MAX_COMMAND_LENGTH)
        };
        EffectiveExecutionPolicy {
            allow_dangerous: self.allow_dangerous,
            timeout,
            max_output_bytes,
            max_commands,
            max_command_length,
        }
    }
}

/// Clamped, ready-to-use execution limits for a single call.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveExecutionPolicy {
    pub allow_dangerous: bool,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub max_commands: usize,
    pub max_command_length: usize,
}

/// Policy governing [`crate::driver::script_runner`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunScriptPolicy {
    /// Lowercase extensions including the leading dot; an empty string entry
    /// permits extensionless scripts. `None`/empty means "allow all".
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
    #[serde(default)]
    pub interpreter_by_extension: HashMap<String, Interpreter>,
    #[serde(default)]
    pub execution_policy: ExecutionPolicy,
    #[serde(default)]
    pub max_args: usize,
    #[serde(default)]
    pub max_arg_bytes: usize,
}

impl RunScriptPolicy {
    pub fn effective_max_arg_bytes(&self) -> usize {
        if self.max_arg_bytes == 0 {
            DEFAULT_MAX_ARG_BYTES
        } else {
            self.max_arg_bytes
        }
    }
}

/// Immutable, validated engine configuration. Construct via [`ConfigBuilder`].
#[derive(Debug, Clone)]
pub struct Config {
    pub fs_policy: Arc<FSPolicy>,
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub default_execution_policy: ExecutionPolicy,
    pub run_script_policy: RunScriptPolicy,
    pub blocklist_additions: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    allowed_roots: Vec<PathBuf>,
    work_base_dir: Option<PathBuf>,
    block_symlinks: bool,
    session_ttl_secs: u64,
    max_sessions: usize,
    default_execution_policy: ExecutionPolicy,
    run_script_policy: RunScriptPolicy,
    blocklist_additions: Vec<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.allowed_roots.push(root.into());
        self
    }

    pub fn work_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_base_dir = Some(dir.into());
        self
    }

    pub fn block_symlinks(mut self, block: bool) -> Self {
        self.block_symlinks = block;
        self
    }

    pub fn session_ttl_secs(mut self, secs: u64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn default_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.default_execution_policy = policy;
        self
    }

    pub fn run_script_policy(mut self, policy: RunScriptPolicy) -> Self {
        self.run_script_policy = policy;
        self
    }

    pub fn blocklist_additions(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.blocklist_additions.extend(names);
        self
    }

    pub fn build(self) -> Result<Config, ExecError> {
        for interpreter in self.run_script_policy.interpreter_by_extension.values() {
            interpreter.validate()?;
        }

        let mut fs_builder = FSPolicy::builder()
            .allowed_roots(self.allowed_roots)
            .block_symlinks(self.block_symlinks);
        if let Some(base) = self.work_base_dir {
            fs_builder = fs_builder.work_base_dir(base);
        }
        let fs_policy = Arc::new(fs_builder.build()?);

        Ok(Config {
            fs_policy,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            max_sessions: self.max_sessions,
            default_execution_policy: self.default_execution_policy,
            run_script_policy: self.run_script_policy,
            blocklist_additions: self.blocklist_additions,
        })
    }
}

/// A live-reconfigurable handle to the current [`Config`]. Callers swap in a
/// new config atomically; in-flight calls keep using the `Arc<Config>`
/// snapshot they took at entry.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Snapshot the current config. Cheap: bumps an `Arc` refcount under a
    /// brief read lock.
    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Atomically replace the live config.
    pub fn replace(&self, config: Config) {
        *self.inner.write().expect("config lock poisoned") = Arc::new(config);
    }
}

/// Serde-friendly config file shape, deserialized from TOML and turned into
/// a validated [`Config`] via [`ConfigBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub allowed_roots: Vec<PathBuf>,
    pub work_base_dir: Option<PathBuf>,
    pub block_symlinks: bool,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
    pub default_execution_policy: ExecutionPolicy,
    pub run_script_policy: RunScriptPolicy,
    pub blocklist_additions: Vec<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            work_base_dir: None,
            block_symlinks: false,
            session_ttl_secs: 0,
            max_sessions: 0,
            default_execution_policy: ExecutionPolicy::default(),
            run_script_policy: RunScriptPolicy::default(),
            blocklist_additions: Vec::new(),
        }
    }
}

impl ConfigFile {
    pub fn into_builder(self) -> ConfigBuilder {
        let mut builder = ConfigBuilder::new()
            .allowed_roots(self.allowed_roots)
            .block_symlinks(self.block_symlinks)
            .session_ttl_secs(self.session_ttl_secs)
            .max_sessions(self.max_sessions)
            .default_execution_policy(self.default_execution_policy)
            .run_script_policy(self.run_script_policy)
            .blocklist_additions(self.blocklist_additions);
        if let Some(base) = self.work_base_dir {
            builder = builder.work_base_dir(base);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_policy_zero_is_all_defaults() {
        let policy = ExecutionPolicy::default();
        assert!(policy.is_zero_valued());
        let effective = policy.effective();
        assert_eq!(effective.timeout, DEFAULT_TIMEOUT);
        assert_eq!(effective.max_commands, DEFAULT_MAX_COMMANDS);
    }

    #[test]
    fn execution_policy_clamps_huge_timeout() {
        let policy = ExecutionPolicy {
            timeout_secs: 999 * 3600,
            ..Default::default()
        };
        assert_eq!(policy.effective().timeout, HARD_MAX_TIMEOUT);
    }

    #[test]
    fn execution_policy_clamps_max_commands() {
        let policy = ExecutionPolicy {
            max_commands: 10_000,
            ..Default::default()
        };
        assert_eq!(policy.effective().max_commands, HARD_MAX_COMMANDS);
    }

    #[test]
    fn interpreter_validate_requires_command_in_interpreter_mode() {
        let interp = Interpreter {
            shell: None,
            mode: InterpreterMode::Interpreter,
            command: None,
            args: vec![],
        };
        assert!(interp.validate().is_err());
    }

    #[test]
    fn config_handle_snapshot_reflects_replace() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let handle = ConfigHandle::new(config);
        let before = handle.snapshot();
        assert_eq!(before.max_sessions, 0);

        let tmp2 = tempfile::TempDir::new().unwrap();
        let replaced = ConfigBuilder::new()
            .allowed_root(tmp2.path())
            .max_sessions(5)
            .build()
            .unwrap();
        handle.replace(replaced);
        let after = handle.snapshot();
        assert_eq!(after.max_sessions, 5);
        // Previously taken snapshot is unaffected (no torn reads).
        assert_eq!(before.max_sessions, 0);
    }
}
