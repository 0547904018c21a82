//! The top-level entry point a host process actually holds: a live,
//! hot-swappable [`Config`] plus the session store and blocklist built from
//! it, exposing `ShellCommand`/`RunScript` as the two callable operations.
//! A worker panic never crashes the host process: the call body runs on
//! its own `tokio::spawn` task, and a `JoinError::is_panic()` is converted
//! to [`ExecError::Internal`] instead of propagating. A bare
//! `std::panic::catch_unwind` around an `.await` isn't sound (the unwind
//! can cross a suspend point into poisoned executor state), so this is the
//! async-friendly equivalent.

use crate::blocklist::Blocklist;
use crate::cancel::CancelToken;
use crate::config::{Config, ConfigHandle};
use crate::driver::{
    self, RunScriptRequest, RunScriptResponse, ShellCommandRequest, ShellCommandResponse,
};
use crate::errors::ExecError;
use crate::session::SessionStore;
use std::future::Future;
use std::sync::Arc;

/// Owns the live config, the (construction-time-fixed) blocklist, and the
/// session store; the unit a caller constructs once and calls repeatedly.
pub struct Engine {
    config: ConfigHandle,
    blocklist: Arc<Blocklist>,
    sessions: Arc<SessionStore>,
}

impl Engine {
    /// Build an engine from a validated [`Config`]. The blocklist's
    /// instance additions and the session store's TTL/LRU limits are taken
    /// from `config` at this point.
    pub fn new(config: Config) -> Self {
        let blocklist = Arc::new(Blocklist::new().with_additional(&config.blocklist_additions));
        let sessions = Arc::new(SessionStore::new(config.session_ttl, config.max_sessions));
        Self {
            config: ConfigHandle::new(config),
            blocklist,
            sessions,
        }
    }

    /// Atomically swap in a new config. In-flight calls keep running
    /// against the snapshot they already took; only calls starting after
    /// this returns see the new values. The session store's TTL/LRU caps
    /// are live-updated (triggering an eviction pass); the blocklist's
    /// instance additions stay fixed at construction — it's a read-only
    /// set once built.
    pub fn reconfigure(&self, config: Config) {
        self.sessions.set_ttl(config.session_ttl);
        self.sessions.set_max_sessions(config.max_sessions);
        self.config.replace(config);
    }

    pub fn config_handle(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run a batch of shell commands, panic-contained.
    pub async fn shell_command(
        &self,
        req: ShellCommandRequest,
        cancel: CancelToken,
    ) -> Result<ShellCommandResponse, ExecError> {
        let config = self.config.snapshot();
        let blocklist = self.blocklist.clone();
        let sessions = self.sessions.clone();
        run_guarded(async move {
            driver::shell_command(req, &config, &blocklist, &sessions, cancel).await
        })
        .await
    }

    /// Run a script file through its mapped interpreter, panic-contained.
    pub async fn run_script(
        &self,
        req: RunScriptRequest,
        cancel: CancelToken,
    ) -> Result<RunScriptResponse, ExecError> {
        let config = self.config.snapshot();
        let policy = config.run_script_policy.clone();
        run_guarded(async move { driver::run_script(req, &config, &policy, cancel).await }).await
    }
}

/// Run `fut` on its own task; convert a worker panic into
/// `ExecError::Internal` instead of letting it propagate.
async fn run_guarded<F, T>(fut: F) -> Result<T, ExecError>
where
    F: Future<Output = Result<T, ExecError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => Err(ExecError::Internal(anyhow::anyhow!(
            "internal error: the execution worker panicked"
        ))),
        Err(join_err) => Err(ExecError::Internal(anyhow::anyhow!(join_err))),
    }
}
