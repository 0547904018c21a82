//! Shell-Command driver: accept a list of commands, manage the session,
//! validate and run each command in turn, and assemble the response.

use crate::blocklist::{reject_dangerous_command, Blocklist};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::errors::ExecError;
use crate::exec::run_one;
use crate::session::SessionStore;
use crate::shell::{self, ShellName};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ShellCommandRequest {
    pub commands: Vec<String>,
    pub workdir: Option<String>,
    pub env: HashMap<String, String>,
    pub shell: ShellName,
    pub execute_parallel: bool,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCommandExecResult {
    pub command: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCommandResponse {
    pub session_id: String,
    pub workdir: String,
    pub results: Vec<ShellCommandExecResult>,
}

/// Run `req.commands` in order against a session, rolling back a
/// newly-created session on any top-level failure.
pub async fn shell_command(
    req: ShellCommandRequest,
    config: &Config,
    blocklist: &Blocklist,
    sessions: &SessionStore,
    cancel: CancelToken,
) -> Result<ShellCommandResponse, ExecError> {
    if cancel.is_canceled() {
        return Err(ExecError::Canceled);
    }

    let normalized: Vec<String> = req
        .commands
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if normalized.is_empty() {
        return Err(ExecError::invalid("commands is required"));
    }

    let effective = config.default_execution_policy.effective();
    if normalized.len() > effective.max_commands {
        return Err(ExecError::invalid(format!(
            "too many commands: {} (max {})",
            normalized.len(),
            effective.max_commands
        )));
    }

    let (session, created_new) = match &req.session_id {
        Some(id) => (sessions.require(id)?, false),
        None => (sessions.new_session(), true),
    };

    let result = run_with_session(&req, &normalized, config, blocklist, &session, cancel).await;

    match result {
        Ok(response) => Ok(response),
        Err(e) => {
            if created_new {
                sessions.delete(&session.id);
            }
            Err(e)
        }
    }
}

async fn run_with_session(
    req: &ShellCommandRequest,
    normalized_commands: &[String],
    config: &Config,
    blocklist: &Blocklist,
    session: &crate::session::Session,
    cancel: CancelToken,
) -> Result<ShellCommandResponse, ExecError> {
    let effective = config.default_execution_policy.effective();
    let stop_on_error = !req.execute_parallel;

    let fs_policy = &config.fs_policy;
    let workdir_input = req.workdir.as_deref().unwrap_or("");
    let fallback = session
        .workdir()
        .unwrap_or_else(|| fs_policy.work_base_dir().to_string_lossy().into_owned());
    let resolved_workdir = fs_policy.resolve_path(workdir_input, &fallback)?;
    fs_policy.verify_dir_resolved(&resolved_workdir)?;
    let workdir_string = resolved_workdir.to_string_lossy().into_owned();
    if req.workdir.as_deref().is_some_and(|w| !w.trim().is_empty()) {
        session.set_workdir(workdir_string.clone())?;
    }

    crate::session::validate_env(&req.env)?;
    let effective_env = session.get_effective_env(&req.env)?;
    if !req.env.is_empty() {
        session.add_to_env(&req.env)?;
    }

    let resolved_shell = Arc::new(shell::resolve(req.shell)?);

    let mut results = Vec::with_capacity(normalized_commands.len());
    for command in normalized_commands {
        if cancel.is_canceled() {
            return Err(ExecError::Canceled);
        }

        if command.len() > effective.max_command_length {
            return Err(ExecError::invalid(format!(
                "command too long: {} bytes (max {})",
                command.len(),
                effective.max_command_length
            )));
        }
        if command.contains('\0') {
            return Err(ExecError::invalid("command contains NUL byte"));
        }

        reject_dangerous_command(
            command,
            resolved_shell.dialect,
            blocklist,
            !effective.allow_dangerous,
        )?;

        let outcome = run_one(
            &resolved_shell,
            command,
            &workdir_string,
            &effective_env,
            effective.timeout,
            effective.max_output_bytes,
            cancel.clone(),
        )
        .await;

        let run_result = match outcome {
            Ok(r) => r,
            Err(ExecError::Canceled) => return Err(ExecError::Canceled),
            Err(e) => crate::exec::RunOneResult::spawn_failure(e.to_string()),
        };

        let stop = stop_on_error && (run_result.timed_out || run_result.exit_code != 0);
        results.push(ShellCommandExecResult {
            command: command.clone(),
            exit_code: run_result.exit_code,
            timed_out: run_result.timed_out,
            stdout: run_result.stdout,
            stdout_truncated: run_result.stdout_truncated,
            stderr: run_result.stderr,
            stderr_truncated: run_result.stderr_truncated,
            duration_ms: run_result.duration.as_millis() as u64,
        });
        if stop {
            break;
        }
    }

    Ok(ShellCommandResponse {
        session_id: session.id.clone(),
        workdir: workdir_string,
        results,
    })
}
