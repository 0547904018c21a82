//! Script Runner: resolve a script path under policy, build an interpreter
//! invocation from the extension map, render it as a dialect-safe command
//! string, and hand it to Run-One.

use crate::blocklist::reject_dangerous_command;
use crate::cancel::CancelToken;
use crate::config::{Config, Interpreter, InterpreterMode, RunScriptPolicy};
use crate::errors::ExecError;
use crate::exec::run_one;
use crate::shell::{self, Dialect, ShellName};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct RunScriptRequest {
    pub path: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScriptResponse {
    pub path: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
}

pub async fn run_script(
    req: RunScriptRequest,
    config: &Config,
    policy: &RunScriptPolicy,
    cancel: CancelToken,
) -> Result<RunScriptResponse, ExecError> {
    if cancel.is_canceled() {
        return Err(ExecError::Canceled);
    }
    if req.path.trim().is_empty() {
        return Err(ExecError::invalid("path is required"));
    }

    let fs_policy = &config.fs_policy;

    let workdir_input = req.workdir.as_deref().unwrap_or("");
    let resolved_workdir = fs_policy.resolve_path(
        workdir_input,
        &fs_policy.work_base_dir().to_string_lossy(),
    )?;
    fs_policy.verify_dir_resolved(&resolved_workdir)?;

    let base_for_path = if req.workdir.as_deref().is_some_and(|w| !w.trim().is_empty()) {
        resolved_workdir.as_path()
    } else {
        fs_policy.work_base_dir()
    };
    let resolved_path = fs_policy.resolve_path_under(&req.path, "", base_for_path)?;
    fs_policy.require_existing_regular_file_resolved(&resolved_path)?;

    let extension = script_extension(&resolved_path);
    if let Some(allowed) = &policy.allowed_extensions {
        if !allowed.is_empty() && !allowed.iter().any(|e| e == &extension) {
            return Err(ExecError::invalid(format!(
                "extension \"{extension}\" not allowed"
            )));
        }
    }

    let max_args = if policy.max_args == 0 { usize::MAX } else { policy.max_args };
    if req.args.len() > max_args {
        return Err(ExecError::invalid(format!(
            "too many args: {} (max {max_args})",
            req.args.len()
        )));
    }
    let max_arg_bytes = policy.effective_max_arg_bytes();
    for arg in &req.args {
        if arg.contains('\0') {
            return Err(ExecError::invalid("arg contains NUL byte"));
        }
        if arg.len() > max_arg_bytes {
            return Err(ExecError::invalid(format!(
                "arg too long: {} bytes (max {max_arg_bytes})",
                arg.len()
            )));
        }
    }

    crate::session::validate_env(&req.env)?;

    let interpreter = policy
        .interpreter_by_extension
        .get(&extension)
        .or_else(|| policy.interpreter_by_extension.get(""))
        .ok_or_else(|| {
            ExecError::invalid(format!("no interpreter mapping for extension \"{extension}\""))
        })?;

    let wrapper_shell = shell::resolve(interpreter.shell.unwrap_or(ShellName::Auto))?;

    let script_path_string = resolved_path.to_string_lossy().into_owned();
    let argv = build_argv(
        interpreter,
        &wrapper_shell.path.to_string_lossy(),
        &script_path_string,
        &req.args,
    )?;
    let rendered = render_command(wrapper_shell.dialect, &argv)?;

    let effective_policy = if policy.execution_policy.is_zero_valued() {
        config.default_execution_policy
    } else {
        policy.execution_policy
    };
    let effective = effective_policy.effective();

    if rendered.command.len() > effective.max_command_length {
        return Err(ExecError::invalid(format!(
            "constructed command too long: {} bytes (max {})",
            rendered.command.len(),
            effective.max_command_length
        )));
    }

    let process_env: HashMap<String, String> = std::env::vars().collect();
    let mut merged_env = process_env;
    merged_env.extend(req.env.clone());
    let mut effective_env: Vec<(String, String)> = merged_env.into_iter().collect();
    effective_env.sort_by(|a, b| a.0.cmp(&b.0));

    reject_dangerous_command(
        &rendered.blocklist_check,
        wrapper_shell.dialect,
        &crate::blocklist::Blocklist::new().with_additional(&config.blocklist_additions),
        !effective.allow_dangerous,
    )?;

    let workdir_string = resolved_workdir.to_string_lossy().into_owned();
    let outcome = run_one(
        &wrapper_shell,
        &rendered.command,
        &workdir_string,
        &effective_env,
        effective.timeout,
        effective.max_output_bytes,
        cancel,
    )
    .await;

    let run_result = match outcome {
        Ok(r) => r,
        Err(ExecError::Canceled) => return Err(ExecError::Canceled),
        Err(e) => crate::exec::RunOneResult::spawn_failure(e.to_string()),
    };

    Ok(RunScriptResponse {
        path: script_path_string,
        exit_code: run_result.exit_code,
        stdout: run_result.stdout,
        stdout_truncated: run_result.stdout_truncated,
        stderr: run_result.stderr,
        stderr_truncated: run_result.stderr_truncated,
        timed_out: run_result.timed_out,
        duration_ms: run_result.duration.as_millis() as u64,
    })
}

fn script_extension(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
        None => String::new(),
    }
}

fn build_argv(
    interpreter: &Interpreter,
    wrapper_shell_path: &str,
    script_path: &str,
    args: &[String],
) -> Result<Vec<String>, ExecError> {
    let mut argv = match interpreter.mode {
        InterpreterMode::Direct => vec![script_path.to_string()],
        InterpreterMode::Shell => {
            // Runs the script via the wrapper shell as interpreter, so it
            // doesn't need the executable bit set on POSIX.
            vec![wrapper_shell_path.to_string(), script_path.to_string()]
        }
        InterpreterMode::Interpreter => {
            let command = interpreter
                .command
                .clone()
                .ok_or_else(|| ExecError::invalid("interpreter mode requires a command"))?;
            let mut v = vec![command];
            v.extend(interpreter.args.iter().cloned());
            v.push(script_path.to_string());
            v
        }
    };
    argv.extend(args.iter().cloned());
    Ok(argv)
}

struct RenderedCommand {
    /// The command string actually executed.
    command: String,
    /// The same command with any leading call-operator stripped, for
    /// blocklist matching.
    blocklist_check: String,
}

/// Render `argv` as a single command string quoted for `dialect`.
fn render_command(dialect: Dialect, argv: &[String]) -> Result<RenderedCommand, ExecError> {
    match dialect {
        Dialect::Posix => {
            let quoted = argv.iter().map(|a| posix_quote(a)).collect::<Vec<_>>().join(" ");
            Ok(RenderedCommand {
                command: quoted.clone(),
                blocklist_check: quoted,
            })
        }
        Dialect::PowerShell => {
            let quoted = argv
                .iter()
                .map(|a| powershell_quote(a))
                .collect::<Vec<_>>()
                .join(" ");
            Ok(RenderedCommand {
                command: format!("& {quoted}"),
                blocklist_check: quoted,
            })
        }
        Dialect::Cmd => Err(ExecError::invalid(
            "cmd.exe is not supported for script execution",
        )),
    }
}

fn posix_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
