//! Run-One: spawn a single command under a selected shell in its own process
//! group, race it against parent cancellation and a timeout, and kill the
//! whole group on cancel.

use crate::cancel::CancelToken;
use crate::capped_writer::CappedWriter;
use crate::errors::ExecError;
use crate::shell::{dialect_invocation_args, ResolvedShell};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Outcome of running one command to completion (or to timeout/cancel).
#[derive(Debug, Clone)]
pub struct RunOneResult {
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl RunOneResult {
    /// Synthesize a result for a command that never spawned: exit code 127,
    /// the failure text carried as stderr.
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: 127,
            timed_out: false,
            stdout: String::new(),
            stdout_truncated: false,
            stderr: message.into(),
            stderr_truncated: false,
            duration: Duration::ZERO,
        }
    }
}

/// Run `command` under `shell` with the given `workdir`/`env`, capturing up to
/// `max_output_bytes` of stdout/stderr and honoring `timeout` and `cancel`.
pub async fn run_one(
    shell: &ResolvedShell,
    command: &str,
    workdir: &str,
    env: &[(String, String)],
    timeout: Duration,
    max_output_bytes: usize,
    cancel: CancelToken,
) -> Result<RunOneResult, ExecError> {
    if cancel.is_canceled() {
        return Err(ExecError::Canceled);
    }

    let args = dialect_invocation_args(shell.dialect, command);
    let mut cmd = Command::new(&shell.path);
    cmd.args(&args)
        .current_dir(workdir)
        .env_clear()
        .envs(env.iter().cloned())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    configure_process_group(&mut cmd);

    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Ok(RunOneResult::spawn_failure(format!("failed to start command: {e}"))),
    };

    let stdout_writer = Arc::new(CappedWriter::new(max_output_bytes));
    let stderr_writer = Arc::new(CappedWriter::new(max_output_bytes));

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_pump = tokio::spawn(pump(stdout_pipe, stdout_writer.clone()));
    let stderr_pump = tokio::spawn(pump(stderr_pipe, stderr_writer.clone()));

    let pgid = process_group_id(&child);

    let wait_result = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
        _ = cancel.canceled() => Outcome::Canceled,
    };

    let (timed_out, exit_code) = match wait_result {
        Outcome::Exited(Ok(status)) => (false, decode_exit_status(status)),
        Outcome::Exited(Err(e)) => {
            return Ok(RunOneResult::spawn_failure(format!(
                "failed to wait for command: {e}"
            )))
        }
        Outcome::TimedOut => {
            kill_process_group(pgid, &mut child).await;
            let status = child.wait().await.ok();
            (true, status.map(decode_exit_status).unwrap_or(124))
        }
        Outcome::Canceled => {
            kill_process_group(pgid, &mut child).await;
            let status = child.wait().await.ok();
            (false, status.map(decode_exit_status).unwrap_or(-1))
        }
    };

    let _ = stdout_pump.await;
    let _ = stderr_pump.await;

    let exit_code = if timed_out { 124 } else { exit_code };
    let (stdout, stdout_truncated) = stdout_writer.snapshot_utf8();
    let (stderr, stderr_truncated) = stderr_writer.snapshot_utf8();

    if matches!(wait_result, Outcome::Canceled) {
        return Err(ExecError::Canceled);
    }

    Ok(RunOneResult {
        exit_code,
        timed_out,
        stdout,
        stdout_truncated,
        stderr,
        stderr_truncated,
        duration: started.elapsed(),
    })
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Canceled,
}

async fn pump(pipe: Option<impl tokio::io::AsyncRead + Unpin>, sink: Arc<CappedWriter>) {
    let Some(mut pipe) = pipe else { return };
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.write(&buf[..n]),
        }
    }
}

#[cfg(unix)]
fn configure_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn configure_process_group(cmd: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn process_group_id(child: &tokio::process::Child) -> Option<i32> {
    let pid = child.id()? as i32;
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid == -1 {
        None
    } else {
        Some(pgid)
    }
}

#[cfg(windows)]
fn process_group_id(child: &tokio::process::Child) -> Option<u32> {
    child.id()
}

/// POSIX: `kill(-pgid, SIGTERM)`, poll up to 500ms, then `SIGKILL`.
/// Windows: `taskkill /T /PID`, wait ~250ms, then `taskkill /T /F /PID`;
/// fall back to killing the process directly if `taskkill` is unavailable.
#[cfg(unix)]
async fn kill_process_group(pgid: Option<i32>, child: &mut tokio::process::Child) {
    let Some(pgid) = pgid else {
        let _ = child.start_kill();
        return;
    };

    unsafe {
        libc::kill(-pgid, libc::SIGTERM);
    }

    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        if Instant::now() >= deadline {
            break;
        }
        let alive = unsafe { libc::kill(-pgid, 0) } == 0;
        if !alive {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(windows)]
async fn kill_process_group(pgid: Option<u32>, child: &mut tokio::process::Child) {
    let Some(pid) = pgid else {
        let _ = child.start_kill();
        return;
    };

    let graceful = tokio::process::Command::new("taskkill")
        .args(["/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if graceful.is_err() {
        let _ = child.start_kill();
        return;
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    if child.try_wait().ok().flatten().is_some() {
        return;
    }

    let _ = tokio::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

/// POSIX: signaled processes report `128 + signal`; else the decoded status.
/// Windows: the raw platform exit code. Absent process state: `-1`.
#[cfg(unix)]
fn decode_exit_status(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
        128 + signal
    } else {
        status.code().unwrap_or(-1)
    }
}

#[cfg(windows)]
fn decode_exit_status(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
