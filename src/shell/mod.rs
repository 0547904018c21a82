//! Shell selection: resolve a requested shell name (or `auto`) to a concrete
//! binary path plus the dialect used to invoke it.

use crate::errors::ExecError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Caller-requested shell identity, matching the wire-level enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellName {
    Auto,
    Bash,
    Zsh,
    Sh,
    Dash,
    Ksh,
    Fish,
    Pwsh,
    Powershell,
    Cmd,
}

impl Default for ShellName {
    fn default() -> Self {
        ShellName::Auto
    }
}

impl ShellName {
    fn binary_name(self) -> &'static str {
        match self {
            ShellName::Auto => unreachable!("auto must be resolved before lookup"),
            ShellName::Bash => "bash",
            ShellName::Zsh => "zsh",
            ShellName::Sh => "sh",
            ShellName::Dash => "dash",
            ShellName::Ksh => "ksh",
            ShellName::Fish => "fish",
            ShellName::Pwsh => "pwsh",
            ShellName::Powershell => "powershell",
            ShellName::Cmd => "cmd",
        }
    }
}

/// The syntactic family used to invoke and quote commands for a shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Posix,
    PowerShell,
    Cmd,
}

/// The result of resolving a requested shell: a concrete executable path and
/// the dialect used to build its argv.
#[derive(Debug, Clone)]
pub struct ResolvedShell {
    pub path: PathBuf,
    pub dialect: Dialect,
    pub name: String,
}

const POSIX_ORDER: &[ShellName] = &[
    ShellName::Bash,
    ShellName::Zsh,
    ShellName::Sh,
    ShellName::Dash,
    ShellName::Ksh,
    ShellName::Fish,
];

/// Resolve a requested shell name to a concrete binary + dialect.
pub fn resolve(requested: ShellName) -> Result<ResolvedShell, ExecError> {
    match requested {
        ShellName::Auto => resolve_auto(),
        ShellName::Powershell => {
            // Prefer pwsh (PowerShell Core) if it's the one actually on PATH.
            if let Some(path) = find_in_path("pwsh") {
                return Ok(ResolvedShell {
                    path,
                    dialect: Dialect::PowerShell,
                    name: "pwsh".to_string(),
                });
            }
            resolve_named(ShellName::Powershell)
        }
        other => resolve_named(other),
    }
}

fn resolve_named(name: ShellName) -> Result<ResolvedShell, ExecError> {
    let bin = name.binary_name();
    let path = find_in_path(bin)
        .ok_or_else(|| ExecError::not_found(format!("shell not found on PATH: {bin}")))?;
    Ok(ResolvedShell {
        path,
        dialect: dialect_for(name),
        name: bin.to_string(),
    })
}

fn dialect_for(name: ShellName) -> Dialect {
    match name {
        ShellName::Pwsh | ShellName::Powershell => Dialect::PowerShell,
        ShellName::Cmd => Dialect::Cmd,
        _ => Dialect::Posix,
    }
}

#[cfg(windows)]
fn resolve_auto() -> Result<ResolvedShell, ExecError> {
    for name in [ShellName::Pwsh, ShellName::Powershell, ShellName::Cmd] {
        if let Ok(resolved) = resolve_named(name) {
            return Ok(resolved);
        }
    }
    Err(ExecError::not_found(
        "no shell found on PATH (tried pwsh, powershell, cmd)",
    ))
}

#[cfg(not(windows))]
fn resolve_auto() -> Result<ResolvedShell, ExecError> {
    if let Ok(shell_env) = std::env::var("SHELL") {
        if let Some(basename) = Path::new(&shell_env).file_name().and_then(|n| n.to_str()) {
            if POSIX_ORDER.iter().any(|s| s.binary_name() == basename) {
                if let Some(path) = find_in_path(basename) {
                    return Ok(ResolvedShell {
                        path,
                        dialect: Dialect::Posix,
                        name: basename.to_string(),
                    });
                }
            }
        }
    }
    for name in POSIX_ORDER {
        if let Ok(resolved) = resolve_named(*name) {
            return Ok(resolved);
        }
    }
    Err(ExecError::not_found(
        "no POSIX shell found on PATH (tried bash, zsh, sh, dash, ksh, fish)",
    ))
}

/// Look up `name` on `PATH`, honoring the platform executable-extension
/// convention.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            for ext in [".exe", ".cmd", ".bat"] {
                let with_ext = dir.join(format!("{name}{ext}"));
                if with_ext.is_file() {
                    return Some(with_ext);
                }
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Build the argv tail (everything after the shell binary) for invoking
/// `command` under `dialect`.
pub fn dialect_invocation_args(dialect: Dialect, command: &str) -> Vec<String> {
    match dialect {
        Dialect::Posix => vec!["-c".to_string(), command.to_string()],
        Dialect::PowerShell => vec![
            "-NoLogo".to_string(),
            "-NonInteractive".to_string(),
            "-NoProfile".to_string(),
            "-Command".to_string(),
            command.to_string(),
        ],
        Dialect::Cmd => vec![
            "/d".to_string(),
            "/s".to_string(),
            "/c".to_string(),
            command.to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_invocation_args_posix() {
        let args = dialect_invocation_args(Dialect::Posix, "echo hi");
        assert_eq!(args, vec!["-c".to_string(), "echo hi".to_string()]);
    }

    #[test]
    fn dialect_invocation_args_powershell() {
        let args = dialect_invocation_args(Dialect::PowerShell, "Write-Host hi");
        assert_eq!(args[3], "-Command");
        assert_eq!(args[4], "Write-Host hi");
    }

    #[test]
    fn dialect_invocation_args_cmd() {
        let args = dialect_invocation_args(Dialect::Cmd, "dir");
        assert_eq!(args, vec!["/d", "/s", "/c", "dir"]);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_sh_finds_posix_dialect() {
        let resolved = resolve(ShellName::Sh).expect("sh must exist on unix test runners");
        assert_eq!(resolved.dialect, Dialect::Posix);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_auto_picks_a_posix_shell() {
        let resolved = resolve(ShellName::Auto).expect("some POSIX shell must be on PATH");
        assert_eq!(resolved.dialect, Dialect::Posix);
    }

    #[test]
    fn resolve_unknown_shell_name_not_found() {
        // cmd.exe is never present on a unix test runner.
        #[cfg(unix)]
        {
            let err = resolve(ShellName::Cmd).unwrap_err();
            assert!(matches!(err, ExecError::NotFound(_)));
        }
    }
}
