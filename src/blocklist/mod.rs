//! Hard blocklist of dangerous command names plus optional heuristic
//! rejections. The hard list is an exact, normalized command-name set;
//! the heuristics (fork bomb, backgrounding, pipe-to-shell) are compiled
//! regexes over the *outer* rendered command string, gated separately.

use crate::errors::ExecError;
use crate::shell::Dialect;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Non-overridable baseline: rejected regardless of `allow_dangerous`.
pub const HARD_BLOCKED: &[&str] = &[
    "sudo",
    "su",
    "rm",
    "mkfs",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "vim",
    "vi",
    "nano",
    "emacs",
    "less",
    "more",
    "top",
    "htop",
    "curl",
    "wget",
    "nc",
    "netcat",
    "ncat",
    "socat",
    "ssh",
    "scp",
    "sftp",
    "ftp",
    "tftp",
    "telnet",
    "invoke-webrequest",
    "iwr",
    "invoke-restmethod",
    "irm",
    "diskpart",
    "format.com",
    "del",
    "erase",
    "rmdir",
    "rd",
    "remove-item",
    "ri",
];

/// Normalize a candidate command-name: reject NUL/interior-whitespace input
/// (returned as `""`), else trim, lowercase, and take the path basename.
/// Idempotent: `normalize_command_name(normalize_command_name(x)) ==
/// normalize_command_name(x)`.
pub fn normalize_command_name(s: &str) -> String {
    if s.contains('\0') {
        return String::new();
    }
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.split_whitespace().count() > 1 {
        return String::new();
    }
    let lowered = trimmed.to_lowercase();
    let basename = lowered
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(lowered.as_str());
    basename.to_string()
}

/// A blocklist: the fixed hard set plus caller-supplied instance additions.
#[derive(Debug, Clone)]
pub struct Blocklist {
    hard: HashSet<String>,
    additional: HashSet<String>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self {
            hard: HARD_BLOCKED.iter().map(|s| (*s).to_string()).collect(),
            additional: HashSet::new(),
        }
    }

    /// Add caller-supplied names. On Windows, an entry ending in
    /// `.exe|.com|.bat|.cmd` also adds the bare-stem variant.
    pub fn with_additional(mut self, names: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        for raw in names {
            let normalized = normalize_command_name(raw.as_ref());
            if normalized.is_empty() {
                continue;
            }
            #[cfg(windows)]
            {
                for ext in [".exe", ".com", ".bat", ".cmd"] {
                    if let Some(stem) = normalized.strip_suffix(ext) {
                        self.additional.insert(stem.to_string());
                    }
                }
            }
            self.additional.insert(normalized);
        }
        self
    }

    pub fn contains(&self, normalized_name: &str) -> bool {
        self.hard.contains(normalized_name) || self.additional.contains(normalized_name)
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}

static FORK_BOMB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*\(\)\s*\{[^}]*:\s*\|\s*:\s*&?\s*\}\s*;?\s*:").unwrap());

static BACKGROUNDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[;&|]|&&)\s*nohup\b.*&\s*$|(?:^|[^&])&\s*$").unwrap());

static PIPE_REMOTE_TO_SHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(sh|bash|zsh|dash)\b").unwrap()
});

/// Reject the leading command of `cmd_string` if its normalized basename is
/// blocked, or (when `enable_heuristics`) if the rendered string matches a
/// recognizable fork bomb, backgrounding construct, or remote-pipe-to-shell.
/// The blocklist check is always performed; heuristics are best-effort and
/// gated separately.
pub fn reject_dangerous_command(
    cmd_string: &str,
    dialect: Dialect,
    blocklist: &Blocklist,
    enable_heuristics: bool,
) -> Result<(), ExecError> {
    let stripped = strip_call_operator(cmd_string, dialect);
    if let Some(name) = leading_token(stripped) {
        let normalized = normalize_command_name(&name);
        if !normalized.is_empty() && blocklist.contains(&normalized) {
            return Err(ExecError::policy(format!("blocked command: {normalized}")));
        }
    }

    if enable_heuristics {
        if FORK_BOMB.is_match(stripped) {
            return Err(ExecError::policy(
                "blocked command: recognizable fork bomb".to_string(),
            ));
        }
        if PIPE_REMOTE_TO_SHELL.is_match(stripped) {
            return Err(ExecError::policy(
                "blocked command: piping remote content into a shell interpreter".to_string(),
            ));
        }
        if BACKGROUNDING.is_match(stripped) {
            return Err(ExecError::policy(
                "blocked command: unconditional backgrounding".to_string(),
            ));
        }
    }

    Ok(())
}

/// Strip PowerShell's leading call operator (`& `) so the token parser sees
/// the real command underneath.
fn strip_call_operator(cmd: &str, dialect: Dialect) -> &str {
    if dialect == Dialect::PowerShell {
        if let Some(rest) = cmd.trim_start().strip_prefix("& ") {
            return rest.trim_start();
        }
    }
    cmd
}

fn leading_token(cmd: &str) -> Option<String> {
    let tokens = shlex::split(cmd).or_else(|| {
        // Fall back to a naive whitespace split if shell quoting is
        // unbalanced (e.g. the string is itself adversarial); we still want
        // to see a leading token rather than silently passing validation.
        Some(cmd.split_whitespace().map(str::to_string).collect())
    })?;
    tokens.into_iter().next()
}
