//! Entry points callers actually invoke: the shell-command driver (component
//! H) and the script runner (component I). Both resolve workdir/env through
//! [`crate::fs_policy::FSPolicy`] and [`crate::session::Session`], enforce
//! [`crate::blocklist::Blocklist`], and delegate the actual spawn to
//! [`crate::exec::run_one`].

pub mod script_runner;
pub mod shell_command;

pub use script_runner::{run_script, RunScriptRequest, RunScriptResponse};
pub use shell_command::{
    shell_command, ShellCommandExecResult, ShellCommandRequest, ShellCommandResponse,
};
