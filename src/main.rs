use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandrun::cancel::CancelToken;
use sandrun::config::{loader, ConfigBuilder};
use sandrun::driver::{RunScriptRequest, ShellCommandRequest};
use sandrun::engine::Engine;
use sandrun::shell::ShellName;
use std::collections::HashMap;
use std::path::PathBuf;

/// Sandboxed local command/script execution engine.
///
/// This binary is a thin, single-shot wrapper around the library: it loads
/// config, builds an [`Engine`], runs one `ShellCommand` or `RunScript` call
/// through it, prints the result as JSON, and exits. The long-lived session
/// store and live config reload the engine supports across many calls are
/// meant for an embedding host (an MCP/tool-call server, for instance) to
/// own — out of this CLI's scope, though we still go through `Engine`
/// rather than the bare driver functions so a worker panic is caught the
/// same way it would be in that host.
#[derive(Parser)]
#[command(name = "sandrun")]
#[command(about = "Sandboxed local command/script execution engine")]
struct Cli {
    /// Path to the TOML config file (defaults to ~/.sandrun/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more shell commands.
    Exec {
        /// Command(s) to run, in order.
        commands: Vec<String>,
        /// Working directory (defaults to the configured work base dir).
        #[arg(long)]
        workdir: Option<String>,
        /// Shell to use.
        #[arg(long, value_enum, default_value = "auto")]
        shell: ShellArg,
        /// Keep running remaining commands even if one fails.
        #[arg(long)]
        execute_parallel: bool,
        /// Reuse an existing session ID instead of creating a new one.
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Run a script file through its mapped interpreter.
    Script {
        /// Path to the script.
        path: String,
        /// Arguments passed to the script.
        args: Vec<String>,
        /// Working directory to resolve the script path and run it in.
        #[arg(long)]
        workdir: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ShellArg {
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

impl From<ShellArg> for ShellName {
    fn from(value: ShellArg) -> Self {
        match value {
            ShellArg::Auto => ShellName::Auto,
            ShellArg::Bash => ShellName::Bash,
            ShellArg::Zsh => ShellName::Zsh,
            ShellArg::Sh => ShellName::Sh,
            ShellArg::Dash => ShellName::Dash,
            ShellArg::Ksh => ShellName::Ksh,
            ShellArg::Fish => ShellName::Fish,
            ShellArg::Pwsh => ShellName::Pwsh,
            ShellArg::Powershell => ShellName::Powershell,
            ShellArg::Cmd => ShellName::Cmd,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sandrun=debug".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let builder: ConfigBuilder = loader::load_config(cli.config.as_deref())
        .context("loading config")?
        .work_base_dir(std::env::current_dir().context("reading cwd")?);
    let config = builder.build().context("validating config")?;
    let engine = Engine::new(config);
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Exec {
            commands,
            workdir,
            shell,
            execute_parallel,
            session_id,
        } => {
            let response = engine
                .shell_command(
                    ShellCommandRequest {
                        commands,
                        workdir,
                        env: HashMap::new(),
                        shell: shell.into(),
                        execute_parallel,
                        session_id,
                    },
                    cancel,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Script { path, args, workdir } => {
            let response = engine
                .run_script(
                    RunScriptRequest {
                        path,
                        args,
                        env: HashMap::new(),
                        workdir,
                    },
                    cancel,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
