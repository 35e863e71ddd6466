pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use singularity_conn::{ConnectionConfig, TransferMethod};

#[derive(Parser)]
#[command(name = "singularity-conn")]
#[command(version)]
#[command(about = "Run commands and transfer files inside Singularity instances")]
#[command(long_about = "Run commands and transfer files inside running Singularity instances.\n\nTargets are written as instance://<name>. Every operation is a single `singularity exec` call.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path or name of the singularity binary
    #[arg(long, global = true)]
    pub executable: Option<String>,

    /// Per-operation timeout (e.g. 30s, 5m, 1h)
    #[arg(long, global = true)]
    pub timeout: Option<String>,

    /// File transfer method (auto, dd, cat)
    #[arg(long, global = true, value_parser = parse_transfer_method)]
    pub transfer: Option<TransferMethod>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command inside an instance
    Exec {
        /// Target instance (instance://<name>)
        target: String,

        /// Forward this process's stdin to the command
        #[arg(long)]
        stdin: bool,

        /// Command and arguments, passed through without shell expansion
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a shell command string inside an instance
    Shell {
        /// Target instance (instance://<name>)
        target: String,

        /// Shell command, run as `<shell> -c <command>`
        command: String,

        /// Forward this process's stdin to the command
        #[arg(long)]
        stdin: bool,
    },

    /// Copy a local file into an instance
    Put {
        /// Target instance (instance://<name>)
        target: String,
        /// Local source file
        local: PathBuf,
        /// Destination path inside the instance
        remote: String,
    },

    /// Copy a file out of an instance
    Fetch {
        /// Target instance (instance://<name>)
        target: String,
        /// Source path inside the instance
        remote: String,
        /// Local destination (default: ./<instance>/<remote path>)
        local: Option<PathBuf>,
    },

    /// Show the runtime binary, version and transfer method for a target
    Probe {
        /// Target instance (instance://<name>)
        target: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_transfer_method(value: &str) -> std::result::Result<TransferMethod, String> {
    match value {
        "auto" => Ok(TransferMethod::Auto),
        "dd" => Ok(TransferMethod::Dd),
        "cat" => Ok(TransferMethod::Cat),
        other => Err(format!(
            "unknown transfer method '{}', expected auto, dd or cat",
            other
        )),
    }
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.load_config()?;

        match self.command {
            Commands::Exec {
                target,
                stdin,
                command,
            } => commands::exec::execute(&config, &target, command, stdin).await,
            Commands::Shell {
                target,
                command,
                stdin,
            } => commands::exec::shell(&config, &target, &command, stdin).await,
            Commands::Put {
                target,
                local,
                remote,
            } => commands::transfer::put(&config, &target, &local, &remote).await,
            Commands::Fetch {
                target,
                remote,
                local,
            } => commands::transfer::fetch(&config, &target, &remote, local).await,
            Commands::Probe { target, json } => {
                commands::probe::execute(&config, &target, json).await
            }
        }
    }

    /// Config file and environment first, then command-line flags.
    fn load_config(&self) -> Result<ConnectionConfig> {
        let mut config = ConnectionConfig::load().context("Failed to load configuration")?;

        if let Some(executable) = &self.executable {
            config.executable_path = Some(executable.clone());
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = Some(timeout.clone());
        }
        if let Some(transfer) = self.transfer {
            config.transfer = transfer;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
