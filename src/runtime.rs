//! Runtime CLI discovery and invocation building.
//!
//! The runtime is an opaque collaborator: everything goes through
//! `<cli> [global args] exec -- instance://<name> <args...>` and its
//! stdout/stderr/exit code.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};
use crate::process::{self, Input, Output};
use crate::target::InstanceRef;
use crate::utils::display_command;

/// Binary looked up on `PATH` when no override is configured.
pub const DEFAULT_PROGRAM: &str = "singularity";

/// Singularity exports `SINGULARITYENV_<NAME>` into the instance as `<NAME>`.
const REMOTE_USER_ENV: &str = "SINGULARITYENV_REMOTE_USER";

/// A located runtime CLI plus the options applied to every invocation.
#[derive(Debug, Clone)]
pub struct RuntimeCli {
    program: PathBuf,
    global_args: Vec<String>,
    env: Vec<(String, String)>,
}

impl RuntimeCli {
    /// Locate the runtime using the process `PATH`.
    pub fn locate(config: &ConnectionConfig) -> Result<Self> {
        Self::locate_in(config, std::env::var_os("PATH"))
    }

    /// Locate the runtime using an explicit search path.
    pub fn locate_in(config: &ConnectionConfig, search_path: Option<OsString>) -> Result<Self> {
        let program = match config.executable_path.as_deref() {
            Some(requested) => {
                let expanded = shellexpand::tilde(requested).into_owned();
                if expanded.contains(std::path::MAIN_SEPARATOR) {
                    check_executable(Path::new(&expanded))?
                } else {
                    find_on_path(&expanded, search_path)?
                }
            }
            None => find_on_path(DEFAULT_PROGRAM, search_path)?,
        };

        let env = config
            .remote_user
            .iter()
            .map(|user| (REMOTE_USER_ENV.to_string(), user.clone()))
            .collect();

        tracing::debug!("Using runtime CLI {}", program.display());

        Ok(Self {
            program,
            global_args: config.extra_args.clone(),
            env,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument vector (without the program) for running `args` in `instance`.
    pub fn exec_args(&self, instance: &InstanceRef, args: &[String]) -> Vec<String> {
        let mut argv = self.global_args.clone();
        argv.push("exec".to_string());
        argv.push("--".to_string());
        argv.push(instance.to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Build the command that runs `args` inside `instance`.
    pub fn exec_command(&self, instance: &InstanceRef, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.exec_args(instance, args));
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command
    }

    /// Human-readable rendering of an `exec` invocation, for logs and errors.
    pub fn describe_exec(&self, instance: &InstanceRef, args: &[String]) -> String {
        let mut argv = vec![self.program.to_string_lossy().into_owned()];
        argv.extend(self.exec_args(instance, args));
        display_command(&argv)
    }

    /// Ask the runtime for its version. Failures are logged and yield `None`.
    pub async fn version(&self, timeout: Option<Duration>) -> Option<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.global_args).arg("--version");
        let label = format!("{} --version", self.program.display());

        match process::run(command, &label, Input::Null, Output::Capture, timeout).await {
            Ok(output) if output.exit_code == 0 => {
                parse_version(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::warn!(
                    "{} exited with {}: {}",
                    label,
                    output.exit_code,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
            Err(e) => {
                tracing::warn!("Could not determine runtime version: {}", e);
                None
            }
        }
    }
}

fn find_on_path(name: &str, search_path: Option<OsString>) -> Result<PathBuf> {
    let cwd = lookup_dir(std::env::current_dir());
    which::which_in(name, search_path, cwd)
        .map_err(|e| ConnectionError::runtime_not_found(name, format!("not found in PATH ({})", e)))
}

/// Directory relative `PATH` entries resolve against. A deleted working
/// directory falls back to `/`.
fn lookup_dir(cwd: std::io::Result<PathBuf>) -> PathBuf {
    cwd.unwrap_or_else(|e| {
        tracing::debug!("Working directory unavailable ({}), resolving PATH from /", e);
        PathBuf::from("/")
    })
}

fn check_executable(path: &Path) -> Result<PathBuf> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        ConnectionError::runtime_not_found(path.display().to_string(), e.to_string())
    })?;

    if !metadata.is_file() {
        return Err(ConnectionError::runtime_not_found(
            path.display().to_string(),
            "not a regular file",
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ConnectionError::runtime_not_found(
                path.display().to_string(),
                "not executable",
            ));
        }
    }

    Ok(path.to_path_buf())
}

/// Extract the version token from `--version` output.
///
/// `singularity version 3.8.7-1.el8` becomes `3.8.7-1.el8`.
pub fn parse_version(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let token = line.split_whitespace().last()?;
    let version: String = token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect();

    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}
