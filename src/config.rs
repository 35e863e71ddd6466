use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::transfer::TransferMethod;
use crate::error::{ConnectionError, Result};

/// Options recognized by `connect`.
///
/// The library never reads files or the environment on its own; callers build
/// this explicitly or go through [`ConnectionConfig::load`] (what the CLI does).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Path or name of the runtime CLI. Defaults to `singularity` on `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
    /// Advisory only. Singularity cannot switch users inside an instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    /// Global runtime options placed before the `exec` subcommand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub transfer: TransferMethod,
    /// Per-operation timeout, e.g. `30s`, `5m`, `1h` or plain seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            remote_user: None,
            extra_args: Vec::new(),
            shell: default_shell(),
            transfer: TransferMethod::default(),
            timeout: None,
        }
    }
}

impl ConnectionConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| ConnectionError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".config").join("singularity-conn"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Load the user config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => Self::load_from(&path)?,
            Ok(path) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::debug!("Skipping config file: {}", e);
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConnectionError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Apply `SINGULARITY_CONN_*` overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(exe) = lookup("SINGULARITY_CONN_EXECUTABLE") {
            self.executable_path = Some(exe);
        }

        if let Some(extra) = lookup("SINGULARITY_CONN_EXTRA_ARGS") {
            self.extra_args = extra.split_whitespace().map(String::from).collect();
        }

        if let Some(user) = lookup("SINGULARITY_CONN_REMOTE_USER") {
            self.remote_user = Some(user);
        }

        if let Some(timeout) = lookup("SINGULARITY_CONN_TIMEOUT") {
            self.timeout = Some(timeout);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(exe) = &self.executable_path {
            if exe.trim().is_empty() {
                return Err(ConnectionError::Config(
                    "executable_path must not be empty".to_string(),
                ));
            }
        }

        if self.shell.trim().is_empty() {
            return Err(ConnectionError::Config("shell must not be empty".to_string()));
        }

        if let Some(timeout) = &self.timeout {
            match parse_duration(timeout) {
                Some(d) if !d.is_zero() => {}
                _ => {
                    return Err(ConnectionError::Config(format!(
                        "Invalid timeout '{}'. Use format like '30s', '5m', '1h' or '90'",
                        timeout
                    )))
                }
            }
        }

        Ok(())
    }

    /// Parsed timeout. `None` when unset or unparseable.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }
}

pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
