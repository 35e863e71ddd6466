//! File transfer strategies.
//!
//! Singularity has no copy-into-instance subcommand, so files travel over the
//! stdin/stdout of a helper command running inside the instance. Each
//! strategy only decides which helper to run.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Block size handed to `dd`.
pub const BUFSIZE: usize = 65536;

/// Transfer method requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    /// Probe the instance at connect time and pick the best available strategy.
    #[default]
    Auto,
    Dd,
    Cat,
}

/// Strategy actually used by a session once `Auto` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// `dd of=<path>` / `dd if=<path>`
    Dd,
    /// `tee <path>` / `cat <path>`, for minimal images without `dd`
    Cat,
}

impl TransferStrategy {
    /// Command run inside the instance to write stdin to `remote_path`.
    pub fn upload_args(&self, remote_path: &str) -> Vec<String> {
        match self {
            Self::Dd => vec![
                "dd".to_string(),
                format!("of={}", remote_path),
                format!("bs={}", BUFSIZE),
            ],
            Self::Cat => vec!["tee".to_string(), remote_path.to_string()],
        }
    }

    /// Command run inside the instance to write `remote_path` to stdout.
    pub fn download_args(&self, remote_path: &str) -> Vec<String> {
        match self {
            Self::Dd => vec![
                "dd".to_string(),
                format!("if={}", remote_path),
                format!("bs={}", BUFSIZE),
            ],
            Self::Cat => vec!["cat".to_string(), remote_path.to_string()],
        }
    }
}

impl std::fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dd => write!(f, "dd"),
            Self::Cat => write!(f, "cat"),
        }
    }
}

impl TransferMethod {
    /// The strategy for an explicit method, `None` for `Auto`.
    pub fn explicit(&self) -> Option<TransferStrategy> {
        match self {
            Self::Auto => None,
            Self::Dd => Some(TransferStrategy::Dd),
            Self::Cat => Some(TransferStrategy::Cat),
        }
    }
}

/// Anchor a remote path at `/` and resolve `.` and `..` lexically.
///
/// There is no guarantee a home directory exists inside an instance, so
/// relative paths are placed under the root instead.
pub fn normalize_remote_path(remote_path: &str) -> String {
    let mut normalized = PathBuf::from("/");

    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                normalized.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    normalized.to_string_lossy().into_owned()
}
