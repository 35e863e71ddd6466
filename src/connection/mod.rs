//! Connection abstraction layer.
//!
//! The `Connection` trait is the contract an orchestration engine drives for
//! every host: run a command, move files in and out, close. Transports are
//! created by name through the registry.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐
//! │ TransportRegistry │  ← Creates connections by transport name
//! └─────────┬─────────┘
//!           │
//!           ▼
//! ┌───────────────────┐
//! │  dyn Connection   │  ← Common interface
//! └─────────┬─────────┘
//!           │
//!           ▼
//! ┌───────────────────┐
//! │    singularity    │  ← `<cli> exec -- instance://<name> ...`
//! └───────────────────┘
//! ```
//!
//! # Adding a New Transport
//!
//! 1. Create a new module implementing `Connection`
//! 2. Implement `TransportFactory` for it
//! 3. Register in `TransportRegistry::register_defaults()`

pub mod registry;
pub mod singularity;
pub mod transfer;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

use std::path::Path;

use async_trait::async_trait;

pub use registry::{TransportFactory, TransportRegistry};
pub use singularity::SingularityConnection;
pub use transfer::{TransferMethod, TransferStrategy};

use crate::error::Result;

/// Output from a command executed through a connection.
///
/// A non-zero `exit_code` is data for the caller, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Capability interface every transport implements.
///
/// Methods take `&mut self`: operations on one session are strictly
/// sequential and never have two child processes in flight.
#[async_trait]
pub trait Connection: Send {
    /// Transport name this connection was created by.
    fn transport(&self) -> &'static str;

    /// Run `args` on the target. `args` are passed as discrete tokens.
    async fn execute(&mut self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput>;

    /// Copy a local file to the target.
    async fn put_file(&mut self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Copy a file from the target to the local filesystem.
    async fn fetch_file(&mut self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Release the session. Calling it more than once is not an error.
    async fn close(&mut self) -> Result<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}
