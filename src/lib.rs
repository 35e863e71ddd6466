//! Run commands and transfer files inside running Singularity instances.
//!
//! Hosts are addressed as `instance://<name>`. Each operation shells out to
//! the `singularity` CLI once; there is no persistent connection.
//!
//! ```no_run
//! use singularity_conn::{Connection, ConnectionConfig, SingularityConnection};
//!
//! # async fn demo() -> singularity_conn::Result<()> {
//! let mut conn =
//!     SingularityConnection::connect("instance://web1", &ConnectionConfig::default()).await?;
//! let output = conn
//!     .execute(&["echo".to_string(), "hello".to_string()], None)
//!     .await?;
//! assert_eq!(output.stdout, b"hello\n");
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod process;
pub mod runtime;
pub mod target;
pub mod utils;

pub use config::ConnectionConfig;
pub use connection::{
    CommandOutput, Connection, SingularityConnection, TransferMethod, TransferStrategy,
    TransportRegistry,
};
pub use error::{ConnectionError, Result};
pub use target::InstanceRef;
