//! Instance target references.
//!
//! Inventory hosts address a running instance as `instance://<name>`. The
//! rendered form is also what the runtime CLI expects as its container
//! argument, so the reference is passed through unchanged.

use std::fmt;
use std::str::FromStr;

use crate::error::{ConnectionError, Result};

/// Scheme accepted for Singularity instances.
pub const INSTANCE_SCHEME: &str = "instance";

const SCHEME_SEPARATOR: &str = "://";

/// A parsed `instance://<name>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    name: String,
}

impl InstanceRef {
    /// Parse a host identifier.
    ///
    /// The scheme must be exactly `instance` and the name non-empty. The name
    /// is kept verbatim.
    pub fn parse(target: &str) -> Result<Self> {
        let (scheme, name) = target.split_once(SCHEME_SEPARATOR).ok_or_else(|| {
            ConnectionError::invalid_target(
                target,
                format!("expected {}{}<name>", INSTANCE_SCHEME, SCHEME_SEPARATOR),
            )
        })?;

        if scheme.is_empty() {
            return Err(ConnectionError::invalid_target(target, "missing scheme"));
        }

        if scheme != INSTANCE_SCHEME {
            return Err(ConnectionError::invalid_target(
                target,
                format!(
                    "unsupported scheme '{}', expected '{}'",
                    scheme, INSTANCE_SCHEME
                ),
            ));
        }

        if name.is_empty() {
            return Err(ConnectionError::invalid_target(target, "empty instance name"));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// The instance name without the scheme.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for InstanceRef {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", INSTANCE_SCHEME, SCHEME_SEPARATOR, self.name)
    }
}
