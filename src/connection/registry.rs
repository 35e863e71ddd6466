//! Transport registry.
//!
//! Maps transport names to factories. The set of transports is decided once,
//! when the registry is built, and connections are then created by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::Connection;
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};

/// Factory trait for creating connections of one transport.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Name the transport is registered under
    fn name(&self) -> &'static str;

    /// Open a connection to `target`
    async fn connect(&self, target: &str, config: &ConnectionConfig)
        -> Result<Box<dyn Connection>>;
}

/// Registry for transport factories.
pub struct TransportRegistry {
    factories: HashMap<&'static str, Arc<dyn TransportFactory>>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with all built-in transports registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_defaults();
        registry
    }

    /// Register all default transport factories
    pub fn register_defaults(&mut self) {
        use super::singularity::SingularityFactory;
        self.register(SingularityFactory);
    }

    /// Register a transport factory, replacing any factory with the same name
    pub fn register<F: TransportFactory + 'static>(&mut self, factory: F) {
        self.factories.insert(factory.name(), Arc::new(factory));
    }

    /// Open a connection using the transport registered under `name`
    pub async fn create_by_name(
        &self,
        name: &str,
        target: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConnectionError::UnknownTransport {
                name: name.to_string(),
                supported: self.registered_transports(),
            })?;

        factory.connect(target, config).await
    }

    /// Sorted list of registered transport names
    pub fn registered_transports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    /// Check if a transport is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
