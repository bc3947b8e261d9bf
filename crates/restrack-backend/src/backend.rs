//! # Backend Plugin Contract
//!
//! A backend module is selected by name and supplies two things: a connector
//! that turns a [`ConnectionConfig`] into a live connection handle, and the
//! table of command implementations registered under its name.

use crate::command::CommandTable;
use crate::error::BackendError;
use crate::memory::MemoryBackend;
use crate::registry::{BoundDispatcher, CommandRegistry, Dispatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn default_allocation_collection() -> String {
    "allocations".to_string()
}

fn default_resource_collection() -> String {
    "resources".to_string()
}

/// Connection settings handed to a backend's connector.
///
/// Backends ignore the keys they have no use for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or a directory for file-backed backends.
    #[serde(default)]
    pub db: Option<PathBuf>,
    #[serde(default = "default_allocation_collection")]
    pub allocation_collection: String,
    #[serde(default = "default_resource_collection")]
    pub resource_collection: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            db: None,
            allocation_collection: default_allocation_collection(),
            resource_collection: default_resource_collection(),
        }
    }
}

#[async_trait]
pub trait BackendModule {
    /// Name the module is selected by and its commands are registered under.
    const NAME: &'static str;

    type Connection: Send + Sync + 'static;

    async fn connect(config: &ConnectionConfig) -> Result<Self::Connection, BackendError>;

    fn commands() -> CommandTable<Self::Connection>;
}

/// Connects backend `B` and binds it to a registry holding its commands.
pub async fn bind<B: BackendModule>(
    config: &ConnectionConfig,
) -> Result<BoundDispatcher<B::Connection>, BackendError> {
    let connection = B::connect(config).await?;
    let mut registry = CommandRegistry::new();
    registry.register_table(B::NAME, B::commands());
    info!(module = B::NAME, "Backend module bound");
    Ok(BoundDispatcher::new(B::NAME, registry, connection))
}

/// Opens the backend module called `module`.
pub async fn open(
    module: &str,
    config: &ConnectionConfig,
) -> Result<Arc<dyn Dispatch>, BackendError> {
    if module == MemoryBackend::NAME {
        return Ok(Arc::new(bind::<MemoryBackend>(config).await?));
    }
    Err(BackendError::UnknownBackendModule(module.to_string()))
}
