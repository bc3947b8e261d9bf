//! # Service Configuration
//!
//! YAML file read by `restrack-server`. Every key is optional.
//!
//! ```yaml
//! listen: 127.0.0.1:5001
//! path: /restrack
//! log: info,restrack=debug
//! backend:
//!   module: memory
//!   connection:
//!     db: /var/lib/restrack
//!     allocation_collection: allocations
//!     resource_collection: resources
//! ```

use crate::error::ServiceError;
use restrack_backend::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5001))
}

fn default_path() -> String {
    "/restrack".to_string()
}

fn default_log() -> String {
    "info".to_string()
}

fn default_module() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Path of the POST endpoint commands are sent to.
    #[serde(default = "default_path")]
    pub path: String,
    /// Fallback filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            log: default_log(),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ServiceError> {
        // An empty file deserializes to unit, not to an empty mapping.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ServiceError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServiceError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(&text)?;
        info!(path = %path.display(), module = %config.backend.module, "Configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if !self.path.starts_with('/') {
            return Err(ServiceError::Config(format!(
                "path must start with '/', got {:?}",
                self.path
            )));
        }
        Ok(())
    }
}
