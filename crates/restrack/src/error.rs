//! # Tracker Errors
//!
//! [`TrackerError`] is everything the client side can fail with.
//! Backend-side failures arrive as the `error` string of the response
//! envelope and surface as [`TrackerError::Backend`]. [`ServiceError`]
//! covers the tracking service's own startup and shutdown.

use restrack_backend::BackendError;

/// Error type accepted and returned by rollback hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// No value at any configuration tier. Raised before any network call.
    #[error("No value nor default value has been specified for '{0}'")]
    MissingConfiguration(&'static str),
    /// The request was not delivered or the response could not be decoded.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The tracking service answered with a non-null `error`.
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Invalid scope state: {0}")]
    ScopeState(String),
    #[error("Allocation scope is not open")]
    AllocationNotOpen,
    #[error("Resource data was not supplied before the resource scope closed")]
    MissingResourceData,
    #[error("Rollback failed: {0}")]
    Rollback(String),
    #[error("{failed} of {total} resource(s) did not reach ALLOCATED")]
    ChildResourcesFailed { failed: usize, total: usize },
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        TrackerError::Transport(e.to_string())
    }
}

impl From<BackendError> for TrackerError {
    fn from(e: BackendError) -> Self {
        TrackerError::Backend(e.to_string())
    }
}

/// Failures starting or running the tracking service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Server task failed: {0}")]
    Task(String),
}
