//! # Backend Errors
//!
//! Every failure that can happen between receiving a command message and
//! committing its mutation. The tracking service never lets one of these
//! escape a request handler: it renders the `Display` text into the `error`
//! field of the response envelope.

use crate::record::{Oid, RecordKind};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Unknown backend module: {0}")]
    UnknownBackendModule(String),
    #[error("Unknown command '{cmd}' for backend module '{module}'")]
    UnknownCommand { module: String, cmd: String },
    #[error("Invalid {cmd} command: {reason}")]
    InvalidCommand { cmd: String, reason: String },
    #[error("{kind} not found: {oid}")]
    RecordNotFound { kind: RecordKind, oid: Oid },
    /// The stored state did not match the state the transition expects.
    #[error("Transition conflict on {kind} {oid}: expected {expected}, found {actual}")]
    TransitionConflict {
        kind: RecordKind,
        oid: Oid,
        expected: String,
        actual: String,
    },
    #[error("Record store closed")]
    StoreClosed,
    #[error("Record store dropped response channel")]
    StoreDropped,
    #[error("Journal error: {0}")]
    Journal(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    pub fn invalid(cmd: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::InvalidCommand {
            cmd: cmd.into(),
            reason: reason.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::TransitionConflict { .. })
    }
}
