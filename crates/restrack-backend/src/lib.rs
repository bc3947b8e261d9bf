//! # Resource Tracking Backend
//!
//! The service side of resource tracking: the allocation/resource state
//! machine, the command dispatch that runs it against an interchangeable
//! storage backend, and the `memory` backend module.
//!
//! ## Architecture Overview
//!
//! A request travels through three layers:
//!
//! 1. **Protocol** ([`CommandMessage`], [`Envelope`]) - the JSON shapes on the wire
//! 2. **Dispatch** ([`CommandRegistry`], [`Dispatch`]) - turns a message into a typed,
//!    time-stamped command for the selected backend module
//! 3. **Backend** ([`BackendModule`]) - performs the command against its connection
//!
//! The `memory` backend keeps records in a [`RecordStore`] actor. The actor
//! processes one request at a time, which is what makes each conditional
//! transition atomic:
//!
//! ```text
//! CommandMessage ──► Dispatch ──► Command<MemoryConnection> ──► StoreClient ──► RecordStore
//!                                                                   (mpsc + oneshot)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use restrack_backend::{open, CommandMessage, ConnectionConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = open("memory", &ConnectionConfig::default()).await.unwrap();
//!
//!     let begin: CommandMessage = serde_json::from_value(json!({
//!         "cmd": "BeginAllocation",
//!         "application": "app:demo",
//!         "module": "module:demo",
//!         "timeout": 60
//!     }))
//!     .unwrap();
//!     let oid = backend.dispatch(begin).await.unwrap();
//!
//!     let success: CommandMessage =
//!         serde_json::from_value(json!({"cmd": "AllocationSuccess", "oid": oid})).unwrap();
//!     backend.dispatch(success.clone()).await.unwrap();
//!
//!     // A second success for the same allocation is a conflict.
//!     assert!(backend.dispatch(success).await.is_err());
//! }
//! ```
//!
//! ## Testing
//!
//! The [`mock`] module wires a [`StoreClient`] to a channel the test controls,
//! so command implementations can be tested without a running store.

pub mod backend;
pub mod client;
pub mod command;
pub mod error;
pub mod journal;
pub mod memory;
pub mod message;
pub mod mock;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod store;

pub use backend::{bind, open, BackendModule, ConnectionConfig};
pub use client::StoreClient;
pub use command::{Command, CommandParams, CommandTable, Constructor, Stamped};
pub use error::BackendError;
pub use journal::Journal;
pub use memory::{MemoryBackend, MemoryConnection};
pub use message::{Response, StoreRequest};
pub use protocol::{CommandMessage, Envelope};
pub use record::{
    AllocationRecord, AllocationState, AllocationTransition, NewAllocation, NewResource, Oid,
    RecordKind, ResourceRecord, ResourceState, ResourceTransition,
};
pub use registry::{BoundDispatcher, CommandRegistry, Dispatch};
pub use store::RecordStore;
