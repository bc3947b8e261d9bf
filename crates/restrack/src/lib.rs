//! # Resource Allocation Tracker
//!
//! Records the lifecycle of allocations and the resources acquired inside
//! them, so that a crashed or misbehaving allocator still leaves an accurate
//! trail of what it holds.
//!
//! ## Components
//!
//! - **[client]**: [`TrackerClient`] sends the nine tracking commands over a
//!   [`Transport`](client::Transport) (HTTP, in-process or mocked).
//! - **[scope]**: [`AllocationScope`], [`ResourceScope`] and
//!   [`SingleResourceAllocation`] guarantee every resource is reported
//!   exactly once as allocated or failed.
//! - **[server]**: [`TrackerService`] serves a backend module over HTTP.
//! - **[config]** and **[telemetry]**: what `restrack-server` reads at
//!   startup.
//!
//! Records themselves live in [`restrack_backend`].
//!
//! ## Testing
//!
//! See [`mock`] for a transport that lets tests script the service's answers.

pub mod client;
pub mod config;
pub mod error;
pub mod mock;
pub mod scope;
pub mod server;
pub mod telemetry;

pub use client::{AllocationParams, Defaults, TrackerClient};
pub use config::{BackendConfig, ServerConfig};
pub use error::{BoxError, ServiceError, TrackerError};
pub use scope::{
    AllocationHandle, AllocationScope, ResourceScope, ResourceSlot, ScopeExit,
    SingleResourceAllocation,
};
pub use server::TrackerService;
