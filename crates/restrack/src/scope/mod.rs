//! # Scoped Allocation Protocol
//!
//! Scopes compose the client calls so that every acquired resource is
//! reported exactly once as allocated or failed, even when the code inside
//! the scope fails.
//!
//! | Scope | Entry | Normal exit | Failed exit |
//! |-------|-------|-------------|-------------|
//! | [`AllocationScope`] | BeginAllocation | AllocationSuccess (or rollback when `rollback_on_success`) | AllocationFailed, rollback |
//! | [`ResourceScope`] | AddResource | ResourceAllocated | ResourceAllocationFailed, rollback |
//! | [`SingleResourceAllocation`] | both, allocation first | resource first, then allocation | same order |
//!
//! Each scope can be driven in two phases (`enter`, then `exit` with a
//! [`ScopeExit`]) or through `run`, which wraps a body between the two and
//! hands the body's own error back unchanged. Errors raised while reporting a
//! failure or while rolling back are logged and discarded so they never mask
//! the error that caused the failed exit.
//!
//! ```rust,no_run
//! use restrack::client::{Defaults, TrackerClient};
//! use restrack::scope::AllocationScope;
//! use restrack::TrackerError;
//!
//! # async fn demo() -> Result<(), TrackerError> {
//! let client = TrackerClient::connect(Some("http://localhost:5001/restrack"), Defaults::default())?;
//!
//! let mut allocation = AllocationScope::new(client)
//!     .with_application("app:demo")
//!     .with_module("module:demo");
//!
//! let mut vm = allocation
//!     .run(|handle| async move {
//!         let mut resource = handle.resource().with_owner("lpds").with_resource_type("vm");
//!         resource
//!             .run(|slot| async move {
//!                 slot.set("i-0abc", None);
//!                 Ok::<_, TrackerError>(())
//!             })
//!             .await?;
//!         Ok::<_, TrackerError>(resource)
//!     })
//!     .await?;
//!
//! // Later, once the VM is gone:
//! vm.freed().await?;
//! # Ok(())
//! # }
//! ```

mod allocation;
mod composite;
mod resource;
mod rollback;

pub use allocation::{AllocationHandle, AllocationPhase, AllocationScope};
pub use composite::SingleResourceAllocation;
pub use resource::{ResourceData, ResourcePhase, ResourceScope, ResourceSlot};
pub use rollback::{NoRollback, Rollback, RollbackFn};

use std::fmt::Display;

/// How the code inside a scope finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeExit {
    Normal,
    Failed { reason: String },
}

impl ScopeExit {
    /// Failed exit caused by `error`.
    pub fn failed<E: Display + ?Sized>(error: &E) -> Self {
        ScopeExit::Failed {
            reason: failure_reason(error),
        }
    }
}

/// Renders `error` as `TypeName(message)`.
pub fn failure_reason<E: Display + ?Sized>(error: &E) -> String {
    format!("{}({error})", short_type_name::<E>())
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
