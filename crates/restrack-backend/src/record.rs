//! # Records & State Machine
//!
//! The two record kinds tracked by the service and the legal transitions
//! between their states.
//!
//! ```text
//! Allocation:  PENDING ──► DONE
//!                 └──────► FAILED
//!
//! Resource:    PENDING ──► ALLOCATED ──► FREE
//!                 └──────► FAILED
//! ```
//!
//! Every transition names the state it expects to find. The store applies a
//! transition only when the stored state matches, so a duplicated or
//! reordered request can never overwrite a terminal record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use uuid::Uuid;

/// Backend-assigned opaque record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(String);

impl Oid {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Oid {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for Oid {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which collection a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Allocation,
    Resource,
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Allocation => f.write_str("Allocation"),
            RecordKind::Resource => f.write_str("Resource"),
        }
    }
}

// =============================================================================
// ALLOCATIONS
// =============================================================================

/// Lifecycle state of an allocation. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationState {
    Pending,
    Done,
    Failed,
}

impl AllocationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AllocationState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AllocationState::Pending => "PENDING",
            AllocationState::Done => "DONE",
            AllocationState::Failed => "FAILED",
        }
    }
}

impl Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical unit of work owning zero or more resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub oid: Oid,
    pub allocation_id: String,
    pub application: String,
    pub module: String,
    pub state: AllocationState,
    /// Arrival time plus the requested timeout. Advisory only.
    pub deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_time: Option<DateTime<Utc>>,
}

/// Fields of an allocation that the caller supplies; the store assigns the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAllocation {
    pub allocation_id: String,
    pub application: String,
    pub module: String,
    pub deadline: DateTime<Utc>,
}

impl NewAllocation {
    pub fn into_record(self, oid: Oid) -> AllocationRecord {
        AllocationRecord {
            oid,
            allocation_id: self.allocation_id,
            application: self.application,
            module: self.module,
            state: AllocationState::Pending,
            deadline: self.deadline,
            reason: None,
            close_time: None,
        }
    }
}

/// A state change requested for an allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationTransition {
    Succeed,
    Fail { reason: Option<String> },
}

impl AllocationTransition {
    /// The state the record must be in for this transition to apply.
    pub fn expected(&self) -> AllocationState {
        AllocationState::Pending
    }

    pub fn target(&self) -> AllocationState {
        match self {
            AllocationTransition::Succeed => AllocationState::Done,
            AllocationTransition::Fail { .. } => AllocationState::Failed,
        }
    }

    /// Applies the change. The caller has already checked [`Self::expected`].
    pub fn apply(self, record: &mut AllocationRecord, at: DateTime<Utc>) {
        record.state = self.target();
        record.close_time = Some(at);
        if let AllocationTransition::Fail { reason } = self {
            record.reason = reason;
        }
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Lifecycle state of a resource. `Failed` and `Free` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    Pending,
    Allocated,
    Failed,
    Free,
}

impl ResourceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceState::Failed | ResourceState::Free)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceState::Pending => "PENDING",
            ResourceState::Allocated => "ALLOCATED",
            ResourceState::Failed => "FAILED",
            ResourceState::Free => "FREE",
        }
    }
}

impl Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One externally managed item (VM, image, ...) owned by exactly one allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub oid: Oid,
    /// Reference to the owning allocation.
    pub allocation_oid: Oid,
    pub owner: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub state: ResourceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub allocation_oid: Oid,
    pub owner: String,
    pub resource_type: String,
}

impl NewResource {
    pub fn into_record(self, oid: Oid) -> ResourceRecord {
        ResourceRecord {
            oid,
            allocation_oid: self.allocation_oid,
            owner: self.owner,
            resource_type: self.resource_type,
            state: ResourceState::Pending,
            resource_id: None,
            data: None,
            allocation_time: None,
            reason: None,
            close_time: None,
        }
    }
}

/// A state change requested for a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceTransition {
    Allocate {
        resource_id: String,
        data: Option<Value>,
    },
    Fail {
        reason: Option<String>,
    },
    Free,
}

impl ResourceTransition {
    pub fn expected(&self) -> ResourceState {
        match self {
            ResourceTransition::Allocate { .. } | ResourceTransition::Fail { .. } => {
                ResourceState::Pending
            }
            ResourceTransition::Free => ResourceState::Allocated,
        }
    }

    pub fn target(&self) -> ResourceState {
        match self {
            ResourceTransition::Allocate { .. } => ResourceState::Allocated,
            ResourceTransition::Fail { .. } => ResourceState::Failed,
            ResourceTransition::Free => ResourceState::Free,
        }
    }

    pub fn apply(self, record: &mut ResourceRecord, at: DateTime<Utc>) {
        record.state = self.target();
        match self {
            ResourceTransition::Allocate { resource_id, data } => {
                record.resource_id = Some(resource_id);
                record.data = data;
                record.allocation_time = Some(at);
            }
            ResourceTransition::Fail { reason } => {
                record.reason = reason;
                record.close_time = Some(at);
            }
            ResourceTransition::Free => {
                record.close_time = Some(at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn pending_resource() -> ResourceRecord {
        NewResource {
            allocation_oid: Oid::from("alloc"),
            owner: "lpds".into(),
            resource_type: "vm".into(),
        }
        .into_record(Oid::from("res"))
    }

    #[test]
    fn test_allocation_failure_sets_reason_and_close_time() {
        let mut record = NewAllocation {
            allocation_id: "a-1".into(),
            application: "app:demo".into(),
            module: "module:demo".into(),
            deadline: at(60),
        }
        .into_record(Oid::from("alloc"));

        AllocationTransition::Fail {
            reason: Some("boom".into()),
        }
        .apply(&mut record, at(5));

        assert_eq!(record.state, AllocationState::Failed);
        assert_eq!(record.reason.as_deref(), Some("boom"));
        assert_eq!(record.close_time, Some(at(5)));
        assert_eq!(record.deadline, at(60));
    }

    #[test]
    fn test_resource_transitions_expect_the_right_state() {
        assert_eq!(ResourceTransition::Free.expected(), ResourceState::Allocated);
        assert_eq!(
            ResourceTransition::Fail { reason: None }.expected(),
            ResourceState::Pending
        );

        let mut record = pending_resource();
        ResourceTransition::Allocate {
            resource_id: "i-123".into(),
            data: None,
        }
        .apply(&mut record, at(1));
        assert_eq!(record.state, ResourceState::Allocated);
        assert_eq!(record.resource_id.as_deref(), Some("i-123"));
        assert_eq!(record.allocation_time, Some(at(1)));
        assert!(record.close_time.is_none());

        ResourceTransition::Free.apply(&mut record, at(9));
        assert_eq!(record.state, ResourceState::Free);
        assert_eq!(record.close_time, Some(at(9)));
        assert!(record.state.is_terminal());
    }

    #[test]
    fn test_resource_record_uses_wire_field_names() {
        let value = serde_json::to_value(pending_resource()).unwrap();
        assert_eq!(value["type"], "vm");
        assert_eq!(value["state"], "PENDING");
        assert!(value.get("resource_id").is_none());
    }
}
