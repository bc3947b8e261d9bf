//! # State-Machine Commands
//!
//! One parameter struct per command kind. Each struct is the complete,
//! fixed field set of its wire message: unknown fields and missing required
//! fields are rejected when the command is constructed, before any backend
//! is touched.
//!
//! | Command                    | Expects             | Effect                                     |
//! |----------------------------|---------------------|--------------------------------------------|
//! | [`BeginAllocation`]        | -                   | new allocation, `PENDING`, deadline set    |
//! | [`AllocationFailed`]       | allocation `PENDING`| `FAILED`, reason, close time               |
//! | [`AllocationSuccess`]      | allocation `PENDING`| `DONE`, close time                         |
//! | [`AddResource`]            | allocation exists   | new resource, `PENDING`                    |
//! | [`ResourceAllocated`]      | resource `PENDING`  | `ALLOCATED`, resource id, allocation time  |
//! | [`ResourceAllocationFailed`]| resource `PENDING` | `FAILED`, reason, close time               |
//! | [`ResourceFreed`]          | resource `ALLOCATED`| `FREE`, close time                         |
//! | [`GetAllocation`]          | allocation exists   | none (returns the record)                  |
//! | [`GetResource`]            | resource exists     | none (returns the record)                  |
//!
//! A backend module supplies the behaviour by implementing
//! [`Command<C>`] for [`Stamped<P>`] with its own connection type `C`.

use crate::error::BackendError;
use crate::record::Oid;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The typed field set of one command kind.
pub trait CommandParams: Serialize + DeserializeOwned + Send + 'static {
    /// The `cmd` value this command is dispatched under.
    const NAME: &'static str;

    /// Checks constraints serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Command parameters together with the moment the request arrived.
///
/// The arrival time is the only clock used for deadlines, close times and
/// allocation times, so recorded timestamps follow request order rather
/// than backend write order.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<P> {
    pub params: P,
    pub arrival_time: DateTime<Utc>,
}

/// A constructed command, ready to run against a backend connection `C`.
#[async_trait]
pub trait Command<C>: Send {
    async fn perform(self: Box<Self>, conn: &C) -> Result<Value, BackendError>;
}

/// Builds a command from the message fields (without `cmd`) and its arrival time.
pub type Constructor<C> =
    fn(Map<String, Value>, DateTime<Utc>) -> Result<Box<dyn Command<C>>, BackendError>;

/// The `(cmd, constructor)` pairs a backend module contributes.
pub type CommandTable<C> = Vec<(&'static str, Constructor<C>)>;

/// Generic constructor for any command kind `P` that backend `C` implements.
pub fn construct<C, P>(
    fields: Map<String, Value>,
    arrival_time: DateTime<Utc>,
) -> Result<Box<dyn Command<C>>, BackendError>
where
    P: CommandParams,
    Stamped<P>: Command<C>,
{
    let params: P = serde_json::from_value(Value::Object(fields))
        .map_err(|e| BackendError::invalid(P::NAME, e.to_string()))?;
    params
        .validate()
        .map_err(|reason| BackendError::invalid(P::NAME, reason))?;
    Ok(Box::new(Stamped {
        params,
        arrival_time,
    }))
}

/// The table entry for command kind `P`.
pub fn entry<C, P>() -> (&'static str, Constructor<C>)
where
    P: CommandParams,
    Stamped<P>: Command<C>,
{
    (P::NAME, construct::<C, P>)
}

/// `arrival + timeout_secs`, rejecting timeouts that overflow the calendar.
pub fn deadline_after(
    arrival_time: DateTime<Utc>,
    timeout_secs: u64,
) -> Result<DateTime<Utc>, BackendError> {
    i64::try_from(timeout_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|timeout| arrival_time.checked_add_signed(timeout))
        .ok_or_else(|| {
            BackendError::invalid(
                BeginAllocation::NAME,
                format!("timeout of {timeout_secs}s is out of range"),
            )
        })
}

/// Wire form of an operation's result: the affected record's oid.
pub fn oid_result(oid: Oid) -> Value {
    Value::String(oid.into_string())
}

// =============================================================================
// COMMAND PARAMETERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeginAllocation {
    /// Caller's logical identifier. The backend generates one when absent.
    #[serde(default)]
    pub allocation_id: Option<String>,
    pub application: String,
    pub module: String,
    /// Seconds from arrival until the advisory deadline.
    pub timeout: u64,
}

impl CommandParams for BeginAllocation {
    const NAME: &'static str = "BeginAllocation";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationFailed {
    pub oid: Oid,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CommandParams for AllocationFailed {
    const NAME: &'static str = "AllocationFailed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationSuccess {
    pub oid: Oid,
}

impl CommandParams for AllocationSuccess {
    const NAME: &'static str = "AllocationSuccess";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddResource {
    pub allocation_oid: Oid,
    pub resource_owner: String,
    pub resource_type: String,
}

impl CommandParams for AddResource {
    const NAME: &'static str = "AddResource";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceAllocated {
    pub oid: Oid,
    pub resource_id: String,
    /// Opaque caller data stored alongside the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandParams for ResourceAllocated {
    const NAME: &'static str = "ResourceAllocated";

    fn validate(&self) -> Result<(), String> {
        if self.resource_id.trim().is_empty() {
            return Err("resource_id must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceAllocationFailed {
    pub oid: Oid,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CommandParams for ResourceAllocationFailed {
    const NAME: &'static str = "ResourceAllocationFailed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceFreed {
    pub oid: Oid,
}

impl CommandParams for ResourceFreed {
    const NAME: &'static str = "ResourceFreed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetAllocation {
    pub oid: Oid,
}

impl CommandParams for GetAllocation {
    const NAME: &'static str = "GetAllocation";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetResource {
    pub oid: Oid,
}

impl CommandParams for GetResource {
    const NAME: &'static str = "GetResource";
}
