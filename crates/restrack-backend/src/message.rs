//! # Store Messages
//!
//! The requests a [`StoreClient`](crate::StoreClient) sends to the
//! [`RecordStore`](crate::RecordStore) actor. Each one carries a oneshot
//! sender for its reply.
//!
//! The set is deliberately primitive: two inserts, two conditional
//! transitions and two lookups. Command semantics live in the command
//! implementations, not here.

use crate::error::BackendError;
use crate::record::{
    AllocationRecord, AllocationTransition, NewAllocation, NewResource, Oid, ResourceRecord,
    ResourceTransition,
};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the store.
pub type Response<T> = oneshot::Sender<Result<T, BackendError>>;

#[derive(Debug)]
pub enum StoreRequest {
    InsertAllocation {
        record: NewAllocation,
        respond_to: Response<Oid>,
    },
    InsertResource {
        record: NewResource,
        respond_to: Response<Oid>,
    },
    TransitionAllocation {
        oid: Oid,
        transition: AllocationTransition,
        at: DateTime<Utc>,
        respond_to: Response<AllocationRecord>,
    },
    TransitionResource {
        oid: Oid,
        transition: ResourceTransition,
        at: DateTime<Utc>,
        respond_to: Response<ResourceRecord>,
    },
    GetAllocation {
        oid: Oid,
        respond_to: Response<Option<AllocationRecord>>,
    },
    GetResource {
        oid: Oid,
        respond_to: Response<Option<ResourceRecord>>,
    },
}
