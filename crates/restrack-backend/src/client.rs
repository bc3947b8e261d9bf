//! # Store Client
//!
//! The handle used by command implementations to talk to the record store.

use crate::error::BackendError;
use crate::message::{Response, StoreRequest};
use crate::record::{
    AllocationRecord, AllocationTransition, NewAllocation, NewResource, Oid, ResourceRecord,
    ResourceTransition,
};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

/// A cloneable handle to a [`RecordStore`](crate::RecordStore).
///
/// Holds only a sender, so cloning is cheap. The store shuts down once the
/// last clone is dropped.
#[derive(Clone, Debug)]
pub struct StoreClient {
    sender: mpsc::Sender<StoreRequest>,
}

impl StoreClient {
    pub fn new(sender: mpsc::Sender<StoreRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> StoreRequest,
    ) -> Result<T, BackendError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackendError::StoreClosed)?;
        response.await.map_err(|_| BackendError::StoreDropped)?
    }

    pub async fn insert_allocation(&self, record: NewAllocation) -> Result<Oid, BackendError> {
        self.request(|respond_to| StoreRequest::InsertAllocation { record, respond_to })
            .await
    }

    pub async fn insert_resource(&self, record: NewResource) -> Result<Oid, BackendError> {
        self.request(|respond_to| StoreRequest::InsertResource { record, respond_to })
            .await
    }

    pub async fn transition_allocation(
        &self,
        oid: Oid,
        transition: AllocationTransition,
        at: DateTime<Utc>,
    ) -> Result<AllocationRecord, BackendError> {
        self.request(|respond_to| StoreRequest::TransitionAllocation {
            oid,
            transition,
            at,
            respond_to,
        })
        .await
    }

    pub async fn transition_resource(
        &self,
        oid: Oid,
        transition: ResourceTransition,
        at: DateTime<Utc>,
    ) -> Result<ResourceRecord, BackendError> {
        self.request(|respond_to| StoreRequest::TransitionResource {
            oid,
            transition,
            at,
            respond_to,
        })
        .await
    }

    pub async fn get_allocation(&self, oid: Oid) -> Result<Option<AllocationRecord>, BackendError> {
        self.request(|respond_to| StoreRequest::GetAllocation { oid, respond_to })
            .await
    }

    pub async fn get_resource(&self, oid: Oid) -> Result<Option<ResourceRecord>, BackendError> {
        self.request(|respond_to| StoreRequest::GetResource { oid, respond_to })
            .await
    }
}
