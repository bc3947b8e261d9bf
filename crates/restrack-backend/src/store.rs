//! # Record Store Actor
//!
//! The `RecordStore` owns every allocation and resource record of the
//! `memory` backend and processes [`StoreRequest`]s one at a time. Because a
//! single task owns both maps, each request is applied atomically with
//! respect to every other request: a conditional transition reads the
//! current state and writes the new one without any interleaving.

use crate::client::StoreClient;
use crate::error::BackendError;
use crate::journal::Journal;
use crate::message::StoreRequest;
use crate::record::{
    AllocationRecord, AllocationTransition, NewAllocation, NewResource, Oid, RecordKind,
    ResourceRecord, ResourceTransition,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The actor half of the memory backend.
///
/// # Usage Pattern
///
/// 1.  **Create**: `RecordStore::new()` (or [`RecordStore::restore`] to
///     replay a journal) returns the store and a [`StoreClient`].
/// 2.  **Run**: spawn `store.run()` on the runtime.
/// 3.  **Use**: clone the client freely; the store stops when the last
///     clone is dropped.
///
/// ```rust
/// use restrack_backend::{NewAllocation, RecordStore};
///
/// #[tokio::main]
/// async fn main() {
///     let (store, client) = RecordStore::new(16);
///     tokio::spawn(store.run());
///
///     let oid = client
///         .insert_allocation(NewAllocation {
///             allocation_id: "a-1".into(),
///             application: "app".into(),
///             module: "module".into(),
///             deadline: chrono::Utc::now(),
///         })
///         .await
///         .unwrap();
///     assert!(client.get_allocation(oid).await.unwrap().is_some());
/// }
/// ```
pub struct RecordStore {
    receiver: mpsc::Receiver<StoreRequest>,
    allocations: HashMap<Oid, AllocationRecord>,
    resources: HashMap<Oid, ResourceRecord>,
    journal: Option<Journal>,
}

impl RecordStore {
    /// Creates an empty, volatile store and its client.
    ///
    /// `buffer_size` bounds the request channel; senders wait when it is full.
    pub fn new(buffer_size: usize) -> (Self, StoreClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let store = Self {
            receiver,
            allocations: HashMap::new(),
            resources: HashMap::new(),
            journal: None,
        };
        (store, StoreClient::new(sender))
    }

    /// Creates a store backed by `journal`, pre-loaded with its replayed records.
    pub async fn restore(
        buffer_size: usize,
        journal: Journal,
    ) -> Result<(Self, StoreClient), BackendError> {
        let replayed = journal.replay().await?;
        info!(
            allocations = replayed.allocations.len(),
            resources = replayed.resources.len(),
            "Journal replayed"
        );
        let (mut store, client) = Self::new(buffer_size);
        store.allocations = replayed.allocations;
        store.resources = replayed.resources;
        store.journal = Some(journal);
        Ok((store, client))
    }

    /// Runs the store's event loop until every client has been dropped.
    pub async fn run(mut self) {
        info!(
            allocations = self.allocations.len(),
            resources = self.resources.len(),
            durable = self.journal.is_some(),
            "Store started"
        );

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                StoreRequest::InsertAllocation { record, respond_to } => {
                    debug!(?record, "InsertAllocation");
                    let result = self.insert_allocation(record).await;
                    match &result {
                        Ok(oid) => info!(allocation_oid = %oid, size = self.allocations.len(), "Allocation created"),
                        Err(e) => warn!(error = %e, "InsertAllocation failed"),
                    }
                    let _ = respond_to.send(result);
                }
                StoreRequest::InsertResource { record, respond_to } => {
                    debug!(?record, "InsertResource");
                    let result = self.insert_resource(record).await;
                    match &result {
                        Ok(oid) => info!(resource_oid = %oid, size = self.resources.len(), "Resource created"),
                        Err(e) => warn!(error = %e, "InsertResource failed"),
                    }
                    let _ = respond_to.send(result);
                }
                StoreRequest::TransitionAllocation {
                    oid,
                    transition,
                    at,
                    respond_to,
                } => {
                    debug!(allocation_oid = %oid, ?transition, "TransitionAllocation");
                    let result = self.transition_allocation(oid.clone(), transition, at).await;
                    match &result {
                        Ok(record) => info!(allocation_oid = %oid, state = %record.state, "Allocation updated"),
                        Err(e) => warn!(allocation_oid = %oid, error = %e, "Allocation transition rejected"),
                    }
                    let _ = respond_to.send(result);
                }
                StoreRequest::TransitionResource {
                    oid,
                    transition,
                    at,
                    respond_to,
                } => {
                    debug!(resource_oid = %oid, ?transition, "TransitionResource");
                    let result = self.transition_resource(oid.clone(), transition, at).await;
                    match &result {
                        Ok(record) => info!(resource_oid = %oid, state = %record.state, "Resource updated"),
                        Err(e) => warn!(resource_oid = %oid, error = %e, "Resource transition rejected"),
                    }
                    let _ = respond_to.send(result);
                }
                StoreRequest::GetAllocation { oid, respond_to } => {
                    let record = self.allocations.get(&oid).cloned();
                    debug!(allocation_oid = %oid, found = record.is_some(), "GetAllocation");
                    let _ = respond_to.send(Ok(record));
                }
                StoreRequest::GetResource { oid, respond_to } => {
                    let record = self.resources.get(&oid).cloned();
                    debug!(resource_oid = %oid, found = record.is_some(), "GetResource");
                    let _ = respond_to.send(Ok(record));
                }
            }
        }

        info!(
            allocations = self.allocations.len(),
            resources = self.resources.len(),
            "Shutdown"
        );
    }

    async fn insert_allocation(&mut self, record: NewAllocation) -> Result<Oid, BackendError> {
        let oid = Oid::generate();
        let record = record.into_record(oid.clone());
        if let Some(journal) = &self.journal {
            journal.append_allocation(&record).await?;
        }
        self.allocations.insert(oid.clone(), record);
        Ok(oid)
    }

    async fn insert_resource(&mut self, record: NewResource) -> Result<Oid, BackendError> {
        if !self.allocations.contains_key(&record.allocation_oid) {
            return Err(BackendError::RecordNotFound {
                kind: RecordKind::Allocation,
                oid: record.allocation_oid,
            });
        }
        let oid = Oid::generate();
        let record = record.into_record(oid.clone());
        if let Some(journal) = &self.journal {
            journal.append_resource(&record).await?;
        }
        self.resources.insert(oid.clone(), record);
        Ok(oid)
    }

    async fn transition_allocation(
        &mut self,
        oid: Oid,
        transition: AllocationTransition,
        at: DateTime<Utc>,
    ) -> Result<AllocationRecord, BackendError> {
        let current = self
            .allocations
            .get(&oid)
            .ok_or_else(|| BackendError::RecordNotFound {
                kind: RecordKind::Allocation,
                oid: oid.clone(),
            })?;

        let expected = transition.expected();
        if current.state != expected {
            return Err(BackendError::TransitionConflict {
                kind: RecordKind::Allocation,
                oid,
                expected: expected.to_string(),
                actual: current.state.to_string(),
            });
        }

        let mut next = current.clone();
        transition.apply(&mut next, at);
        if let Some(journal) = &self.journal {
            journal.append_allocation(&next).await?;
        }
        self.allocations.insert(oid, next.clone());
        Ok(next)
    }

    async fn transition_resource(
        &mut self,
        oid: Oid,
        transition: ResourceTransition,
        at: DateTime<Utc>,
    ) -> Result<ResourceRecord, BackendError> {
        let current = self
            .resources
            .get(&oid)
            .ok_or_else(|| BackendError::RecordNotFound {
                kind: RecordKind::Resource,
                oid: oid.clone(),
            })?;

        let expected = transition.expected();
        if current.state != expected {
            return Err(BackendError::TransitionConflict {
                kind: RecordKind::Resource,
                oid,
                expected: expected.to_string(),
                actual: current.state.to_string(),
            });
        }

        let mut next = current.clone();
        transition.apply(&mut next, at);
        if let Some(journal) = &self.journal {
            journal.append_resource(&next).await?;
        }
        self.resources.insert(oid, next.clone());
        Ok(next)
    }
}
