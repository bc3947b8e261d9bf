//! # Store Mocks
//!
//! Helpers for testing code that talks to a [`StoreClient`] without running
//! a [`RecordStore`](crate::RecordStore).
//!
//! [`create_mock_store`] hands back a client wired to a channel the test
//! controls. The test pulls each request off the receiver with one of the
//! `expect_*` helpers, asserts on its contents, and answers through the
//! returned responder. This makes store failures (closed store, conflicts)
//! as easy to simulate as successes.
//!
//! ```rust
//! use restrack_backend::mock::{create_mock_store, expect_insert_allocation};
//! use restrack_backend::{NewAllocation, Oid};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (client, mut receiver) = create_mock_store(4);
//!
//!     let call = tokio::spawn(async move {
//!         client
//!             .insert_allocation(NewAllocation {
//!                 allocation_id: "a-1".into(),
//!                 application: "app".into(),
//!                 module: "module".into(),
//!                 deadline: chrono::Utc::now(),
//!             })
//!             .await
//!     });
//!
//!     let (record, respond_to) = expect_insert_allocation(&mut receiver).await.unwrap();
//!     assert_eq!(record.allocation_id, "a-1");
//!     respond_to.send(Ok(Oid::from("oid-1"))).unwrap();
//!
//!     assert_eq!(call.await.unwrap().unwrap(), Oid::from("oid-1"));
//! }
//! ```

use crate::client::StoreClient;
use crate::message::{Response, StoreRequest};
use crate::record::{
    AllocationRecord, AllocationTransition, NewAllocation, NewResource, Oid, ResourceRecord,
    ResourceTransition,
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Creates a store client and the receiver its requests arrive on.
pub fn create_mock_store(buffer_size: usize) -> (StoreClient, mpsc::Receiver<StoreRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (StoreClient::new(sender), receiver)
}

/// Next request, if it is an allocation insert.
pub async fn expect_insert_allocation(
    receiver: &mut mpsc::Receiver<StoreRequest>,
) -> Option<(NewAllocation, Response<Oid>)> {
    match receiver.recv().await {
        Some(StoreRequest::InsertAllocation { record, respond_to }) => Some((record, respond_to)),
        _ => None,
    }
}

/// Next request, if it is a resource insert.
pub async fn expect_insert_resource(
    receiver: &mut mpsc::Receiver<StoreRequest>,
) -> Option<(NewResource, Response<Oid>)> {
    match receiver.recv().await {
        Some(StoreRequest::InsertResource { record, respond_to }) => Some((record, respond_to)),
        _ => None,
    }
}

/// Next request, if it is an allocation transition.
pub async fn expect_transition_allocation(
    receiver: &mut mpsc::Receiver<StoreRequest>,
) -> Option<(
    Oid,
    AllocationTransition,
    DateTime<Utc>,
    Response<AllocationRecord>,
)> {
    match receiver.recv().await {
        Some(StoreRequest::TransitionAllocation {
            oid,
            transition,
            at,
            respond_to,
        }) => Some((oid, transition, at, respond_to)),
        _ => None,
    }
}

/// Next request, if it is a resource transition.
pub async fn expect_transition_resource(
    receiver: &mut mpsc::Receiver<StoreRequest>,
) -> Option<(
    Oid,
    ResourceTransition,
    DateTime<Utc>,
    Response<ResourceRecord>,
)> {
    match receiver.recv().await {
        Some(StoreRequest::TransitionResource {
            oid,
            transition,
            at,
            respond_to,
        }) => Some((oid, transition, at, respond_to)),
        _ => None,
    }
}

/// Next request, if it is a resource lookup.
pub async fn expect_get_resource(
    receiver: &mut mpsc::Receiver<StoreRequest>,
) -> Option<(Oid, Response<Option<ResourceRecord>>)> {
    match receiver.recv().await {
        Some(StoreRequest::GetResource { oid, respond_to }) => Some((oid, respond_to)),
        _ => None,
    }
}
