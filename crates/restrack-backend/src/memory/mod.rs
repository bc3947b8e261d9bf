//! # `memory` Backend Module
//!
//! Keeps every record in a [`RecordStore`] actor owned by the connection.
//! When the connection config names a `db` directory the store journals each
//! committed mutation there and replays the journal on connect, so records
//! survive a restart of the tracking service.

mod commands;

use crate::backend::{BackendModule, ConnectionConfig};
use crate::client::StoreClient;
use crate::command::{entry, CommandTable};
use crate::command::{
    AddResource, AllocationFailed, AllocationSuccess, BeginAllocation, GetAllocation, GetResource,
    ResourceAllocated, ResourceAllocationFailed, ResourceFreed,
};
use crate::error::BackendError;
use crate::journal::Journal;
use crate::store::RecordStore;
use async_trait::async_trait;
use tracing::{debug, info};

const STORE_BUFFER: usize = 64;

pub struct MemoryBackend;

/// Connection handle of the `memory` backend.
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    store: StoreClient,
}

impl MemoryConnection {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }
}

#[async_trait]
impl BackendModule for MemoryBackend {
    const NAME: &'static str = "memory";

    type Connection = MemoryConnection;

    async fn connect(config: &ConnectionConfig) -> Result<MemoryConnection, BackendError> {
        if config.host.is_some() || config.port.is_some() {
            debug!(host = ?config.host, port = ?config.port, "memory backend ignores host/port");
        }

        let (store, client) = match &config.db {
            Some(dir) => {
                let journal = Journal::open(
                    dir,
                    &config.allocation_collection,
                    &config.resource_collection,
                )
                .await?;
                info!(db = %dir.display(), "Opening journaled memory store");
                RecordStore::restore(STORE_BUFFER, journal).await?
            }
            None => RecordStore::new(STORE_BUFFER),
        };
        tokio::spawn(store.run());
        Ok(MemoryConnection::new(client))
    }

    fn commands() -> CommandTable<MemoryConnection> {
        vec![
            entry::<MemoryConnection, BeginAllocation>(),
            entry::<MemoryConnection, AllocationFailed>(),
            entry::<MemoryConnection, AllocationSuccess>(),
            entry::<MemoryConnection, AddResource>(),
            entry::<MemoryConnection, ResourceAllocated>(),
            entry::<MemoryConnection, ResourceAllocationFailed>(),
            entry::<MemoryConnection, ResourceFreed>(),
            entry::<MemoryConnection, GetAllocation>(),
            entry::<MemoryConnection, GetResource>(),
        ]
    }
}
