use super::MemoryConnection;
use crate::command::{deadline_after, oid_result, Command, Stamped};
use crate::command::{
    AddResource, AllocationFailed, AllocationSuccess, BeginAllocation, GetAllocation, GetResource,
    ResourceAllocated, ResourceAllocationFailed, ResourceFreed,
};
use crate::error::BackendError;
use crate::record::{
    AllocationTransition, NewAllocation, NewResource, RecordKind, ResourceTransition,
};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
impl Command<MemoryConnection> for Stamped<BeginAllocation> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let Stamped {
            params,
            arrival_time,
        } = *self;
        let deadline = deadline_after(arrival_time, params.timeout)?;
        let record = NewAllocation {
            allocation_id: params
                .allocation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            application: params.application,
            module: params.module,
            deadline,
        };
        let oid = conn.store().insert_allocation(record).await?;
        Ok(oid_result(oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<AllocationFailed> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let Stamped {
            params,
            arrival_time,
        } = *self;
        let record = conn
            .store()
            .transition_allocation(
                params.oid,
                AllocationTransition::Fail {
                    reason: params.reason,
                },
                arrival_time,
            )
            .await?;
        Ok(oid_result(record.oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<AllocationSuccess> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let record = conn
            .store()
            .transition_allocation(self.params.oid, AllocationTransition::Succeed, self.arrival_time)
            .await?;
        Ok(oid_result(record.oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<AddResource> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let params = self.params;
        let oid = conn
            .store()
            .insert_resource(NewResource {
                allocation_oid: params.allocation_oid,
                owner: params.resource_owner,
                resource_type: params.resource_type,
            })
            .await?;
        Ok(oid_result(oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<ResourceAllocated> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let Stamped {
            params,
            arrival_time,
        } = *self;
        let record = conn
            .store()
            .transition_resource(
                params.oid,
                ResourceTransition::Allocate {
                    resource_id: params.resource_id,
                    data: params.data,
                },
                arrival_time,
            )
            .await?;
        Ok(oid_result(record.oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<ResourceAllocationFailed> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let Stamped {
            params,
            arrival_time,
        } = *self;
        let record = conn
            .store()
            .transition_resource(
                params.oid,
                ResourceTransition::Fail {
                    reason: params.reason,
                },
                arrival_time,
            )
            .await?;
        Ok(oid_result(record.oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<ResourceFreed> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let record = conn
            .store()
            .transition_resource(self.params.oid, ResourceTransition::Free, self.arrival_time)
            .await?;
        Ok(oid_result(record.oid))
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<GetAllocation> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let oid = self.params.oid;
        match conn.store().get_allocation(oid.clone()).await? {
            Some(record) => Ok(serde_json::to_value(record)?),
            None => Err(BackendError::RecordNotFound {
                kind: RecordKind::Allocation,
                oid,
            }),
        }
    }
}

#[async_trait]
impl Command<MemoryConnection> for Stamped<GetResource> {
    async fn perform(self: Box<Self>, conn: &MemoryConnection) -> Result<Value, BackendError> {
        let oid = self.params.oid;
        match conn.store().get_resource(oid.clone()).await? {
            Some(record) => Ok(serde_json::to_value(record)?),
            None => Err(BackendError::RecordNotFound {
                kind: RecordKind::Resource,
                oid,
            }),
        }
    }
}
