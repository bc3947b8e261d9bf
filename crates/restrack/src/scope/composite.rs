use super::allocation::AllocationScope;
use super::resource::{ResourceScope, ResourceSlot};
use super::rollback::{NoRollback, Rollback};
use super::ScopeExit;
use crate::client::TrackerClient;
use crate::error::TrackerError;
use restrack_backend::Oid;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// One allocation holding exactly one resource, entered and exited together.
///
/// Entry opens the allocation, then the resource; if the resource cannot be
/// registered the allocation is closed as failed before the error is
/// returned. Exit closes the resource first, then the allocation, and the
/// allocation never ends DONE while its resource did not reach ALLOCATED.
pub struct SingleResourceAllocation {
    allocation: AllocationScope,
    owner: Option<String>,
    resource_type: Option<String>,
    resource_rollback: Arc<dyn Rollback>,
    resource: Option<ResourceScope>,
}

impl SingleResourceAllocation {
    pub fn new(client: TrackerClient) -> Self {
        Self {
            allocation: AllocationScope::new(client),
            owner: None,
            resource_type: None,
            resource_rollback: Arc::new(NoRollback),
            resource: None,
        }
    }

    pub fn with_allocation_id(mut self, allocation_id: impl Into<String>) -> Self {
        self.allocation = self.allocation.with_allocation_id(allocation_id);
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.allocation = self.allocation.with_application(application);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.allocation = self.allocation.with_module(module);
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.allocation = self.allocation.with_timeout(timeout);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Rollback hook of the allocation.
    pub fn with_rollback(mut self, rollback: impl Rollback + 'static) -> Self {
        self.allocation = self.allocation.with_rollback(rollback);
        self
    }

    /// Rollback hook of the resource.
    pub fn with_resource_rollback(mut self, rollback: impl Rollback + 'static) -> Self {
        self.resource_rollback = Arc::new(rollback);
        self
    }

    pub fn with_rollback_on_success(mut self, rollback_on_success: bool) -> Self {
        self.allocation = self.allocation.with_rollback_on_success(rollback_on_success);
        self
    }

    pub fn with_strict_children(mut self, strict_children: bool) -> Self {
        self.allocation = self.allocation.with_strict_children(strict_children);
        self
    }

    pub fn allocation(&self) -> &AllocationScope {
        &self.allocation
    }

    pub fn resource(&self) -> Option<&ResourceScope> {
        self.resource.as_ref()
    }

    pub fn allocation_oid(&self) -> Option<&Oid> {
        self.allocation.oid()
    }

    pub fn resource_oid(&self) -> Option<&Oid> {
        self.resource.as_ref().and_then(ResourceScope::oid)
    }

    pub fn set_resource_data(
        &self,
        resource_id: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), TrackerError> {
        match &self.resource {
            Some(resource) => {
                resource.set_resource_data(resource_id, data);
                Ok(())
            }
            None => Err(TrackerError::ScopeState(
                "composite scope has not been entered".to_string(),
            )),
        }
    }

    pub async fn enter(&mut self) -> Result<ResourceSlot, TrackerError> {
        let handle = self.allocation.enter().await?;

        let mut resource = ResourceScope::new(handle);
        resource = match &self.owner {
            Some(owner) => resource.with_owner(owner.clone()),
            None => resource,
        };
        resource = match &self.resource_type {
            Some(resource_type) => resource.with_resource_type(resource_type.clone()),
            None => resource,
        };
        resource = resource.with_shared_rollback(self.resource_rollback.clone());

        match resource.enter().await {
            Ok(slot) => {
                self.resource = Some(resource);
                Ok(slot)
            }
            Err(e) => {
                if let Err(exit_error) = self.allocation.exit(ScopeExit::failed(&e)).await {
                    warn!(error = %exit_error, "Allocation exit after failed resource entry, discarding");
                }
                Err(e)
            }
        }
    }

    /// Exits the resource, then the allocation.
    ///
    /// The allocation only reports success when the resource reached
    /// ALLOCATED. If the resource exit fails, the allocation is closed as
    /// failed with that error as the reason, and the error is returned. On a
    /// failed exit, report errors are logged and discarded.
    pub async fn exit(&mut self, exit: ScopeExit) -> Result<(), TrackerError> {
        let resource_error = match &mut self.resource {
            Some(resource) => resource.exit(exit.clone()).await.err(),
            None => None,
        };

        match (exit, resource_error) {
            (ScopeExit::Normal, None) => self.allocation.exit(ScopeExit::Normal).await,
            (ScopeExit::Normal, Some(e)) => {
                warn!(error = %e, "Resource did not reach ALLOCATED, failing the allocation");
                if let Err(exit_error) = self.allocation.exit(ScopeExit::failed(&e)).await {
                    warn!(error = %exit_error, "Allocation scope exit failed, discarding");
                }
                Err(e)
            }
            (failed, resource_error) => {
                if let Some(e) = resource_error {
                    warn!(error = %e, "Resource scope exit failed, discarding");
                }
                if let Err(e) = self.allocation.exit(failed).await {
                    warn!(error = %e, "Allocation scope exit failed, discarding");
                }
                Ok(())
            }
        }
    }

    /// Reports ResourceFreed for the single resource.
    pub async fn freed(&mut self) -> Result<(), TrackerError> {
        match &mut self.resource {
            Some(resource) => resource.freed().await,
            None => Err(TrackerError::ScopeState(
                "composite scope has no resource to free".to_string(),
            )),
        }
    }

    /// Enters both scopes, runs `body` with the resource slot, and exits.
    ///
    /// A body error is returned unchanged. After a successful body, an error
    /// closing the resource or reporting the allocation is returned through
    /// `From<TrackerError>`.
    pub async fn run<T, E, F, Fut>(&mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(ResourceSlot) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<TrackerError>,
    {
        let slot = self.enter().await?;
        match body(slot).await {
            Ok(value) => {
                self.exit(ScopeExit::Normal).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(exit_error) = self.exit(ScopeExit::failed(&e)).await {
                    warn!(error = %exit_error, "Composite scope exit failed, discarding");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Defaults;
    use crate::mock::{answer_err, answer_ok, create_mock_transport};
    use crate::scope::AllocationPhase;
    use serde_json::json;

    fn client(transport: Arc<crate::mock::MockTransport>) -> TrackerClient {
        TrackerClient::new(
            transport,
            Defaults::default()
                .with_application("app:demo")
                .with_module("module:demo"),
        )
    }

    #[tokio::test]
    async fn test_exit_order_is_resource_then_allocation() {
        let (transport, mut receiver) = create_mock_transport(8);
        let mut scope = SingleResourceAllocation::new(client(transport))
            .with_owner("lpds")
            .with_resource_type("vm");

        let task = tokio::spawn(async move {
            let result = scope
                .run(|slot| async move {
                    slot.set("i-1", None);
                    Ok::<_, TrackerError>(())
                })
                .await;
            (result, scope)
        });

        answer_ok(&mut receiver, "BeginAllocation", json!("alloc-1")).await.unwrap();
        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        answer_ok(&mut receiver, "ResourceAllocated", json!("res-1")).await.unwrap();
        answer_ok(&mut receiver, "AllocationSuccess", json!("alloc-1")).await.unwrap();

        let (result, scope) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(scope.resource_oid(), Some(&Oid::from("res-1")));
        assert_eq!(scope.allocation_oid(), Some(&Oid::from("alloc-1")));
    }

    #[tokio::test]
    async fn test_failed_resource_entry_closes_allocation() {
        let (transport, mut receiver) = create_mock_transport(8);
        let mut scope = SingleResourceAllocation::new(client(transport))
            .with_owner("lpds")
            .with_resource_type("vm");

        let task = tokio::spawn(async move {
            scope
                .run(|_slot| async { Ok::<_, TrackerError>(()) })
                .await
        });

        answer_ok(&mut receiver, "BeginAllocation", json!("alloc-1")).await.unwrap();
        answer_err(&mut receiver, "AddResource", "Allocation not found: alloc-1")
            .await
            .unwrap();
        let failed = answer_ok(&mut receiver, "AllocationFailed", json!("alloc-1"))
            .await
            .unwrap();
        assert_eq!(
            failed.fields["reason"],
            json!("TrackerError(Backend error: Allocation not found: alloc-1)")
        );

        assert!(matches!(task.await.unwrap(), Err(TrackerError::Backend(_))));
    }

    #[tokio::test]
    async fn test_missing_data_fails_the_allocation() {
        let (transport, mut receiver) = create_mock_transport(8);
        let mut scope = SingleResourceAllocation::new(client(transport))
            .with_owner("lpds")
            .with_resource_type("vm");

        let task = tokio::spawn(async move {
            let result = scope
                .run(|_slot| async { Ok::<_, TrackerError>(()) })
                .await;
            (result, scope.allocation().phase())
        });

        answer_ok(&mut receiver, "BeginAllocation", json!("alloc-1")).await.unwrap();
        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        answer_ok(&mut receiver, "ResourceAllocationFailed", json!("res-1"))
            .await
            .unwrap();
        let failed = answer_ok(&mut receiver, "AllocationFailed", json!("alloc-1"))
            .await
            .unwrap();
        assert_eq!(
            failed.fields["reason"],
            json!("TrackerError(Resource data was not supplied before the resource scope closed)")
        );

        let (result, phase) = task.await.unwrap();
        assert!(matches!(result, Err(TrackerError::MissingResourceData)));
        assert_eq!(phase, AllocationPhase::Failed);
    }

    #[tokio::test]
    async fn test_rejected_resource_report_fails_both_records() {
        let (transport, mut receiver) = create_mock_transport(8);
        let mut scope = SingleResourceAllocation::new(client(transport))
            .with_owner("lpds")
            .with_resource_type("vm");

        let task = tokio::spawn(async move {
            scope
                .run(|slot| async move {
                    slot.set("i-1", None);
                    Ok::<_, TrackerError>("body value")
                })
                .await
        });

        answer_ok(&mut receiver, "BeginAllocation", json!("alloc-1")).await.unwrap();
        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        answer_err(&mut receiver, "ResourceAllocated", "Record store closed")
            .await
            .unwrap();
        answer_err(&mut receiver, "ResourceAllocationFailed", "Record store closed")
            .await
            .unwrap();
        answer_ok(&mut receiver, "AllocationFailed", json!("alloc-1"))
            .await
            .unwrap();

        assert!(matches!(task.await.unwrap(), Err(TrackerError::Backend(_))));
    }

    #[tokio::test]
    async fn test_failed_body_keeps_its_error() {
        let (transport, mut receiver) = create_mock_transport(8);
        let mut scope = SingleResourceAllocation::new(client(transport))
            .with_owner("lpds")
            .with_resource_type("vm");

        let task = tokio::spawn(async move {
            scope
                .run(|_slot| async { Err::<(), _>(TrackerError::Transport("no capacity".into())) })
                .await
        });

        answer_ok(&mut receiver, "BeginAllocation", json!("alloc-1")).await.unwrap();
        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        answer_err(&mut receiver, "ResourceAllocationFailed", "Record store closed")
            .await
            .unwrap();
        answer_err(&mut receiver, "AllocationFailed", "Record store closed")
            .await
            .unwrap();

        match task.await.unwrap() {
            Err(TrackerError::Transport(message)) => assert_eq!(message, "no capacity"),
            other => panic!("Expected the body's error, got {other:?}"),
        }
    }
}
