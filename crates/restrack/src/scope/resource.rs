use super::allocation::AllocationHandle;
use super::rollback::{NoRollback, Rollback};
use super::{failure_reason, ScopeExit};
use crate::error::TrackerError;
use restrack_backend::Oid;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const MISSING_DATA_REASON: &str = "resource data was not supplied";
const BLANK_ID_REASON: &str = "resource id is blank";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePhase {
    Unopened,
    Pending,
    Allocated,
    Failed,
    Freed,
}

/// What the caller learned about the acquired resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceData {
    pub resource_id: String,
    pub data: Option<Value>,
}

/// Where code inside a resource scope puts the acquired resource's id.
#[derive(Debug, Clone, Default)]
pub struct ResourceSlot {
    inner: Arc<Mutex<Option<ResourceData>>>,
}

impl ResourceSlot {
    /// Records the external id (and optional opaque data). A later call
    /// replaces an earlier one.
    pub fn set(&self, resource_id: impl Into<String>, data: Option<Value>) {
        *self.lock() = Some(ResourceData {
            resource_id: resource_id.into(),
            data,
        });
    }

    pub fn get(&self) -> Option<ResourceData> {
        self.lock().clone()
    }

    fn take(&self) -> Option<ResourceData> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ResourceData>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scope around the acquisition of one resource inside an allocation.
///
/// Entry reports AddResource. Normal exit reports ResourceAllocated with the
/// data put into the [`ResourceSlot`]; failed exit reports
/// ResourceAllocationFailed and runs the rollback hook. Freeing happens
/// later, through [`ResourceScope::freed`].
pub struct ResourceScope {
    allocation: AllocationHandle,
    owner: Option<String>,
    resource_type: Option<String>,
    rollback: Arc<dyn Rollback>,
    slot: ResourceSlot,
    oid: Option<Oid>,
    phase: ResourcePhase,
}

impl ResourceScope {
    pub fn new(allocation: AllocationHandle) -> Self {
        Self {
            allocation,
            owner: None,
            resource_type: None,
            rollback: Arc::new(NoRollback),
            slot: ResourceSlot::default(),
            oid: None,
            phase: ResourcePhase::Unopened,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_rollback(self, rollback: impl Rollback + 'static) -> Self {
        self.with_shared_rollback(Arc::new(rollback))
    }

    pub fn with_shared_rollback(mut self, rollback: Arc<dyn Rollback>) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn phase(&self) -> ResourcePhase {
        self.phase
    }

    /// Backend oid, once entered.
    pub fn oid(&self) -> Option<&Oid> {
        self.oid.as_ref()
    }

    pub fn allocation(&self) -> &AllocationHandle {
        &self.allocation
    }

    pub fn slot(&self) -> ResourceSlot {
        self.slot.clone()
    }

    pub fn set_resource_data(&self, resource_id: impl Into<String>, data: Option<Value>) {
        self.slot.set(resource_id, data);
    }

    pub async fn enter(&mut self) -> Result<ResourceSlot, TrackerError> {
        if self.phase != ResourcePhase::Unopened {
            return Err(TrackerError::ScopeState(format!(
                "resource scope entered twice (phase {:?})",
                self.phase
            )));
        }
        self.allocation.ensure_open()?;

        self.allocation.child_opened();
        let registered = self
            .allocation
            .client()
            .add_resource_record(
                self.allocation.oid(),
                self.owner.clone(),
                self.resource_type.clone(),
            )
            .await;
        let oid = match registered {
            Ok(oid) => oid,
            Err(e) => {
                self.allocation.child_failed();
                self.phase = ResourcePhase::Failed;
                return Err(e);
            }
        };

        info!(allocation_oid = %self.allocation.oid(), resource_oid = %oid, "Resource scope entered");
        self.oid = Some(oid);
        self.phase = ResourcePhase::Pending;
        Ok(self.slot.clone())
    }

    /// Leaves the scope.
    ///
    /// Normal exit without data in the slot (or with a blank id) is treated
    /// as a failure: the resource is reported FAILED and
    /// [`TrackerError::MissingResourceData`] is returned. A ResourceAllocated
    /// report the service rejects is followed by ResourceAllocationFailed and
    /// the rollback hook. A transport failure leaves the record as it is,
    /// since the report may have been applied.
    pub async fn exit(&mut self, exit: ScopeExit) -> Result<(), TrackerError> {
        let oid = match (&self.oid, self.phase) {
            (Some(oid), ResourcePhase::Pending) => oid.clone(),
            _ => {
                return Err(TrackerError::ScopeState(format!(
                    "cannot exit resource scope in phase {:?}",
                    self.phase
                )))
            }
        };

        match exit {
            ScopeExit::Failed { reason } => {
                self.fail(&oid, reason).await;
                Ok(())
            }
            ScopeExit::Normal => match self.slot.take() {
                None => {
                    self.fail(&oid, MISSING_DATA_REASON.to_string()).await;
                    Err(TrackerError::MissingResourceData)
                }
                Some(ResourceData { resource_id, .. }) if resource_id.trim().is_empty() => {
                    self.fail(&oid, BLANK_ID_REASON.to_string()).await;
                    Err(TrackerError::MissingResourceData)
                }
                Some(ResourceData { resource_id, data }) => {
                    let reported = self
                        .allocation
                        .client()
                        .resource_allocated(&oid, &resource_id, data)
                        .await;
                    match reported {
                        Ok(()) => {
                            self.allocation.child_allocated();
                            self.phase = ResourcePhase::Allocated;
                            info!(resource_oid = %oid, %resource_id, "Resource allocated");
                            Ok(())
                        }
                        // The service refused the report, so the record is
                        // still PENDING and can be closed as FAILED.
                        Err(e @ TrackerError::Backend(_)) => {
                            self.fail(&oid, failure_reason(&e)).await;
                            Err(e)
                        }
                        Err(e) => {
                            self.allocation.child_failed();
                            self.phase = ResourcePhase::Failed;
                            Err(e)
                        }
                    }
                }
            },
        }
    }

    async fn fail(&mut self, oid: &Oid, reason: String) {
        self.allocation.child_failed();
        self.phase = ResourcePhase::Failed;
        info!(resource_oid = %oid, %reason, "Resource allocation failed");

        if let Err(e) = self
            .allocation
            .client()
            .resource_allocation_failed(oid, Some(reason))
            .await
        {
            warn!(resource_oid = %oid, error = %e, "Could not report resource failure");
        }
        if let Err(e) = self.rollback.rollback().await {
            warn!(resource_oid = %oid, error = %e, "Rollback failed, discarding");
        }
    }

    /// Reports ResourceFreed. Only legal once the resource reached ALLOCATED;
    /// usually called long after the scope has closed.
    pub async fn freed(&mut self) -> Result<(), TrackerError> {
        let oid = match (&self.oid, self.phase) {
            (Some(oid), ResourcePhase::Allocated) => oid.clone(),
            _ => {
                return Err(TrackerError::ScopeState(format!(
                    "cannot free resource in phase {:?}",
                    self.phase
                )))
            }
        };
        self.allocation.client().resource_freed(&oid).await?;
        self.phase = ResourcePhase::Freed;
        info!(resource_oid = %oid, "Resource freed");
        Ok(())
    }

    /// Enters, runs `body` with the slot, and exits according to its outcome.
    ///
    /// The body's error is returned unchanged.
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
                    warn!(error = %exit_error, "Resource scope exit failed, discarding");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Defaults, TrackerClient};
    use crate::mock::{
        answer_err, answer_ok, create_mock_transport, expect_command, MockTransport, TransportRequest,
    };
    use crate::scope::RollbackFn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::scope::AllocationScope;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn entered_allocation(
        transport: Arc<MockTransport>,
        receiver: &mut mpsc::Receiver<TransportRequest>,
    ) -> AllocationHandle {
        let client = TrackerClient::new(
            transport,
            Defaults::default()
                .with_application("app:demo")
                .with_module("module:demo")
                .with_resource_owner("lpds"),
        );
        let mut scope = AllocationScope::new(client);
        let enter = tokio::spawn(async move { scope.enter().await });
        answer_ok(receiver, "BeginAllocation", json!("alloc-1")).await.unwrap();
        enter.await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_allocated_then_freed() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;

        let task = tokio::spawn(async move {
            let mut resource = handle.resource().with_resource_type("image");
            resource
                .run(|slot| async move {
                    slot.set("img-7", Some(json!({"size": 2})));
                    Ok::<_, TrackerError>(())
                })
                .await?;
            resource.freed().await?;
            Ok::<_, TrackerError>(resource.phase())
        });

        let add = answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        assert_eq!(add.fields["allocation_oid"], json!("alloc-1"));
        assert_eq!(add.fields["resource_owner"], json!("lpds"));
        assert_eq!(add.fields["resource_type"], json!("image"));

        let allocated = answer_ok(&mut receiver, "ResourceAllocated", json!("res-1"))
            .await
            .unwrap();
        assert_eq!(allocated.fields["resource_id"], json!("img-7"));
        assert_eq!(allocated.fields["data"], json!({"size": 2}));

        answer_ok(&mut receiver, "ResourceFreed", json!("res-1")).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), ResourcePhase::Freed);
    }

    #[tokio::test]
    async fn test_missing_data_reports_failure() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;

        let task = tokio::spawn(async move {
            let mut resource = handle.resource().with_resource_type("vm");
            let result = resource
                .run(|_slot| async { Ok::<_, TrackerError>(()) })
                .await;
            (result, resource.phase())
        });

        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        let failed = answer_ok(&mut receiver, "ResourceAllocationFailed", json!("res-1"))
            .await
            .unwrap();
        assert_eq!(failed.fields["reason"], json!(MISSING_DATA_REASON));

        let (result, phase) = task.await.unwrap();
        assert!(matches!(result, Err(TrackerError::MissingResourceData)));
        assert_eq!(phase, ResourcePhase::Failed);
    }

    fn flagged_rollback(flag: Arc<AtomicBool>) -> impl Rollback {
        RollbackFn::new(move || {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), crate::error::BoxError>(())
            }
        })
    }

    #[tokio::test]
    async fn test_blank_resource_id_counts_as_missing_data() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;
        let rolled_back = Arc::new(AtomicBool::new(false));

        let flag = rolled_back.clone();
        let task = tokio::spawn(async move {
            let mut resource = handle
                .resource()
                .with_resource_type("vm")
                .with_rollback(flagged_rollback(flag));
            resource
                .run(|slot| async move {
                    slot.set("  ", None);
                    Ok::<_, TrackerError>(())
                })
                .await
        });

        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        // Nothing is reported as allocated.
        let failed = answer_ok(&mut receiver, "ResourceAllocationFailed", json!("res-1"))
            .await
            .unwrap();
        assert_eq!(failed.fields["reason"], json!(BLANK_ID_REASON));

        assert!(matches!(
            task.await.unwrap(),
            Err(TrackerError::MissingResourceData)
        ));
        assert!(rolled_back.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejected_allocated_report_closes_resource_as_failed() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;
        let rolled_back = Arc::new(AtomicBool::new(false));

        let flag = rolled_back.clone();
        let task = tokio::spawn(async move {
            let mut resource = handle
                .resource()
                .with_resource_type("vm")
                .with_rollback(flagged_rollback(flag));
            let result = resource
                .run(|slot| async move {
                    slot.set("i-1", None);
                    Ok::<_, TrackerError>(())
                })
                .await;
            (result, resource.phase())
        });

        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        answer_err(&mut receiver, "ResourceAllocated", "Invalid ResourceAllocated: bad data")
            .await
            .unwrap();
        let failed = answer_ok(&mut receiver, "ResourceAllocationFailed", json!("res-1"))
            .await
            .unwrap();
        assert_eq!(
            failed.fields["reason"],
            json!("TrackerError(Backend error: Invalid ResourceAllocated: bad data)")
        );

        let (result, phase) = task.await.unwrap();
        assert!(matches!(result, Err(TrackerError::Backend(_))));
        assert_eq!(phase, ResourcePhase::Failed);
        assert!(rolled_back.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lost_allocated_report_is_not_contradicted() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;

        let task = tokio::spawn(async move {
            let mut resource = handle.resource().with_resource_type("vm");
            let result = resource
                .run(|slot| async move {
                    slot.set("i-1", None);
                    Ok::<_, TrackerError>(())
                })
                .await;
            (result, resource.phase())
        });

        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        let (_, respond_to) = expect_command(&mut receiver, "ResourceAllocated").await.unwrap();
        let _ = respond_to.send(Err(TrackerError::Transport("connection reset".into())));

        let (result, phase) = task.await.unwrap();
        assert!(matches!(result, Err(TrackerError::Transport(_))));
        assert_eq!(phase, ResourcePhase::Failed);
        // No ResourceAllocationFailed follows a report that may have landed.
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_report_error_does_not_mask_body_error() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;

        let task = tokio::spawn(async move {
            let mut resource = handle.resource().with_resource_type("vm");
            let result: Result<(), TrackerError> = resource
                .run(|_slot| async { Err(TrackerError::Transport("boot timed out".into())) })
                .await;
            result
        });

        answer_ok(&mut receiver, "AddResource", json!("res-1")).await.unwrap();
        let failed = answer_err(&mut receiver, "ResourceAllocationFailed", "Record store closed")
            .await
            .unwrap();
        assert_eq!(
            failed.fields["reason"],
            json!("TrackerError(Transport error: boot timed out)")
        );

        match task.await.unwrap() {
            Err(TrackerError::Transport(message)) => assert_eq!(message, "boot timed out"),
            other => panic!("Expected the body's error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_free_before_allocated_is_rejected_locally() {
        let (transport, mut receiver) = create_mock_transport(8);
        let handle = entered_allocation(transport, &mut receiver).await;

        let mut resource = handle.resource();
        assert!(matches!(resource.freed().await, Err(TrackerError::ScopeState(_))));
        assert!(matches!(
            resource.exit(ScopeExit::Normal).await,
            Err(TrackerError::ScopeState(_))
        ));
    }
}
