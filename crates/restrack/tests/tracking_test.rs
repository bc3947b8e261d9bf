use restrack::client::{Defaults, TrackerClient};
use restrack::scope::{AllocationPhase, AllocationScope, ResourcePhase, RollbackFn};
use restrack::{BoxError, SingleResourceAllocation, TrackerError, TrackerService};
use restrack_backend::{AllocationState, ConnectionConfig, Oid, ResourceState};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
enum ProvisionError {
    #[error("quota exceeded")]
    Quota,
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

async fn start_service() -> TrackerService {
    let dispatcher = restrack_backend::open("memory", &ConnectionConfig::default())
        .await
        .unwrap();
    TrackerService::start_with(([127, 0, 0, 1], 0).into(), "/restrack", dispatcher)
        .await
        .unwrap()
}

fn client_for(service: &TrackerService) -> TrackerClient {
    TrackerClient::connect(
        Some(&service.url()),
        Defaults::default()
            .with_application("app:test")
            .with_module("module:test")
            .with_resource_owner("lpds")
            .with_resource_type("vm"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_allocation_with_two_resources() {
    let service = start_service().await;
    let client = client_for(&service);

    let mut allocation = AllocationScope::new(client.clone());
    let resources = allocation
        .run(|handle| async move {
            let mut first = handle.resource();
            first
                .run(|slot| async move {
                    slot.set("i-1", Some(json!({"zone": "a"})));
                    Ok::<_, TrackerError>(())
                })
                .await?;

            let mut second = handle.resource().with_resource_type("disk");
            second
                .run(|slot| async move {
                    slot.set("vol-2", None);
                    Ok::<_, TrackerError>(())
                })
                .await?;

            Ok::<_, TrackerError>(vec![first, second])
        })
        .await
        .unwrap();

    assert_eq!(allocation.phase(), AllocationPhase::Done);
    let allocation_oid = allocation.oid().unwrap().clone();
    let record = client.get_allocation(&allocation_oid).await.unwrap();
    assert_eq!(record.state, AllocationState::Done);
    assert_eq!(record.application, "app:test");
    assert_eq!(Some(record.allocation_id.as_str()), allocation.allocation_id());

    let first = client.get_resource(resources[0].oid().unwrap()).await.unwrap();
    assert_eq!(first.state, ResourceState::Allocated);
    assert_eq!(first.allocation_oid, allocation_oid);
    assert_eq!(first.resource_id.as_deref(), Some("i-1"));
    assert_eq!(first.data, Some(json!({"zone": "a"})));
    assert!(first.allocation_time.is_some());

    let second = client.get_resource(resources[1].oid().unwrap()).await.unwrap();
    assert_eq!(second.state, ResourceState::Allocated);
    assert_eq!(second.resource_type, "disk");
    assert_eq!(second.owner, "lpds");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_body_marks_everything_failed() {
    let service = start_service().await;
    let client = client_for(&service);
    let rolled_back = Arc::new(AtomicBool::new(false));
    let resource_oid: Arc<Mutex<Option<Oid>>> = Arc::new(Mutex::new(None));

    let flag = rolled_back.clone();
    let mut allocation = AllocationScope::new(client.clone()).with_rollback(RollbackFn::new(
        move || {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        },
    ));

    let seen = resource_oid.clone();
    let result = allocation
        .run(|handle| async move {
            let mut resource = handle.resource();
            let outcome = resource
                .run(|_slot| async { Err::<(), _>(ProvisionError::Quota) })
                .await;
            assert_eq!(resource.phase(), ResourcePhase::Failed);
            *seen.lock().unwrap() = resource.oid().cloned();
            outcome
        })
        .await;

    assert!(matches!(result, Err(ProvisionError::Quota)));
    assert_eq!(allocation.phase(), AllocationPhase::Failed);
    assert!(rolled_back.load(Ordering::SeqCst));

    let record = client
        .get_allocation(allocation.oid().unwrap())
        .await
        .unwrap();
    assert_eq!(record.state, AllocationState::Failed);
    assert_eq!(record.reason.as_deref(), Some("ProvisionError(quota exceeded)"));
    assert!(record.close_time.is_some());

    let oid = resource_oid.lock().unwrap().clone().unwrap();
    let resource = client.get_resource(&oid).await.unwrap();
    assert_eq!(resource.state, ResourceState::Failed);
    assert_eq!(resource.reason.as_deref(), Some("ProvisionError(quota exceeded)"));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resource_without_data_is_reported_failed() {
    let service = start_service().await;
    let client = client_for(&service);
    let resource_oid: Arc<Mutex<Option<Oid>>> = Arc::new(Mutex::new(None));

    let seen = resource_oid.clone();
    let mut allocation = AllocationScope::new(client.clone());
    let result = allocation
        .run(|handle| async move {
            let mut resource = handle.resource();
            let outcome = resource.run(|_slot| async { Ok::<_, TrackerError>(()) }).await;
            *seen.lock().unwrap() = resource.oid().cloned();
            outcome
        })
        .await;

    assert!(matches!(result, Err(TrackerError::MissingResourceData)));
    let oid = resource_oid.lock().unwrap().clone().unwrap();
    let resource = client.get_resource(&oid).await.unwrap();
    assert_eq!(resource.state, ResourceState::Failed);
    assert!(resource.resource_id.is_none());

    let record = client
        .get_allocation(allocation.oid().unwrap())
        .await
        .unwrap();
    assert_eq!(record.state, AllocationState::Failed);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_resource_allocation_then_freed() {
    let service = start_service().await;
    let client = client_for(&service);

    let mut scope = SingleResourceAllocation::new(client.clone())
        .with_allocation_id("job-42")
        .with_timeout(60);
    let value = scope
        .run(|slot| async move {
            slot.set("i-9", None);
            Ok::<_, TrackerError>(9)
        })
        .await
        .unwrap();
    assert_eq!(value, 9);

    let allocation = client
        .get_allocation(scope.allocation_oid().unwrap())
        .await
        .unwrap();
    assert_eq!(allocation.allocation_id, "job-42");
    assert_eq!(allocation.state, AllocationState::Done);

    scope.freed().await.unwrap();
    let resource = client
        .get_resource(scope.resource_oid().unwrap())
        .await
        .unwrap();
    assert_eq!(resource.state, ResourceState::Free);
    assert!(resource.close_time.is_some());

    // The second free is refused locally.
    assert!(matches!(
        scope.freed().await,
        Err(TrackerError::ScopeState(_))
    ));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_resource_without_id_fails_both_records() {
    let service = start_service().await;
    let client = client_for(&service);
    let rolled_back = Arc::new(AtomicBool::new(false));

    let flag = rolled_back.clone();
    let mut scope = SingleResourceAllocation::new(client.clone()).with_resource_rollback(
        RollbackFn::new(move || {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }),
    );
    let result = scope
        .run(|slot| async move {
            slot.set("  ", None);
            Ok::<_, TrackerError>(())
        })
        .await;

    assert!(matches!(result, Err(TrackerError::MissingResourceData)));
    assert!(rolled_back.load(Ordering::SeqCst));

    let resource = client
        .get_resource(scope.resource_oid().unwrap())
        .await
        .unwrap();
    assert_eq!(resource.state, ResourceState::Failed);
    assert!(resource.resource_id.is_none());

    let allocation = client
        .get_allocation(scope.allocation_oid().unwrap())
        .await
        .unwrap();
    assert_eq!(allocation.state, AllocationState::Failed);
    assert!(allocation
        .reason
        .as_deref()
        .is_some_and(|reason| reason.starts_with("TrackerError(")));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_report_is_a_backend_error() {
    let service = start_service().await;
    let client = client_for(&service);

    let mut scope = SingleResourceAllocation::new(client.clone());
    scope
        .run(|slot| async move {
            slot.set("i-1", None);
            Ok::<_, TrackerError>(())
        })
        .await
        .unwrap();

    let again = client
        .allocation_successful(scope.allocation_oid().unwrap())
        .await;
    assert!(matches!(again, Err(TrackerError::Backend(_))));

    let failed_after_done = client
        .allocation_failed(scope.allocation_oid().unwrap(), Some("late".to_string()))
        .await;
    assert!(matches!(failed_after_done, Err(TrackerError::Backend(_))));

    let record = client
        .get_allocation(scope.allocation_oid().unwrap())
        .await
        .unwrap();
    assert_eq!(record.state, AllocationState::Done);
    assert!(record.reason.is_none());

    service.shutdown().await.unwrap();
}
