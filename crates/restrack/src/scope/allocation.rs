use super::resource::ResourceScope;
use super::rollback::{NoRollback, Rollback};
use super::ScopeExit;
use crate::client::{AllocationParams, TrackerClient};
use crate::error::TrackerError;
use restrack_backend::Oid;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPhase {
    Unopened,
    Pending,
    Done,
    Failed,
    /// Exited normally with `rollback_on_success`; success is reported (or
    /// not) by the caller through `confirm_success`.
    Closed,
}

/// Outcomes of the resource scopes opened under one allocation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChildLedger {
    open: bool,
    opened: usize,
    allocated: usize,
    failed: usize,
    confirmed: bool,
}

impl ChildLedger {
    fn unfinished(&self) -> usize {
        self.opened.saturating_sub(self.allocated)
    }
}

struct Shared {
    client: TrackerClient,
    oid: Oid,
    strict_children: bool,
    ledger: Mutex<ChildLedger>,
}

/// The entered allocation, as seen from code running inside the scope.
///
/// Cheap to clone. Resource scopes keep one as their back-reference to the
/// enclosing allocation.
#[derive(Clone)]
pub struct AllocationHandle {
    shared: Arc<Shared>,
}

impl AllocationHandle {
    fn new(client: TrackerClient, oid: Oid, strict_children: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                oid,
                strict_children,
                ledger: Mutex::new(ChildLedger {
                    open: true,
                    ..ChildLedger::default()
                }),
            }),
        }
    }

    /// Backend oid of the allocation record.
    pub fn oid(&self) -> &Oid {
        &self.shared.oid
    }

    pub fn client(&self) -> &TrackerClient {
        &self.shared.client
    }

    /// A resource scope owned by this allocation. Owner and type fall back
    /// to the client's defaults.
    pub fn resource(&self) -> ResourceScope {
        ResourceScope::new(self.clone())
    }

    /// Reports AllocationSuccess now. Meant for scopes built with
    /// `rollback_on_success`, where exit does not report success itself.
    pub async fn confirm_success(&self) -> Result<(), TrackerError> {
        let ledger = *self.ledger();
        if self.shared.strict_children && ledger.unfinished() > 0 {
            return Err(TrackerError::ChildResourcesFailed {
                failed: ledger.unfinished(),
                total: ledger.opened,
            });
        }
        self.shared.client.allocation_successful(self.oid()).await?;
        self.ledger().confirmed = true;
        info!(allocation_oid = %self.oid(), "Allocation success confirmed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.ledger().open
    }

    fn ledger(&self) -> MutexGuard<'_, ChildLedger> {
        // The ledger holds plain counters; a panic mid-update cannot leave
        // it inconsistent.
        self.shared
            .ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn ensure_open(&self) -> Result<(), TrackerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TrackerError::AllocationNotOpen)
        }
    }

    pub(crate) fn child_opened(&self) {
        self.ledger().opened += 1;
    }

    pub(crate) fn child_allocated(&self) {
        self.ledger().allocated += 1;
    }

    pub(crate) fn child_failed(&self) {
        self.ledger().failed += 1;
    }

    fn close(&self) -> ChildLedger {
        let mut ledger = self.ledger();
        ledger.open = false;
        *ledger
    }
}

/// Scope around one allocation.
///
/// Entry reports BeginAllocation. Normal exit reports AllocationSuccess,
/// unless built with `rollback_on_success`, in which case it runs the
/// rollback hook instead and leaves success to
/// [`AllocationHandle::confirm_success`]. Failed exit reports
/// AllocationFailed and runs the rollback hook.
pub struct AllocationScope {
    client: TrackerClient,
    params: AllocationParams,
    rollback: Arc<dyn Rollback>,
    rollback_on_success: bool,
    strict_children: bool,
    handle: Option<AllocationHandle>,
    phase: AllocationPhase,
}

impl AllocationScope {
    /// A scope with a freshly generated allocation id.
    pub fn new(client: TrackerClient) -> Self {
        Self {
            client,
            params: AllocationParams {
                allocation_id: Some(Uuid::new_v4().to_string()),
                ..AllocationParams::default()
            },
            rollback: Arc::new(NoRollback),
            rollback_on_success: false,
            strict_children: false,
            handle: None,
            phase: AllocationPhase::Unopened,
        }
    }

    pub fn with_allocation_id(mut self, allocation_id: impl Into<String>) -> Self {
        self.params.allocation_id = Some(allocation_id.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.params.application = Some(application.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.params.module = Some(module.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.params.timeout = Some(timeout);
        self
    }

    pub fn with_rollback(mut self, rollback: impl Rollback + 'static) -> Self {
        self.rollback = Arc::new(rollback);
        self
    }

    pub fn with_rollback_on_success(mut self, rollback_on_success: bool) -> Self {
        self.rollback_on_success = rollback_on_success;
        self
    }

    /// Refuse to report success while any resource scope opened under this
    /// allocation has not reached ALLOCATED.
    pub fn with_strict_children(mut self, strict_children: bool) -> Self {
        self.strict_children = strict_children;
        self
    }

    pub fn allocation_id(&self) -> Option<&str> {
        self.params.allocation_id.as_deref()
    }

    pub fn phase(&self) -> AllocationPhase {
        self.phase
    }

    /// Backend oid, once entered.
    pub fn oid(&self) -> Option<&Oid> {
        self.handle.as_ref().map(AllocationHandle::oid)
    }

    /// Handle to the entered allocation.
    pub fn handle(&self) -> Result<AllocationHandle, TrackerError> {
        match (&self.handle, self.phase) {
            (Some(handle), AllocationPhase::Pending) => Ok(handle.clone()),
            _ => Err(TrackerError::AllocationNotOpen),
        }
    }

    pub async fn confirm_success(&self) -> Result<(), TrackerError> {
        match &self.handle {
            Some(handle) => handle.confirm_success().await,
            None => Err(TrackerError::AllocationNotOpen),
        }
    }

    pub async fn enter(&mut self) -> Result<AllocationHandle, TrackerError> {
        if self.phase != AllocationPhase::Unopened {
            return Err(TrackerError::ScopeState(format!(
                "allocation scope entered twice (phase {:?})",
                self.phase
            )));
        }

        let oid = self.client.start_allocation(self.params.clone()).await?;
        info!(allocation_oid = %oid, allocation_id = ?self.params.allocation_id, "Allocation scope entered");

        let handle = AllocationHandle::new(self.client.clone(), oid, self.strict_children);
        self.handle = Some(handle.clone());
        self.phase = AllocationPhase::Pending;
        Ok(handle)
    }

    /// Leaves the scope.
    ///
    /// A failed exit always returns `Ok(())` once the scope was pending:
    /// reporting and rollback errors are logged, not returned.
    pub async fn exit(&mut self, exit: ScopeExit) -> Result<(), TrackerError> {
        let handle = match (&self.handle, self.phase) {
            (Some(handle), AllocationPhase::Pending) => handle.clone(),
            _ => {
                return Err(TrackerError::ScopeState(format!(
                    "cannot exit allocation scope in phase {:?}",
                    self.phase
                )))
            }
        };
        let ledger = handle.close();

        match exit {
            ScopeExit::Failed { reason } => {
                self.fail(&handle, reason).await;
                Ok(())
            }
            ScopeExit::Normal => self.succeed(&handle, ledger).await,
        }
    }

    async fn succeed(
        &mut self,
        handle: &AllocationHandle,
        ledger: ChildLedger,
    ) -> Result<(), TrackerError> {
        let unfinished = ledger.unfinished();
        if unfinished > 0 {
            if self.strict_children {
                let error = TrackerError::ChildResourcesFailed {
                    failed: unfinished,
                    total: ledger.opened,
                };
                self.fail(handle, error.to_string()).await;
                return Err(error);
            }
            warn!(
                allocation_oid = %handle.oid(),
                unfinished,
                failed = ledger.failed,
                total = ledger.opened,
                "Allocation closing while resources did not reach ALLOCATED"
            );
        }

        if self.rollback_on_success {
            self.phase = if ledger.confirmed {
                AllocationPhase::Done
            } else {
                AllocationPhase::Closed
            };
            info!(allocation_oid = %handle.oid(), confirmed = ledger.confirmed, "Allocation scope closed, running rollback");
            return self
                .rollback
                .rollback()
                .await
                .map_err(|e| TrackerError::Rollback(e.to_string()));
        }

        match self.client.allocation_successful(handle.oid()).await {
            Ok(()) => {
                self.phase = AllocationPhase::Done;
                info!(allocation_oid = %handle.oid(), "Allocation done");
                Ok(())
            }
            Err(e) => {
                self.phase = AllocationPhase::Closed;
                Err(e)
            }
        }
    }

    async fn fail(&mut self, handle: &AllocationHandle, reason: String) {
        self.phase = AllocationPhase::Failed;
        info!(allocation_oid = %handle.oid(), %reason, "Allocation failed");

        if let Err(e) = self
            .client
            .allocation_failed(handle.oid(), Some(reason))
            .await
        {
            warn!(allocation_oid = %handle.oid(), error = %e, "Could not report allocation failure");
        }
        if let Err(e) = self.rollback.rollback().await {
            warn!(allocation_oid = %handle.oid(), error = %e, "Rollback failed, discarding");
        }
    }

    /// Enters, runs `body`, and exits according to its outcome.
    ///
    /// The body's error is returned unchanged. `From<TrackerError>` is only
    /// used for failures of the scope itself (entry or success reporting).
    pub async fn run<T, E, F, Fut>(&mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(AllocationHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<TrackerError>,
    {
        let handle = self.enter().await?;
        match body(handle).await {
            Ok(value) => {
                self.exit(ScopeExit::Normal).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(exit_error) = self.exit(ScopeExit::failed(&e)).await {
                    warn!(error = %exit_error, "Allocation scope exit failed, discarding");
                }
                Err(e)
            }
        }
    }
}
