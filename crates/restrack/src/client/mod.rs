//! # Tracking Client
//!
//! A stateless façade over the tracking service. Every method is exactly one
//! round trip: build the command message, send it through the
//! [`Transport`], and unwrap the `{result, error}` envelope.
//!
//! Parameters left unspecified are resolved through three tiers:
//!
//! 1. the explicit call argument,
//! 2. the client instance's [`Defaults`],
//! 3. the process-wide [`Defaults`] installed by [`setup`].
//!
//! A parameter with no value at any tier fails with
//! [`TrackerError::MissingConfiguration`] before anything is sent, except
//! `timeout`, which falls back to [`DEFAULT_TIMEOUT_SECS`].
//!
//! ```rust,no_run
//! use restrack::client::{setup, AllocationParams, Defaults, TrackerClient};
//!
//! # async fn demo() -> Result<(), restrack::TrackerError> {
//! setup(Defaults::default().with_url("http://localhost:5001/restrack"));
//!
//! let client = TrackerClient::connect(
//!     None,
//!     Defaults::default()
//!         .with_application("app:demo")
//!         .with_module("module:demo"),
//! )?;
//! let oid = client.start_allocation(AllocationParams::default()).await?;
//! client.allocation_successful(&oid).await?;
//! # Ok(())
//! # }
//! ```

mod defaults;
mod transport;

pub use defaults::{process_wide, setup, Defaults, DEFAULT_TIMEOUT_SECS};
pub use transport::{HttpTransport, LocalTransport, Transport};

use crate::error::TrackerError;
use defaults::resolve;
use restrack_backend::command::{
    AddResource, AllocationFailed, AllocationSuccess, BeginAllocation, GetAllocation, GetResource,
    ResourceAllocated, ResourceAllocationFailed, ResourceFreed,
};
use restrack_backend::{AllocationRecord, CommandMessage, CommandParams, Envelope, Oid, ResourceRecord};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Optional inputs of [`TrackerClient::start_allocation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationParams {
    /// Left to the backend when unset.
    pub allocation_id: Option<String>,
    pub application: Option<String>,
    pub module: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Clone)]
pub struct TrackerClient {
    transport: Arc<dyn Transport>,
    defaults: Defaults,
}

impl TrackerClient {
    pub fn new(transport: Arc<dyn Transport>, defaults: Defaults) -> Self {
        Self {
            transport,
            defaults,
        }
    }

    /// HTTP client for `url`, falling back to the instance and then the
    /// process-wide url.
    pub fn connect(url: Option<&str>, defaults: Defaults) -> Result<Self, TrackerError> {
        let url = resolve(
            "url",
            url.map(str::to_string),
            &defaults.url,
            &process_wide().url,
        )?;
        let transport = HttpTransport::new(url.clone())?;
        let defaults = Defaults {
            url: Some(url),
            ..defaults
        };
        Ok(Self::new(Arc::new(transport), defaults))
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// The same transport with a different instance tier.
    pub fn with_defaults(&self, defaults: Defaults) -> Self {
        Self::new(self.transport.clone(), defaults)
    }

    async fn call<P: CommandParams>(&self, params: &P) -> Result<Value, TrackerError> {
        let message = CommandMessage::from_params(params)
            .map_err(|e| TrackerError::Transport(format!("cannot encode {}: {e}", P::NAME)))?;
        let envelope = self.transport.send(message).await?;
        open_envelope(envelope)
    }

    async fn call_for<P: CommandParams, T: DeserializeOwned>(
        &self,
        params: &P,
    ) -> Result<T, TrackerError> {
        let value = self.call(params).await?;
        serde_json::from_value(value).map_err(|e| {
            TrackerError::Transport(format!("unexpected result for {}: {e}", P::NAME))
        })
    }

    /// Registers a new allocation as PENDING and returns its oid.
    #[instrument(skip(self))]
    pub async fn start_allocation(&self, params: AllocationParams) -> Result<Oid, TrackerError> {
        let global = process_wide();
        let command = BeginAllocation {
            allocation_id: params.allocation_id,
            application: resolve(
                "application",
                params.application,
                &self.defaults.application,
                &global.application,
            )?,
            module: resolve("module", params.module, &self.defaults.module, &global.module)?,
            // The only parameter with a built-in last resort.
            timeout: resolve("timeout", params.timeout, &self.defaults.timeout, &global.timeout)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        let oid = self.call_for(&command).await?;
        debug!(allocation_oid = %oid, "Allocation started");
        Ok(oid)
    }

    /// Marks an allocation FAILED.
    #[instrument(skip(self))]
    pub async fn allocation_failed(
        &self,
        allocation_oid: &Oid,
        reason: Option<String>,
    ) -> Result<(), TrackerError> {
        self.call(&AllocationFailed {
            oid: allocation_oid.clone(),
            reason,
        })
        .await
        .map(drop)
    }

    /// Marks an allocation DONE.
    #[instrument(skip(self))]
    pub async fn allocation_successful(&self, allocation_oid: &Oid) -> Result<(), TrackerError> {
        self.call(&AllocationSuccess {
            oid: allocation_oid.clone(),
        })
        .await
        .map(drop)
    }

    /// Registers a PENDING resource under `allocation_oid` and returns its oid.
    #[instrument(skip(self))]
    pub async fn add_resource_record(
        &self,
        allocation_oid: &Oid,
        resource_owner: Option<String>,
        resource_type: Option<String>,
    ) -> Result<Oid, TrackerError> {
        let global = process_wide();
        let command = AddResource {
            allocation_oid: allocation_oid.clone(),
            resource_owner: resolve(
                "resource_owner",
                resource_owner,
                &self.defaults.resource_owner,
                &global.resource_owner,
            )?,
            resource_type: resolve(
                "resource_type",
                resource_type,
                &self.defaults.resource_type,
                &global.resource_type,
            )?,
        };
        let oid = self.call_for(&command).await?;
        debug!(resource_oid = %oid, "Resource registered");
        Ok(oid)
    }

    /// Marks a resource ALLOCATED with its external id.
    #[instrument(skip(self, data))]
    pub async fn resource_allocated(
        &self,
        resource_oid: &Oid,
        resource_id: &str,
        data: Option<Value>,
    ) -> Result<(), TrackerError> {
        self.call(&ResourceAllocated {
            oid: resource_oid.clone(),
            resource_id: resource_id.to_string(),
            data,
        })
        .await
        .map(drop)
    }

    /// Marks a resource FAILED.
    #[instrument(skip(self))]
    pub async fn resource_allocation_failed(
        &self,
        resource_oid: &Oid,
        reason: Option<String>,
    ) -> Result<(), TrackerError> {
        self.call(&ResourceAllocationFailed {
            oid: resource_oid.clone(),
            reason,
        })
        .await
        .map(drop)
    }

    /// Marks an ALLOCATED resource FREE.
    #[instrument(skip(self))]
    pub async fn resource_freed(&self, resource_oid: &Oid) -> Result<(), TrackerError> {
        self.call(&ResourceFreed {
            oid: resource_oid.clone(),
        })
        .await
        .map(drop)
    }

    #[instrument(skip(self))]
    pub async fn get_allocation(&self, allocation_oid: &Oid) -> Result<AllocationRecord, TrackerError> {
        self.call_for(&GetAllocation {
            oid: allocation_oid.clone(),
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_resource(&self, resource_oid: &Oid) -> Result<ResourceRecord, TrackerError> {
        self.call_for(&GetResource {
            oid: resource_oid.clone(),
        })
        .await
    }
}

/// `result` on success, the service's `error` otherwise.
fn open_envelope(envelope: Envelope) -> Result<Value, TrackerError> {
    match envelope {
        Envelope {
            error: Some(error), ..
        } => Err(TrackerError::Backend(error)),
        Envelope {
            result: Some(result),
            error: None,
        } => Ok(result),
        Envelope {
            result: None,
            error: None,
        } => Err(TrackerError::Transport(
            "response envelope carries neither result nor error".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{create_mock_transport, expect_command};
    use serde_json::json;

    #[tokio::test]
    async fn test_start_allocation_uses_instance_defaults() {
        let (transport, mut receiver) = create_mock_transport(4);
        let client = TrackerClient::new(
            transport,
            Defaults::default()
                .with_application("app:demo")
                .with_module("module:demo"),
        );

        let call = tokio::spawn(async move {
            client
                .start_allocation(AllocationParams {
                    module: Some("module:explicit".into()),
                    ..AllocationParams::default()
                })
                .await
        });

        let (message, respond_to) = expect_command(&mut receiver, "BeginAllocation").await.unwrap();
        assert_eq!(message.fields["application"], json!("app:demo"));
        assert_eq!(message.fields["module"], json!("module:explicit"));
        assert_eq!(message.fields["timeout"], json!(DEFAULT_TIMEOUT_SECS));
        assert_eq!(message.fields["allocation_id"], Value::Null);
        respond_to.send(Ok(Envelope::ok(json!("alloc-1")))).unwrap();

        assert_eq!(call.await.unwrap().unwrap(), Oid::from("alloc-1"));
    }

    #[tokio::test]
    async fn test_missing_resource_type_fails_before_sending() {
        let (transport, mut receiver) = create_mock_transport(4);
        let client = TrackerClient::new(transport, Defaults::default());

        let result = client
            .add_resource_record(&Oid::from("alloc-1"), Some("lpds".into()), None)
            .await;
        assert!(matches!(
            result,
            Err(TrackerError::MissingConfiguration("resource_type"))
        ));

        drop(client);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_is_raised() {
        let (transport, mut receiver) = create_mock_transport(4);
        let client = TrackerClient::new(transport, Defaults::default());

        let call = tokio::spawn(async move { client.resource_freed(&Oid::from("r-1")).await });

        let (message, respond_to) = expect_command(&mut receiver, "ResourceFreed").await.unwrap();
        assert_eq!(message.fields["oid"], json!("r-1"));
        respond_to
            .send(Ok(Envelope::err("Transition conflict on Resource r-1: expected ALLOCATED, found PENDING")))
            .unwrap();

        match call.await.unwrap() {
            Err(TrackerError::Backend(message)) => assert!(message.contains("conflict")),
            other => panic!("Expected Backend error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_envelope_is_a_transport_error() {
        let result = open_envelope(Envelope {
            result: None,
            error: None,
        });
        assert!(matches!(result, Err(TrackerError::Transport(_))));
    }
}
