//! How a command message reaches the tracking service.

use crate::error::TrackerError;
use async_trait::async_trait;
use restrack_backend::{CommandMessage, Dispatch, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delivers one command and hands back the service's envelope.
///
/// Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: CommandMessage) -> Result<Envelope, TrackerError>;
}

/// JSON over a single HTTP POST endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, url))
    }

    /// Uses an existing `reqwest` client, sharing its connection pool.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: CommandMessage) -> Result<Envelope, TrackerError> {
        debug!(url = %self.url, cmd = %message.cmd, "POST-ing command");
        let response = self.client.post(&self.url).json(&message).send().await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%status, body = %body, "Response");
        if !status.is_success() {
            return Err(TrackerError::Transport(format!(
                "tracking service answered {status}"
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| TrackerError::Transport(format!("malformed response envelope: {e}")))
    }
}

/// Dispatches straight into an in-process backend, skipping HTTP.
#[derive(Clone)]
pub struct LocalTransport {
    backend: Arc<dyn Dispatch>,
}

impl LocalTransport {
    pub fn new(backend: Arc<dyn Dispatch>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: CommandMessage) -> Result<Envelope, TrackerError> {
        Ok(Envelope::from_result(self.backend.dispatch(message).await))
    }
}
