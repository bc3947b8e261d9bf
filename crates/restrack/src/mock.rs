//! # Transport Mocks
//!
//! A [`Transport`] whose requests land on a channel the test controls, in the
//! same spirit as `restrack_backend::mock`. Tests drive the code under test
//! from a spawned task, pull each command off the receiver, assert on it and
//! answer with whatever envelope (or transport failure) the scenario needs.

use crate::client::Transport;
use crate::error::TrackerError;
use async_trait::async_trait;
use restrack_backend::{CommandMessage, Envelope};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type Responder = oneshot::Sender<Result<Envelope, TrackerError>>;

/// One command captured by a [`MockTransport`].
#[derive(Debug)]
pub struct TransportRequest {
    pub message: CommandMessage,
    pub respond_to: Responder,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    sender: mpsc::Sender<TransportRequest>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: CommandMessage) -> Result<Envelope, TrackerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(TransportRequest {
                message,
                respond_to,
            })
            .await
            .map_err(|_| TrackerError::Transport("mock transport closed".to_string()))?;
        response
            .await
            .map_err(|_| TrackerError::Transport("mock transport dropped the request".to_string()))?
    }
}

/// Creates a mock transport and the receiver its commands arrive on.
pub fn create_mock_transport(
    buffer_size: usize,
) -> (Arc<MockTransport>, mpsc::Receiver<TransportRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (Arc::new(MockTransport { sender }), receiver)
}

/// Next command, if its `cmd` is `cmd`.
pub async fn expect_command(
    receiver: &mut mpsc::Receiver<TransportRequest>,
    cmd: &str,
) -> Option<(CommandMessage, Responder)> {
    match receiver.recv().await {
        Some(request) if request.message.cmd == cmd => Some((request.message, request.respond_to)),
        _ => None,
    }
}

/// Expects `cmd` and answers it with `result`. Returns the captured message.
pub async fn answer_ok(
    receiver: &mut mpsc::Receiver<TransportRequest>,
    cmd: &str,
    result: Value,
) -> Option<CommandMessage> {
    let (message, respond_to) = expect_command(receiver, cmd).await?;
    let _ = respond_to.send(Ok(Envelope::ok(result)));
    Some(message)
}

/// Expects `cmd` and answers it with a backend error.
pub async fn answer_err(
    receiver: &mut mpsc::Receiver<TransportRequest>,
    cmd: &str,
    error: &str,
) -> Option<CommandMessage> {
    let (message, respond_to) = expect_command(receiver, cmd).await?;
    let _ = respond_to.send(Ok(Envelope::err(error)));
    Some(message)
}
