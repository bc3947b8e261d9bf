//! # Tracking Service
//!
//! A single POST endpoint that accepts a command message, dispatches it into
//! the configured backend module and always answers `200` with an
//! [`Envelope`]. No backend failure escapes the handler: it is logged and
//! returned as the envelope's `error`.
//!
//! ```text
//! POST {path}   {"cmd": "...", ...}  ->  {"result": ..., "error": null}
//! GET  /healthz                      ->  {"status": "ok"}
//! ```

use crate::config::ServerConfig;
use crate::error::ServiceError;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use restrack_backend::{CommandMessage, Dispatch, Envelope};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<dyn Dispatch>,
}

/// Routes of the tracking service, commands served under `path`.
pub fn router(path: &str, dispatcher: Arc<dyn Dispatch>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(path, post(handle_command))
        .with_state(AppState { dispatcher })
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_command(State(state): State<AppState>, body: Bytes) -> Json<Envelope> {
    let message: CommandMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Malformed command message");
            return Json(Envelope::err(format!("Malformed command message: {e}")));
        }
    };

    let cmd = message.cmd.clone();
    let result = state.dispatcher.dispatch(message).await;
    match &result {
        Ok(value) => debug!(%cmd, result = %value, "Command performed"),
        Err(e) => warn!(%cmd, error = %e, "Command failed"),
    }
    Json(Envelope::from_result(result))
}

/// A running tracking service.
pub struct TrackerService {
    local_addr: SocketAddr,
    path: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TrackerService {
    /// Opens the configured backend module and starts serving.
    pub async fn start(config: &ServerConfig) -> Result<Self, ServiceError> {
        let dispatcher =
            restrack_backend::open(&config.backend.module, &config.backend.connection).await?;
        Self::start_with(config.listen, &config.path, dispatcher).await
    }

    /// Serves an already opened backend.
    pub async fn start_with(
        listen: SocketAddr,
        path: &str,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Result<Self, ServiceError> {
        let module = dispatcher.module().to_string();
        let app = router(path, dispatcher);

        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, signal) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        info!(%local_addr, path, %module, "Tracking service listening");
        Ok(Self {
            local_addr,
            path: path.to_string(),
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Full URL of the command endpoint.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.local_addr, self.path)
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        let _ = self.shutdown.send(());
        self.handle
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))??;
        info!(local_addr = %self.local_addr, "Tracking service stopped");
        Ok(())
    }
}
