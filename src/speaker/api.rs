//! HTTP API for the playback coordinator.
//!
//! Hook processes talk to the coordinator over loopback HTTP:
//! - `GET /status`: availability probe and queue snapshot
//! - `POST /speak`: enqueue a notification
//! - `POST /shutdown`: stop the coordinator, discarding queued entries

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::queue::{CoordinatorStatus, NotificationSource, Priority, QueueCoordinator};

#[derive(Clone)]
pub struct CoordinatorApiState {
    pub coordinator: QueueCoordinator,
}

// --- Request/Response types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub source: NotificationSource,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error: Some(message.into()),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.status == "queued"
    }
}

/// Build the axum router.
pub fn router(state: CoordinatorApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/speak", post(handle_speak))
        .route("/shutdown", post(handle_shutdown))
        .with_state(state)
}

/// Serve the API on an already-bound listener until the coordinator stops.
pub async fn serve(listener: TcpListener, state: CoordinatorApiState) -> std::io::Result<()> {
    let coordinator = state.coordinator.clone();
    if let Ok(addr) = listener.local_addr() {
        info!("Coordinator API listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { coordinator.stopped().await })
        .await
}

// --- Handlers ---

async fn handle_status(State(state): State<CoordinatorApiState>) -> Json<CoordinatorStatus> {
    Json(state.coordinator.status())
}

async fn handle_speak(
    State(state): State<CoordinatorApiState>,
    Json(req): Json<SpeakRequest>,
) -> Json<SimpleResponse> {
    if req.message.trim().is_empty() {
        return Json(SimpleResponse::err("rejected", "empty message"));
    }

    let preview: String = req.message.chars().take(80).collect();
    info!(
        "HTTP /speak [{}] from {}: \"{}{}\"",
        req.priority,
        req.source,
        preview.replace('\n', " "),
        if req.message.chars().count() > 80 { "..." } else { "" },
    );

    if state
        .coordinator
        .enqueue(&req.message, req.priority, req.source, req.metadata)
    {
        Json(SimpleResponse::ok("queued"))
    } else {
        warn!("Coordinator is stopped, rejecting notification");
        Json(SimpleResponse::err("rejected", "coordinator stopped"))
    }
}

async fn handle_shutdown(State(state): State<CoordinatorApiState>) -> Json<SimpleResponse> {
    state.coordinator.shutdown();
    Json(SimpleResponse::ok("stopping"))
}
