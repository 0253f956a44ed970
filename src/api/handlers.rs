//! HTTP API handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::watch;

use crate::stream::{Channel, ChannelView, ConnectionState, SharedViews};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection state published by the reader task.
    pub connection: watch::Receiver<ConnectionState>,
    /// Channel views published by the reader task.
    pub views: SharedViews,
    /// Prometheus recorder handle, when installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new(connection: watch::Receiver<ConnectionState>, views: SharedViews) -> Self {
        Self {
            connection,
            views,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Check if ready: connected to the hub.
    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Connection state.
    pub connection: ConnectionState,
}

/// Per-channel status entry.
#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    /// Channel name.
    pub channel: Channel,
    /// Channel view.
    #[serde(flatten)]
    pub view: ChannelView,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Connection state.
    pub connection: ConnectionState,
    /// Subscribed channels.
    pub channels: Vec<ChannelStatus>,
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check endpoint.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.is_ready(),
        connection: state.connection_state(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status endpoint with per-channel sync state.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let mut channels: Vec<ChannelStatus> = state
        .views
        .iter()
        .map(|entry| ChannelStatus {
            channel: entry.key().clone(),
            view: entry.value().clone(),
        })
        .collect();
    channels.sort_by(|a, b| a.channel.cmp(&b.channel));

    Json(StatusResponse {
        status: "running",
        connection: state.connection_state(),
        channels,
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            "metrics recorder not installed".to_string(),
        ),
    }
}
