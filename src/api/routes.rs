//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health, metrics, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Status endpoint
        .route("/api/v1/status", get(status))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ChannelView, ConnectionState, SharedViews};
    use crate::stream::Channel;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dashmap::DashMap;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn state(connection: ConnectionState) -> (AppState, watch::Sender<ConnectionState>, SharedViews) {
        let (tx, rx) = watch::channel(connection);
        let views: SharedViews = Arc::new(DashMap::new());
        (AppState::new(rx, Arc::clone(&views)), tx, views)
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _tx, _views) = state(ConnectionState::Disconnected);

        assert_eq!(get_status(create_router(state), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_connected() {
        let (state, _tx, _views) = state(ConnectionState::Reconnecting);

        assert_eq!(
            get_status(create_router(state), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn ready_endpoint_follows_connection_state() {
        let (state, tx, _views) = state(ConnectionState::Connecting);
        tx.send_replace(ConnectionState::Connected);

        assert_eq!(get_status(create_router(state), "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_lists_channels() {
        let (state, _tx, views) = state(ConnectionState::Connected);
        views.insert(
            Channel::market("BTC-ETH"),
            ChannelView {
                subscribers: 2,
                nonce: Some(101),
                synced: true,
                state: None,
            },
        );

        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["connection"], "connected");
        assert_eq!(json["channels"][0]["channel"], "orders:BTC-ETH");
        assert_eq!(json["channels"][0]["nonce"], 101);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let (state, _tx, _views) = state(ConnectionState::Connected);

        assert_eq!(get_status(create_router(state), "/metrics").await, StatusCode::NOT_FOUND);
    }
}
