//! Huddle Relay Server
//!
//! A lightweight WebSocket relay for group calls that provides:
//!
//! 1. **Authenticated channels**: every WebSocket upgrade carries a session
//!    token (cookie, bearer header or `token` query parameter). Rejected
//!    handshakes get HTTP 401 and never reach the call registry.
//!
//! 2. **Call membership**: connections join and leave named calls; members
//!    are told when peers arrive and depart.
//!
//! 3. **Signaling relay**: SDP offers/answers and ICE candidates are forwarded
//!    byte-for-byte to one member of the sender's call.
//!
//! 4. **In-call chat**: text messages fan out to the sender's call.
//!
//! Media never touches the relay; peers connect to each other directly.

pub mod auth;
pub mod handler;
pub mod registry;
pub mod relay;
pub mod state;

use std::collections::HashMap;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::Handshake;
use state::RelayState;

/// Service name reported by the HTTP endpoints.
pub const SERVICE_NAME: &str = "huddle-relay";

/// Build the relay's HTTP router.
pub fn router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/info", get(info_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler. Authenticates before accepting the upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> Response {
    let handshake = Handshake::new(&headers, &params);

    match state.authenticator.authenticate(&handshake).await {
        Ok(connection) => ws
            .on_upgrade(move |socket| handler::handle_websocket(socket, state, connection))
            .into_response(),
        Err(e) => {
            tracing::info!(error = %e, "Rejected WebSocket handshake");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Authentication error" })),
            )
                .into_response()
        }
    }
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "online_connections": state.online_count(),
        "active_calls": state.registry.active_calls(),
        "call_participants": state.registry.participant_count(),
    }))
}

/// Server info endpoint: metadata including region.
/// Also useful for client-side ping measurement (time the round-trip).
async fn info_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "region": state.config.region,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use auth::JwtIdentityVerifier;
    use state::RelayConfig;

    fn app() -> Router {
        let verifier = Arc::new(JwtIdentityVerifier::new(b"test-secret"));
        router(RelayState::new(RelayConfig::default(), verifier))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_json_structure() {
        let (status, body) = get_json(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "huddle-relay");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_stats_start_at_zero() {
        let (status, body) = get_json(app(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online_connections"], 0);
        assert_eq!(body["active_calls"], 0);
        assert_eq!(body["call_participants"], 0);
    }

    #[tokio::test]
    async fn test_info_reports_region() {
        let (_, body) = get_json(app(), "/info").await;
        assert_eq!(body["region"], "local");
        assert!(body["timestamp"].is_i64());
    }
}
