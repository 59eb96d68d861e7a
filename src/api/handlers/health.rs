//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxychain"
        })),
    )
}

/// Manager counters, relay diagnostics and the effective pool settings
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.manager.status();
    let pool = state.manager.pool_config();

    Json(json!({
        "nodes": status.nodes,
        "endpoints": status.endpoints,
        "last_refresh": status.last_refresh,
        "relay": status.relay,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "settings": {
            "protocols": pool.enabled_protocols,
            "relay_enabled": state.config.relay.enabled,
            "cache_ttl_seconds": pool.cache_ttl_seconds,
            "refresh_interval_seconds": pool.refresh_interval_seconds,
        }
    }))
}
