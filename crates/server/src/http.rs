//! HTTP Endpoints
//!
//! Health, readiness and metrics next to the media-stream WebSocket.

use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::{ws_handler, ws_handler_with_id};

const READINESS_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.settings.server;
    let cors_layer = build_cors_layer(&server.cors_origins, server.cors_enabled);
    let ws_path = normalize_path(&server.ws_path);
    let ws_path_with_id = format!("{}/:call_id", ws_path.trim_end_matches('/'));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route(&ws_path, get(ws_handler))
        .route(&ws_path_with_id, get(ws_handler_with_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        "/ws".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Build CORS layer from configured origins
///
/// Disabled CORS is permissive; an empty or fully invalid origin list falls
/// back to localhost.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No usable CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

/// Liveness plus a summary of what the process loaded
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut all_healthy = true;

    let flow_count = state.deps.catalog.len();
    checks.insert(
        "flows".to_string(),
        serde_json::json!({
            "status": if flow_count > 0 { "ok" } else { "missing" },
            "count": flow_count,
            "issue_types": state.deps.catalog.issue_types(),
        }),
    );
    if flow_count == 0 {
        all_healthy = false;
    }

    checks.insert(
        "calls".to_string(),
        serde_json::json!({
            "status": "ok",
            "active": state.active_call_count(),
        }),
    );

    checks.insert(
        "speech".to_string(),
        serde_json::json!({
            "status": "ok",
            "stt": state.deps.stt.model_name(),
            "tts": state.deps.tts.model_name(),
        }),
    );

    checks.insert(
        "knowledge".to_string(),
        serde_json::json!({
            "status": if state.deps.knowledge.is_some() { "ok" } else { "disabled" },
        }),
    );

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if all_healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": checks
        })),
    )
}

/// Ready once flows are loaded and, when dialogue generation is on, the
/// language model answers
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut ready = !state.deps.catalog.is_empty();

    checks.insert(
        "flows".to_string(),
        serde_json::json!({
            "status": if ready { "ok" } else { "missing" },
        }),
    );

    let llm_status = match &state.deps.llm {
        Some(llm) if state.settings.dialogue.use_language_model => {
            match tokio::time::timeout(READINESS_CHECK_TIMEOUT, llm.is_available()).await {
                Ok(true) => "ok",
                Ok(false) => {
                    ready = false;
                    "unreachable"
                },
                Err(_) => {
                    ready = false;
                    "timeout"
                },
            }
        },
        // Rule-based replies keep the call going without a model
        _ => "disabled",
    };
    checks.insert(
        "llm_backend".to_string(),
        serde_json::json!({
            "status": llm_status,
            "model": state.deps.llm.as_ref().map(|llm| llm.model_name().to_string()),
        }),
    );

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": checks
        })),
    )
}
