//! Prometheus metrics
//!
//! The session, delivery and cache layers record through the `metrics`
//! facade; this module installs the recorder and renders the scrape output.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the global Prometheus recorder
///
/// Returns `None` when a recorder is already installed (tests, repeated
/// initialization); the process keeps running without a scrape endpoint.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe_metrics();
            Some(handle)
        },
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        },
    }
}

fn describe_metrics() {
    metrics::describe_counter!("call_agent_calls_started_total", "Calls that reached the start event");
    metrics::describe_counter!(
        "call_agent_calls_ended_total",
        "Calls whose summary was flushed, by final status"
    );
    metrics::describe_counter!("call_agent_escalations_total", "Escalations by ticket priority");
    metrics::describe_counter!(
        "call_agent_escalation_fallback_total",
        "Tickets written to the local fallback log"
    );
    metrics::describe_counter!("call_agent_cache_hits_total", "Response cache hits by cache");
    metrics::describe_counter!("call_agent_cache_misses_total", "Response cache misses by cache");
    metrics::describe_histogram!(
        "call_agent_response_latency_seconds",
        metrics::Unit::Seconds,
        "Final transcript to committed reply"
    );
    metrics::describe_histogram!(
        "call_agent_time_to_first_audio_seconds",
        metrics::Unit::Seconds,
        "Reply text to first audio frame sent"
    );
    metrics::describe_gauge!("call_agent_active_calls", "Open media-stream connections");
}

/// Record the number of open media streams
pub fn record_active_calls(count: usize) {
    metrics::gauge!("call_agent_active_calls").set(count as f64);
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
