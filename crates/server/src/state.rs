//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use call_agent_agent::SessionDependencies;
use call_agent_config::Settings;

use crate::metrics::record_active_calls;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Collaborators cloned into every call
    pub deps: SessionDependencies,
    /// Hang-up token per open media stream, keyed by connection id
    pub active_calls: Arc<DashMap<String, CancellationToken>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(deps: SessionDependencies) -> Self {
        Self {
            settings: deps.settings.clone(),
            deps,
            active_calls: Arc::new(DashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    /// Track a new media stream and return its hang-up token
    pub fn register_call(&self, connection_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.active_calls
            .insert(connection_id.to_string(), token.clone());
        record_active_calls(self.active_calls.len());
        token
    }

    pub fn release_call(&self, connection_id: &str) {
        self.active_calls.remove(connection_id);
        record_active_calls(self.active_calls.len());
    }

    pub fn active_call_count(&self) -> usize {
        self.active_calls.len()
    }

    /// Cancel every open call, used on shutdown
    pub fn hang_up_all(&self) {
        for entry in self.active_calls.iter() {
            entry.value().cancel();
        }
        tracing::info!(calls = self.active_calls.len(), "Hung up active calls");
    }
}
