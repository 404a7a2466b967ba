//! Call Agent Server
//!
//! Media-stream WebSocket transport plus health, readiness and metrics
//! endpoints.

pub mod http;
pub mod metrics;
pub mod protocol;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use protocol::{OutboundMedia, TransportEvent};
pub use state::AppState;
pub use websocket::WsAudioSink;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Protocol(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Startup(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServerError> for call_agent_core::Error {
    fn from(err: ServerError) -> Self {
        call_agent_core::Error::Transport(err.to_string())
    }
}
