//! Error taxonomy shared by every crate in the call agent
//!
//! Four families of failure reach the session control loop:
//! - `Transport`: the caller's media connection dropped or rejected a write
//! - `Collaborator`: an external service (STT, TTS, LLM, knowledge, lookup,
//!   notification) failed
//! - `Validation`: caller input (identity digits) was malformed
//! - `EscalationSink`: a ticket could not be written to the primary store

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External collaborator that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Transcription,
    Synthesis,
    Generation,
    Knowledge,
    CustomerLookup,
    Notification,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
            Self::Generation => "generation",
            Self::Knowledge => "knowledge",
            Self::CustomerLookup => "customer_lookup",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{collaborator} collaborator failed: {message}")]
    Collaborator {
        collaborator: Collaborator,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Escalation sink error: {0}")]
    EscalationSink(String),
}

impl Error {
    pub fn collaborator(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    pub fn transcription(message: impl Into<String>) -> Self {
        Self::collaborator(Collaborator::Transcription, message)
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::collaborator(Collaborator::Synthesis, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::collaborator(Collaborator::Generation, message)
    }

    pub fn knowledge(message: impl Into<String>) -> Self {
        Self::collaborator(Collaborator::Knowledge, message)
    }

    pub fn customer_lookup(message: impl Into<String>) -> Self {
        Self::collaborator(Collaborator::CustomerLookup, message)
    }

    pub fn notification(message: impl Into<String>) -> Self {
        Self::collaborator(Collaborator::Notification, message)
    }

    /// Whether the failure came from an external collaborator
    pub fn is_collaborator(&self) -> bool {
        matches!(self, Self::Collaborator { .. })
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Collaborator { collaborator, .. } => collaborator.as_str(),
            Self::Validation(_) => "validation",
            Self::EscalationSink(_) => "escalation_sink",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
