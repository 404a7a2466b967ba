//! Language model integration
//!
//! Features:
//! - Ollama-compatible chat backend with streaming and retry/backoff
//! - Support-agent system prompt
//! - Adapter to the core `LanguageModel` contract

pub mod adapter;
pub mod backend;
pub mod prompt;

pub use adapter::LanguageModelAdapter;
pub use backend::{FinishReason, GenerationResult, LlmBackend, OllamaBackend};
pub use prompt::{Message, PromptBuilder, Role, SYSTEM_PROMPT};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for call_agent_core::Error {
    fn from(err: LlmError) -> Self {
        call_agent_core::Error::generation(err.to_string())
    }
}
