//! Configuration management for the call agent
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, `config/{env}`)
//! - Environment variables (CALL_AGENT__ prefix)
//!
//! Troubleshooting decision trees are loaded separately from
//! `config/flows.yaml` into an immutable [`FlowCatalog`].

pub mod criteria;
pub mod flows;
pub mod settings;

pub use criteria::{CriteriaUpdate, EscalationCriteria};
pub use flows::{
    FlowCatalog, StepDefinition, StepEdge, StepKind, TroubleshootingFlow, FALLBACK_ISSUE_TYPE,
};
pub use settings::{
    load_settings, CacheConfig, DeliveryConfig, DialogueConfig, IdentityConfig, KnowledgeConfig,
    LlmConfig, NotifierKind, ObservabilityConfig, PersistenceConfig, RuntimeEnvironment,
    ServerConfig, Settings, SpeechConfig, TranscriptConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for call_agent_core::Error {
    fn from(err: ConfigError) -> Self {
        call_agent_core::Error::Validation(err.to_string())
    }
}
