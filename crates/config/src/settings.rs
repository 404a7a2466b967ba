//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, EscalationCriteria};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// DTMF identity collection
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Transcript noise filtering and interim gating
    #[serde(default)]
    pub transcript: TranscriptConfig,

    /// Response segmentation and synthesis batching
    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub dialogue: DialogueConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Process-wide escalation policy; each session works on a copy
    #[serde(default)]
    pub escalation: EscalationCriteria,

    /// Path to troubleshooting flow definitions (YAML)
    #[serde(default = "default_flows_path")]
    pub flows_path: String,
}

fn default_flows_path() -> String {
    "config/flows.yaml".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            identity: IdentityConfig::default(),
            transcript: TranscriptConfig::default(),
            delivery: DeliveryConfig::default(),
            cache: CacheConfig::default(),
            dialogue: DialogueConfig::default(),
            llm: LlmConfig::default(),
            speech: SpeechConfig::default(),
            knowledge: KnowledgeConfig::default(),
            persistence: PersistenceConfig::default(),
            escalation: EscalationCriteria::default(),
            flows_path: default_flows_path(),
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_identity()?;
        self.validate_transcript()?;
        self.validate_delivery()?;
        self.validate_llm()?;
        self.validate_persistence()?;
        self.escalation.validate()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if server.bind_max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                field: "server.bind_max_retries".to_string(),
                message: format!("Must be at most 10, got {}", server.bind_max_retries),
            });
        }

        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }

    fn validate_identity(&self) -> Result<(), ConfigError> {
        let identity = &self.identity;

        if identity.id_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "identity.id_length".to_string(),
                message: "Identifier length must be at least 1".to_string(),
            });
        }

        let reserved = [
            identity.reset_digit,
            identity.confirm_digit,
            identity.human_request_digit,
        ];
        for (i, a) in reserved.iter().enumerate() {
            if reserved[i + 1..].contains(a) {
                return Err(ConfigError::InvalidValue {
                    field: "identity".to_string(),
                    message: format!("Reserved digit '{}' is used twice", a),
                });
            }
        }

        if identity.reset_digit.is_ascii_digit() || identity.confirm_digit.is_ascii_digit() {
            return Err(ConfigError::InvalidValue {
                field: "identity".to_string(),
                message: "Reset and confirm keys must not be numeric".to_string(),
            });
        }

        Ok(())
    }

    fn validate_transcript(&self) -> Result<(), ConfigError> {
        let stability = self.transcript.interim_stability_threshold;
        if !(0.0..=1.0).contains(&stability) {
            return Err(ConfigError::InvalidValue {
                field: "transcript.interim_stability_threshold".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", stability),
            });
        }
        Ok(())
    }

    fn validate_delivery(&self) -> Result<(), ConfigError> {
        let delivery = &self.delivery;

        if delivery.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "delivery.batch_size".to_string(),
                message: "Batch size must be at least 1".to_string(),
            });
        }

        if delivery.merge_below_chars >= delivery.max_segment_chars {
            return Err(ConfigError::InvalidValue {
                field: "delivery.merge_below_chars".to_string(),
                message: format!(
                    "Must be less than max_segment_chars ({})",
                    delivery.max_segment_chars
                ),
            });
        }

        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", self.llm.temperature),
            });
        }
        Ok(())
    }

    fn validate_persistence(&self) -> Result<(), ConfigError> {
        if self.environment.is_production() && self.persistence.ticket_endpoint.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "persistence.ticket_endpoint".to_string(),
                message: "Ticket endpoint must be configured in production".to_string(),
            });
        }
        if self.persistence.fallback_log_path.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "persistence.fallback_log_path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path for the media stream
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Listener bind attempts after the first failure
    #[serde(default = "default_bind_max_retries")]
    pub bind_max_retries: u32,

    #[serde(default = "default_bind_initial_backoff_ms")]
    pub bind_initial_backoff_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_bind_max_retries() -> u32 {
    5
}
fn default_bind_initial_backoff_ms() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            bind_max_retries: default_bind_max_retries(),
            bind_initial_backoff_ms: default_bind_initial_backoff_ms(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// OTLP endpoint for traces (telemetry feature)
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            otlp_endpoint: None,
            metrics_enabled: true,
        }
    }
}

/// DTMF identity collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Number of digits in a registered phone number
    #[serde(default = "default_id_length")]
    pub id_length: usize,

    #[serde(default = "default_reset_digit")]
    pub reset_digit: char,

    #[serde(default = "default_confirm_digit")]
    pub confirm_digit: char,

    /// Submit as soon as `id_length` digits have been keyed
    #[serde(default = "default_true")]
    pub auto_submit: bool,

    /// Keypad shortcut for "speak to a human" outside identity collection
    #[serde(default = "default_human_digit")]
    pub human_request_digit: char,
}

fn default_id_length() -> usize {
    10
}
fn default_reset_digit() -> char {
    '*'
}
fn default_confirm_digit() -> char {
    '#'
}
fn default_human_digit() -> char {
    '0'
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            id_length: default_id_length(),
            reset_digit: default_reset_digit(),
            confirm_digit: default_confirm_digit(),
            auto_submit: true,
            human_request_digit: default_human_digit(),
        }
    }
}

/// Transcript filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Finals shorter than this (after trimming) are noise
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    #[serde(default = "default_interim_stability")]
    pub interim_stability_threshold: f32,

    #[serde(default = "default_interim_min_words")]
    pub interim_min_words: usize,

    /// Tokens that stand in for transcription misfires
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

fn default_min_chars() -> usize {
    2
}
fn default_interim_stability() -> f32 {
    0.7
}
fn default_interim_min_words() -> usize {
    5
}
fn default_denylist() -> Vec<String> {
    vec![
        "sex".to_string(),
        "സെക്സ്".to_string(),
        "porn".to_string(),
        "xxx".to_string(),
    ]
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            interim_stability_threshold: default_interim_stability(),
            interim_min_words: default_interim_min_words(),
            denylist: default_denylist(),
        }
    }
}

/// Response segmentation and synthesis batching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Emit a segment once it grows past this many chars
    #[serde(default = "default_max_segment_chars")]
    pub max_segment_chars: usize,

    /// Emit at a sentence end once the segment has this many chars
    #[serde(default = "default_sentence_end_min_chars")]
    pub sentence_end_min_chars: usize,

    /// Segments shorter than this are merged into a neighbour
    #[serde(default = "default_merge_below_chars")]
    pub merge_below_chars: usize,

    /// Concurrent synthesis requests per batch after the first segment
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_pacing_ms")]
    pub batch_pacing_ms: u64,
}

fn default_max_segment_chars() -> usize {
    50
}
fn default_sentence_end_min_chars() -> usize {
    30
}
fn default_merge_below_chars() -> usize {
    15
}
fn default_batch_size() -> usize {
    3
}
fn default_batch_pacing_ms() -> u64 {
    20
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_segment_chars: default_max_segment_chars(),
            sentence_end_min_chars: default_sentence_end_min_chars(),
            merge_below_chars: default_merge_below_chars(),
            batch_size: default_batch_size(),
            batch_pacing_ms: default_batch_pacing_ms(),
        }
    }
}

/// TTLs for the three response caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_dialogue_ttl")]
    pub dialogue_ttl_secs: u64,

    #[serde(default = "default_knowledge_ttl")]
    pub knowledge_ttl_secs: u64,

    #[serde(default = "default_audio_ttl")]
    pub audio_ttl_secs: u64,
}

fn default_dialogue_ttl() -> u64 {
    30 * 60
}
fn default_knowledge_ttl() -> u64 {
    2 * 60 * 60
}
fn default_audio_ttl() -> u64 {
    6 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dialogue_ttl_secs: default_dialogue_ttl(),
            knowledge_ttl_secs: default_knowledge_ttl(),
            audio_ttl_secs: default_audio_ttl(),
        }
    }
}

/// Reply generation around the decision engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Phrase step prompts through the language model
    #[serde(default = "default_true")]
    pub use_language_model: bool,

    #[serde(default = "default_knowledge_timeout_ms")]
    pub knowledge_timeout_ms: u64,

    /// Exchanges included in the model context
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Steps included in the model context
    #[serde(default = "default_step_window")]
    pub step_window: usize,

    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,
}

fn default_knowledge_timeout_ms() -> u64 {
    300
}
fn default_history_window() -> usize {
    5
}
fn default_step_window() -> usize {
    3
}
fn default_max_response_chars() -> usize {
    500
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            use_language_model: true,
            knowledge_timeout_ms: default_knowledge_timeout_ms(),
            history_window: default_history_window(),
            step_window: default_step_window(),
            max_response_chars: default_max_response_chars(),
        }
    }
}

/// Language model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "llama3.2:3b".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> usize {
    256
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// Speech provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_stt_endpoint")]
    pub stt_endpoint: String,

    #[serde(default = "default_tts_endpoint")]
    pub tts_endpoint: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Inbound audio buffered before each recognition request
    #[serde(default = "default_stt_chunk_ms")]
    pub stt_chunk_ms: u64,

    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_stt_endpoint() -> String {
    "http://localhost:8090/v1/recognize".to_string()
}
fn default_tts_endpoint() -> String {
    "http://localhost:8091/v1/synthesize".to_string()
}
fn default_language() -> String {
    "ml-IN".to_string()
}
fn default_voice() -> String {
    "ml-IN-Standard-A".to_string()
}
fn default_sample_rate() -> u32 {
    8000
}
fn default_stt_chunk_ms() -> u64 {
    1000
}
fn default_speech_timeout_secs() -> u64 {
    10
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_endpoint: default_stt_endpoint(),
            tts_endpoint: default_tts_endpoint(),
            language: default_language(),
            voice: default_voice(),
            sample_rate: default_sample_rate(),
            stt_chunk_ms: default_stt_chunk_ms(),
            timeout_secs: default_speech_timeout_secs(),
            api_key: None,
        }
    }
}

/// Knowledge documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_dir")]
    pub documents_dir: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_knowledge_dir() -> String {
    "knowledge".to_string()
}
fn default_top_k() -> usize {
    2
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_knowledge_dir(),
            top_k: default_top_k(),
        }
    }
}

/// Which notifier receives end-of-call reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Telegram,
}

/// Customer lookup, ticket storage and notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_customers_file")]
    pub customers_file: String,

    /// REST endpoint for escalation tickets; unset means local log only
    #[serde(default)]
    pub ticket_endpoint: Option<String>,

    #[serde(default)]
    pub ticket_api_key: Option<String>,

    #[serde(default = "default_ticket_retries")]
    pub ticket_max_retries: u32,

    #[serde(default = "default_fallback_log")]
    pub fallback_log_path: String,

    #[serde(default)]
    pub notifier: NotifierKind,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

fn default_customers_file() -> String {
    "data/customers.json".to_string()
}
fn default_ticket_retries() -> u32 {
    3
}
fn default_fallback_log() -> String {
    "logs/escalations.log".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            customers_file: default_customers_file(),
            ticket_endpoint: None,
            ticket_api_key: None,
            ticket_max_retries: default_ticket_retries(),
            fallback_log_path: default_fallback_log(),
            notifier: NotifierKind::default(),
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (CALL_AGENT__ prefix, `__` separator)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("CALL_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
