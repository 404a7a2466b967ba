//! Core traits and types for the call agent
//!
//! This crate provides foundational types used across all other crates:
//! - Collaborator traits (STT, TTS, LLM, knowledge, persistence, notification)
//! - Call lifecycle and troubleshooting record types
//! - Customer records
//! - Error taxonomy

pub mod conversation;
pub mod customer;
pub mod error;
pub mod escalation;
pub mod traits;
pub mod transcript;

pub use conversation::{
    CallStatus, ConversationEntry, SessionState, StepOutcome, TroubleshootingStepRecord,
};
pub use customer::{CustomerProfile, CustomerTechnicalProfile, PriorIssue};
pub use error::{Collaborator, Error, Result};
pub use escalation::{CallReport, EscalationPriority, TicketRequest};
pub use transcript::TranscriptEvent;

pub use traits::{
    AudioSink, CustomerDirectory, EscalationSink, KnowledgeRetriever, LanguageModel, Notifier,
    SpeechToText, TextStream, TextToSpeech, TranscriptionStream,
};
