//! Collaborator traits for the call agent
//!
//! Every external service the session talks to sits behind one of these,
//! so backends can be swapped from configuration and mocked in tests.
//!
//! ```text
//! Speech:
//!   - SpeechToText / TranscriptionStream: streaming audio → transcript events
//!   - TextToSpeech: text → audio bytes
//!
//! Language model:
//!   - LanguageModel: prompt + context → text stream
//!
//! Services:
//!   - KnowledgeRetriever, CustomerDirectory, EscalationSink, Notifier
//!
//! Transport:
//!   - AudioSink: outbound media frames
//! ```

mod llm;
mod services;
mod speech;

pub use llm::{LanguageModel, TextStream};
pub use services::{AudioSink, CustomerDirectory, EscalationSink, KnowledgeRetriever, Notifier};
pub use speech::{SpeechToText, TextToSpeech, TranscriptionStream};
