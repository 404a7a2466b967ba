//! Audio ingest, response caching and speech delivery
//!
//! Components:
//! - [`TtlCache`] / [`ResponseCaches`]: read-through caches with lazy expiry
//! - [`TranscriptFilter`] / [`UtteranceGate`]: noise and interim filtering
//! - [`AudioIngestBridge`]: feeds the transcription collaborator and
//!   forwards transcript events onto the session channel
//! - [`SentenceSegmenter`] / [`ResponseDeliveryPipeline`]: first-segment-first
//!   synthesis with ordered, batched delivery
//! - HTTP speech adapters

pub mod cache;
pub mod delivery;
pub mod filter;
pub mod http_speech;
pub mod ingest;
pub mod segmenter;

pub use cache::{
    cache_key, CacheStats, Clock, ManualClock, ResponseCaches, SystemClock, TtlCache,
};
pub use delivery::{AudioSegment, DeliveryReport, ResponseDeliveryPipeline};
pub use filter::{TranscriptFilter, UtteranceGate};
pub use http_speech::{HttpSpeechToText, HttpTextToSpeech};
pub use ingest::{AudioIngestBridge, EarlyFrames, IngestHandle};
pub use segmenter::SentenceSegmenter;

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for call_agent_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Transcription(msg) | PipelineError::Ingest(msg) => {
                call_agent_core::Error::transcription(msg)
            }
            PipelineError::Synthesis(msg) => call_agent_core::Error::synthesis(msg),
            PipelineError::ChannelClosed => {
                call_agent_core::Error::Transport("channel closed".to_string())
            }
        }
    }
}
