//! Speech processing traits

use crate::{Result, TranscriptEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A live recognition stream opened by [`SpeechToText::start_stream`]
///
/// Results (interim and final) are delivered on the channel handed to
/// `start_stream`, never through callbacks into caller state.
#[async_trait]
pub trait TranscriptionStream: Send {
    /// Forward one raw inbound audio frame
    async fn push_audio(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Flush pending audio and close the stream
    async fn stop(&mut self) -> Result<()>;
}

/// Speech-to-Text interface
///
/// # Example
///
/// ```ignore
/// let (tx, mut rx) = tokio::sync::mpsc::channel(32);
/// let mut stream = stt.start_stream(tx).await?;
/// stream.push_audio(frame).await?;
/// while let Some(Ok(event)) = rx.recv().await {
///     println!("{} (final: {})", event.text, event.is_final);
/// }
/// ```
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Open a streaming recognition session
    async fn start_stream(
        &self,
        results: mpsc::Sender<Result<TranscriptEvent>>,
    ) -> Result<Box<dyn TranscriptionStream>>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-Speech interface
///
/// Fails with a synthesis collaborator error on provider fault.
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    /// Synthesize text to encoded audio bytes ready for the transport
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
