//! Conversational language model trait

use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of generated text chunks
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Prompt → text-stream service
///
/// Fails with a generation collaborator error, either when the request is
/// rejected or mid-stream.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Send a prompt with its model context and stream back the reply
    async fn send(&self, prompt: &str, context: &str) -> Result<TextStream>;

    /// Check if model is available
    async fn is_available(&self) -> bool {
        true
    }

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
