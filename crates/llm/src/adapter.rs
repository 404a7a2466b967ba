//! Language model adapter
//!
//! Bridges an [`LlmBackend`] to the core [`LanguageModel`] contract:
//! `send(prompt, context)` becomes a system + user message pair and the
//! backend's chunk channel becomes a [`TextStream`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use call_agent_core::{Error, LanguageModel, Result, TextStream};

use crate::backend::LlmBackend;
use crate::prompt::PromptBuilder;

const CHUNK_BUFFER: usize = 64;

/// Wraps an [`LlmBackend`] as a core [`LanguageModel`]
///
/// # Example
///
/// ```ignore
/// let backend = OllamaBackend::new(&settings.llm)?;
/// let model: Arc<dyn LanguageModel> = Arc::new(LanguageModelAdapter::new(backend));
/// ```
pub struct LanguageModelAdapter {
    backend: Arc<dyn LlmBackend>,
    prompts: PromptBuilder,
    model_name: String,
}

impl LanguageModelAdapter {
    pub fn new<B: LlmBackend + 'static>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn LlmBackend>) -> Self {
        let model_name = backend.model_name().to_string();
        Self {
            backend,
            prompts: PromptBuilder::default(),
            model_name,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }
}

#[async_trait]
impl LanguageModel for LanguageModelAdapter {
    async fn send(&self, prompt: &str, context: &str) -> Result<TextStream> {
        let messages = self.prompts.build(prompt, context);
        let backend = self.backend.clone();

        Ok(Box::pin(async_stream::stream! {
            let (tx, mut rx) = mpsc::channel::<String>(CHUNK_BUFFER);

            let stream_task = tokio::spawn(async move {
                backend.generate_stream(&messages, tx).await
            });

            while let Some(text) = rx.recv().await {
                yield Ok(text);
            }

            match stream_task.await {
                Ok(Ok(result)) => {
                    tracing::debug!(
                        chunks = result.chunks,
                        ttft_ms = result.time_to_first_token_ms,
                        total_ms = result.total_time_ms,
                        "Generation finished"
                    );
                }
                Ok(Err(e)) => yield Err(Error::from(e)),
                Err(e) => yield Err(Error::generation(format!("Task join error: {}", e))),
            }
        }))
    }

    async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FinishReason, GenerationResult};
    use crate::prompt::Message;
    use crate::LlmError;
    use futures::StreamExt;
    use parking_lot::Mutex;

    struct ScriptedBackend {
        chunks: Vec<&'static str>,
        fail: bool,
        seen: Mutex<Vec<Message>>,
    }

    impl ScriptedBackend {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate(&self, _messages: &[Message]) -> std::result::Result<GenerationResult, LlmError> {
            unimplemented!("adapter only streams")
        }

        async fn generate_stream(
            &self,
            messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> std::result::Result<GenerationResult, LlmError> {
            self.seen.lock().extend(messages.iter().cloned());
            for chunk in &self.chunks {
                let _ = tx.send(chunk.to_string()).await;
            }
            if self.fail {
                return Err(LlmError::Api("rejected".into()));
            }
            Ok(GenerationResult {
                text: self.chunks.concat(),
                chunks: self.chunks.len(),
                time_to_first_token_ms: 0,
                total_time_ms: 0,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_send_streams_chunks_in_order() {
        let backend = Arc::new(ScriptedBackend::new(vec!["Please ", "restart ", "the modem."]));
        let adapter = LanguageModelAdapter::from_arc(backend.clone());

        let stream = adapter.send("it is not working", "Issue: internet_down").await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.concat(), "Please restart the modem.");
        let seen = backend.seen.lock();
        assert!(seen[0].content.contains("Issue: internet_down"));
        assert_eq!(seen[1].content, "it is not working");
        assert_eq!(adapter.model_name(), "scripted");
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_generation_error() {
        let mut backend = ScriptedBackend::new(vec!["Partial"]);
        backend.fail = true;
        let adapter = LanguageModelAdapter::new(backend);

        let items: Vec<Result<String>> = adapter.send("hi", "").await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), "generation");
    }
}
