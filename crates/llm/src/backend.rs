//! LLM backend implementations
//!
//! Ollama-compatible chat API with streaming (NDJSON) and retry with
//! exponential backoff on transient failures.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use call_agent_config::LlmConfig;

use crate::prompt::Message;
use crate::LlmError;

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub chunks: usize,
    pub time_to_first_token_ms: u64,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a complete response
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Generate with streaming; chunks are sent on `tx` as they arrive
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: LlmConfig,
}

impl OllamaBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn chat_request(&self, messages: &[Message], stream: bool) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens as i32,
            },
        }
    }

    /// Send a request, retrying network failures and 5xx responses
    async fn send_with_retry(
        &self,
        request: &OllamaChatRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let mut last_error = None;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }

    async fn execute_request(
        &self,
        request: &OllamaChatRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::from(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        // 5xx errors are retryable, 4xx are not
        if status.is_server_error() {
            return Err(LlmError::Network(format!("Server error {}: {}", status, body)));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(self.config.model.clone()));
        }
        Err(LlmError::Api(format!("{}: {}", status, body)))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.chat_request(messages, false);
        let response = self.send_with_retry(&request).await?;

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: body.message.content,
            chunks: 1,
            time_to_first_token_ms: total_time_ms,
            total_time_ms,
            finish_reason: if body.done {
                FinishReason::Stop
            } else {
                FinishReason::Length
            },
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.chat_request(messages, true);
        let response = self.send_with_retry(&request).await?;

        let mut first_token_time = None;
        let mut chunks = 0;
        let mut full_response = String::new();
        let mut pending = String::new();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            // NDJSON: a line may span network chunks
            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                let Some(chunk) = parse_stream_line(&line)? else {
                    continue;
                };

                if !chunk.message.content.is_empty() {
                    if first_token_time.is_none() {
                        first_token_time = Some(start.elapsed());
                    }
                    chunks += 1;
                    full_response.push_str(&chunk.message.content);

                    if tx.send(chunk.message.content).await.is_err() {
                        return Ok(GenerationResult {
                            text: full_response,
                            chunks,
                            time_to_first_token_ms: millis(first_token_time),
                            total_time_ms: start.elapsed().as_millis() as u64,
                            finish_reason: FinishReason::Cancelled,
                        });
                    }
                }

                if chunk.done {
                    return Ok(GenerationResult {
                        text: full_response,
                        chunks,
                        time_to_first_token_ms: millis(first_token_time),
                        total_time_ms: start.elapsed().as_millis() as u64,
                        finish_reason: FinishReason::Stop,
                    });
                }
            }
        }

        // Stream ended without a done marker
        if let Some(chunk) = parse_stream_line(&pending)? {
            if !chunk.message.content.is_empty() {
                chunks += 1;
                full_response.push_str(&chunk.message.content);
                let _ = tx.send(chunk.message.content).await;
            }
        }

        Ok(GenerationResult {
            text: full_response,
            chunks,
            time_to_first_token_ms: millis(first_token_time),
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: FinishReason::Length,
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn millis(d: Option<Duration>) -> u64 {
    d.map(|t| t.as_millis() as u64).unwrap_or(0)
}

fn parse_stream_line(line: &str) -> Result<Option<OllamaStreamChunk>, LlmError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Ok(error) = serde_json::from_str::<OllamaStreamError>(line) {
        return Err(LlmError::Generation(error.error));
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, line)))
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: OllamaMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamError {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Role;

    #[test]
    fn test_message_conversion() {
        let msg = Message {
            role: Role::User,
            content: "Hello".to_string(),
        };
        let ollama_msg: OllamaMessage = (&msg).into();
        assert_eq!(ollama_msg.role, "user");
        assert_eq!(ollama_msg.content, "Hello");
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let config = LlmConfig {
            endpoint: "http://localhost:11434/".to_string(),
            ..Default::default()
        };
        let backend = OllamaBackend::new(&config).unwrap();
        assert_eq!(backend.api_url("/chat"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(OllamaBackend::is_retryable(&LlmError::Timeout));
        assert!(OllamaBackend::is_retryable(&LlmError::Network("reset".into())));
        assert!(!OllamaBackend::is_retryable(&LlmError::Api("400".into())));
        assert!(!OllamaBackend::is_retryable(&LlmError::ModelNotFound("x".into())));
    }

    #[test]
    fn test_parse_stream_line() {
        let chunk = parse_stream_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.message.content, "Hi");
        assert!(!chunk.done);

        assert!(parse_stream_line("  ").unwrap().is_none());
        assert!(matches!(
            parse_stream_line(r#"{"error":"model not loaded"}"#),
            Err(LlmError::Generation(_))
        ));
        assert!(matches!(
            parse_stream_line("not json"),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        let config = LlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            max_retries: 1,
            initial_backoff_ms: 1,
            timeout_secs: 1,
            ..Default::default()
        };
        let backend = OllamaBackend::new(&config).unwrap();
        let result = backend.generate(&[Message::user("hello")]).await;
        assert!(matches!(
            result,
            Err(LlmError::Network(_)) | Err(LlmError::Timeout)
        ));
        assert!(!backend.is_available().await);
    }
}
