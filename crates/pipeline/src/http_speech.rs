//! HTTP speech backends
//!
//! Both adapters talk to sidecar services over plain HTTP:
//! - STT: buffered PCM windows are POSTed to the recognizer, each response
//!   becomes a final transcript event
//! - TTS: text is POSTed, the response body is the encoded audio

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use async_trait::async_trait;
use call_agent_config::SpeechConfig;
use call_agent_core::{Error, Result, SpeechToText, TextToSpeech, TranscriptEvent, TranscriptionStream};

/// 16-bit mono PCM
const BYTES_PER_SAMPLE: usize = 2;
const FRAME_QUEUE: usize = 64;

fn build_client(config: &SpeechConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_final: Option<bool>,
    #[serde(default)]
    stability: Option<f32>,
}

/// Streaming STT over a request/response recognizer
#[derive(Clone)]
pub struct HttpSpeechToText {
    client: reqwest::Client,
    endpoint: String,
    language: String,
    sample_rate: u32,
    window_bytes: usize,
    api_key: Option<String>,
}

impl HttpSpeechToText {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let window_bytes = (config.sample_rate as usize * BYTES_PER_SAMPLE)
            * config.stt_chunk_ms as usize
            / 1000;
        Ok(Self {
            client: build_client(config)?,
            endpoint: config.stt_endpoint.clone(),
            language: config.language.clone(),
            sample_rate: config.sample_rate,
            window_bytes: window_bytes.max(BYTES_PER_SAMPLE),
            api_key: config.api_key.clone(),
        })
    }

    async fn recognize(&self, pcm: Vec<u8>) -> Result<Option<TranscriptEvent>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "audio/pcm")
            .header("X-Language", &self.language)
            .header("X-Sample-Rate", self.sample_rate.to_string())
            .body(pcm);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transcription(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::transcription(format!(
                "recognizer returned {}",
                response.status()
            )));
        }

        let body: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| Error::transcription(format!("invalid response: {}", e)))?;

        if body.text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(TranscriptEvent {
            text: body.text,
            is_final: body.is_final.unwrap_or(true),
            stability: body.stability.unwrap_or(1.0),
        }))
    }

    async fn run(
        self,
        mut frames: mpsc::Receiver<Vec<u8>>,
        results: mpsc::Sender<Result<TranscriptEvent>>,
    ) {
        let mut buffer: Vec<u8> = Vec::with_capacity(self.window_bytes * 2);

        while let Some(frame) = frames.recv().await {
            buffer.extend_from_slice(&frame);
            if buffer.len() >= self.window_bytes {
                let window = std::mem::take(&mut buffer);
                if !self.forward(window, &results).await {
                    return;
                }
            }
        }

        // Flush the tail once the caller stops sending
        if buffer.len() >= self.window_bytes / 4 {
            self.forward(buffer, &results).await;
        }
    }

    /// Returns false once nobody listens for results
    async fn forward(&self, pcm: Vec<u8>, results: &mpsc::Sender<Result<TranscriptEvent>>) -> bool {
        match self.recognize(pcm).await {
            Ok(Some(event)) => results.send(Ok(event)).await.is_ok(),
            Ok(None) => true,
            Err(e) => results.send(Err(e)).await.is_ok(),
        }
    }
}

struct HttpTranscriptionStream {
    frames: Option<mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl TranscriptionStream for HttpTranscriptionStream {
    async fn push_audio(&mut self, frame: Vec<u8>) -> Result<()> {
        match &self.frames {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| Error::transcription("recognition worker stopped")),
            None => Err(Error::transcription("stream already stopped")),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.frames.take();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::transcription(format!("recognition worker failed: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn start_stream(
        &self,
        results: mpsc::Sender<Result<TranscriptEvent>>,
    ) -> Result<Box<dyn TranscriptionStream>> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let task = tokio::spawn(self.clone().run(rx, results));
        Ok(Box::new(HttpTranscriptionStream {
            frames: Some(tx),
            task: Some(task),
        }))
    }

    fn model_name(&self) -> &str {
        "http-stt"
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
    voice: &'a str,
    sample_rate: u32,
}

/// TTS over an HTTP synthesis endpoint
pub struct HttpTextToSpeech {
    client: reqwest::Client,
    endpoint: String,
    language: String,
    voice: String,
    sample_rate: u32,
    api_key: Option<String>,
}

impl HttpTextToSpeech {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: config.tts_endpoint.clone(),
            language: config.language.clone(),
            voice: config.voice.clone(),
            sample_rate: config.sample_rate,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let body = SynthesizeRequest {
            text,
            language: &self.language,
            voice: &self.voice,
            sample_rate: self.sample_rate,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::synthesis(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::synthesis(format!(
                "synthesizer returned {}",
                response.status()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::synthesis(format!("failed to read audio: {}", e)))?;
        Ok(audio.to_vec())
    }

    fn model_name(&self) -> &str {
        &self.voice
    }
}
