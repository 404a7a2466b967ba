//! Delivery ordering and cache behaviour with out-of-order synthesis

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use call_agent_config::{CacheConfig, DeliveryConfig};
use call_agent_core::{AudioSink, Error, Result, TextToSpeech};
use call_agent_pipeline::{ResponseCaches, ResponseDeliveryPipeline, SentenceSegmenter};

const RESPONSE: &str = "Please switch off the modem and wait for thirty seconds. \
                        Then switch it on again and watch the lights carefully. \
                        After two minutes check whether the internet light is green. \
                        Tell me when the lights are steady and we can continue.";

/// Later segments finish first: delay shrinks with the segment's position
struct SkewedTts {
    order: Vec<String>,
    calls: AtomicUsize,
}

impl SkewedTts {
    fn new(segments: Vec<String>) -> Self {
        Self {
            order: segments,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextToSpeech for SkewedTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let position = self
            .order
            .iter()
            .position(|s| s == text)
            .unwrap_or(self.order.len());
        let delay = (self.order.len() - position) as u64 * 15;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(text.as_bytes().to_vec())
    }

    fn model_name(&self) -> &str {
        "skewed"
    }
}

struct FailingTts;

#[async_trait]
impl TextToSpeech for FailingTts {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Err(Error::synthesis("provider unavailable"))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn send_media(&self, audio: Vec<u8>) -> Result<()> {
        self.sent.lock().push(audio);
        Ok(())
    }
}

fn delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        batch_pacing_ms: 5,
        ..Default::default()
    }
}

fn segments() -> Vec<String> {
    SentenceSegmenter::new(&delivery_config()).segment(RESPONSE)
}

#[tokio::test]
async fn test_segments_arrive_in_generation_order() {
    let expected = segments();
    assert!(expected.len() > 2);

    let tts = Arc::new(SkewedTts::new(expected.clone()));
    let caches = Arc::new(ResponseCaches::new(&CacheConfig::default()));
    let pipeline = ResponseDeliveryPipeline::new(tts, caches, &delivery_config());
    let sink = RecordingSink::default();

    let report = pipeline
        .deliver(RESPONSE, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.sent, expected.len());
    assert_eq!(report.failed, 0);

    let observed: Vec<String> = sink
        .sent
        .lock()
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).to_string())
        .collect();
    assert_eq!(observed, expected);
}

#[tokio::test]
async fn test_repeated_response_synthesized_once() {
    let expected = segments();
    let tts = Arc::new(SkewedTts::new(expected.clone()));
    let caches = Arc::new(ResponseCaches::new(&CacheConfig::default()));
    let pipeline = ResponseDeliveryPipeline::new(tts.clone(), caches, &delivery_config());
    let sink = RecordingSink::default();

    pipeline
        .deliver(RESPONSE, &sink, &CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = tts.calls.load(Ordering::SeqCst);

    let second = pipeline
        .deliver(RESPONSE, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert!(second.from_cache);
    assert_eq!(tts.calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(calls_after_first, expected.len());

    let sent = sink.sent.lock();
    assert_eq!(sent.len(), expected.len() * 2);
    assert_eq!(sent[..expected.len()], sent[expected.len()..]);
}

#[tokio::test]
async fn test_all_segments_failing_is_synthesis_error() {
    let caches = Arc::new(ResponseCaches::new(&CacheConfig::default()));
    let pipeline = ResponseDeliveryPipeline::new(Arc::new(FailingTts), caches, &delivery_config());
    let sink = RecordingSink::default();

    let err = pipeline
        .deliver(RESPONSE, &sink, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "synthesis");
    assert!(sink.sent.lock().is_empty());
}
