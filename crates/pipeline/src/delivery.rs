//! Response delivery: text → ordered, progressively sent audio segments
//!
//! The first segment is synthesized and sent on its own so the caller hears
//! audio as early as possible. The remaining segments are synthesized in
//! bounded concurrent batches and sent in their original order, with a short
//! pause between batches.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use call_agent_config::DeliveryConfig;
use call_agent_core::{AudioSink, Error, Result, TextToSpeech};

use crate::cache::{cache_key, ResponseCaches};
use crate::segmenter::SentenceSegmenter;

/// One synthesized chunk of audio, shared between cache and sender
pub type AudioSegment = Arc<Vec<u8>>;

/// Outcome of one delivery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub segments: usize,
    pub sent: usize,
    pub failed: usize,
    pub from_cache: bool,
    pub cancelled: bool,
    pub time_to_first_audio: Option<Duration>,
}

/// Converts response text into audio and streams it to the transport
pub struct ResponseDeliveryPipeline {
    tts: Arc<dyn TextToSpeech>,
    caches: Arc<ResponseCaches>,
    segmenter: SentenceSegmenter,
    batch_size: usize,
    batch_pacing: Duration,
    voice_context: String,
}

impl ResponseDeliveryPipeline {
    pub fn new(
        tts: Arc<dyn TextToSpeech>,
        caches: Arc<ResponseCaches>,
        config: &DeliveryConfig,
    ) -> Self {
        let voice_context = tts.model_name().to_string();
        Self {
            tts,
            caches,
            segmenter: SentenceSegmenter::new(config),
            batch_size: config.batch_size.max(1),
            batch_pacing: Duration::from_millis(config.batch_pacing_ms),
            voice_context,
        }
    }

    /// Synthesize `text` into ordered segments without sending them
    pub async fn synthesize(&self, text: &str) -> Result<Vec<AudioSegment>> {
        let whole_key = self.whole_key(text);
        if let Some(cached) = self.caches.audio.get(&whole_key) {
            return Ok(cached);
        }

        let segments = self.segmenter.segment(text);
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let mut audio = Vec::with_capacity(segments.len());
        let mut failed = 0;

        if let Some(first) = self.synthesize_segment(&segments[0]).await {
            audio.push(first);
        } else {
            failed += 1;
        }

        for batch in segments[1..].chunks(self.batch_size) {
            let results = join_all(batch.iter().map(|s| self.synthesize_segment(s))).await;
            for result in results {
                match result {
                    Some(a) => audio.push(a),
                    None => failed += 1,
                }
            }
        }

        if audio.is_empty() {
            return Err(Error::synthesis(format!(
                "all {} segments failed to synthesize",
                segments.len()
            )));
        }
        if failed == 0 {
            self.caches.audio.insert(whole_key, audio.clone());
        }
        Ok(audio)
    }

    /// Synthesize `text` and send it to `sink` in order
    ///
    /// Stops between sends once `cancel` fires. Returns a transport error if
    /// the sink rejects a write, and a synthesis error if no segment could be
    /// produced.
    pub async fn deliver(
        &self,
        text: &str,
        sink: &dyn AudioSink,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport> {
        let started = Instant::now();
        let mut report = DeliveryReport::default();

        let whole_key = self.whole_key(text);
        if let Some(cached) = self.caches.audio.get(&whole_key) {
            report.segments = cached.len();
            report.from_cache = true;
            for segment in cached {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(report);
                }
                self.send(sink, &segment, &mut report, started).await?;
            }
            return Ok(report);
        }

        let segments = self.segmenter.segment(text);
        report.segments = segments.len();
        if segments.is_empty() {
            return Ok(report);
        }

        let mut produced = Vec::with_capacity(segments.len());

        match self.synthesize_segment(&segments[0]).await {
            Some(audio) => {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(report);
                }
                self.send(sink, &audio, &mut report, started).await?;
                produced.push(audio);
            }
            None => report.failed += 1,
        }

        let mut batches = segments[1..].chunks(self.batch_size).peekable();
        while let Some(batch) = batches.next() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }

            // join_all yields in input order regardless of completion order
            let results = join_all(batch.iter().map(|s| self.synthesize_segment(s))).await;
            for result in results {
                match result {
                    Some(audio) => {
                        if cancel.is_cancelled() {
                            report.cancelled = true;
                            return Ok(report);
                        }
                        self.send(sink, &audio, &mut report, started).await?;
                        produced.push(audio);
                    }
                    None => report.failed += 1,
                }
            }

            if batches.peek().is_some() && !self.batch_pacing.is_zero() {
                tokio::time::sleep(self.batch_pacing).await;
            }
        }

        if report.sent == 0 {
            return Err(Error::synthesis(format!(
                "all {} segments failed to synthesize",
                report.segments
            )));
        }
        if report.failed == 0 {
            self.caches.audio.insert(whole_key, produced);
        }

        tracing::debug!(
            segments = report.segments,
            failed = report.failed,
            total_ms = started.elapsed().as_millis() as u64,
            "Response delivered"
        );
        Ok(report)
    }

    fn whole_key(&self, text: &str) -> String {
        cache_key(text, &format!("{}|response", self.voice_context))
    }

    async fn send(
        &self,
        sink: &dyn AudioSink,
        audio: &AudioSegment,
        report: &mut DeliveryReport,
        started: Instant,
    ) -> Result<()> {
        sink.send_media(audio.to_vec()).await?;
        if report.time_to_first_audio.is_none() {
            let elapsed = started.elapsed();
            report.time_to_first_audio = Some(elapsed);
            metrics::histogram!("call_agent_time_to_first_audio_seconds")
                .record(elapsed.as_secs_f64());
        }
        report.sent += 1;
        Ok(())
    }

    /// Per-segment read-through on the audio cache; failures are logged and
    /// reported as `None` so the rest of the response still plays
    async fn synthesize_segment(&self, text: &str) -> Option<AudioSegment> {
        let key = cache_key(text, &self.voice_context);
        if let Some(mut cached) = self.caches.audio.get(&key) {
            if let Some(audio) = cached.pop() {
                return Some(audio);
            }
        }

        match self.tts.synthesize(text).await {
            Ok(bytes) => {
                let audio: AudioSegment = Arc::new(bytes);
                self.caches.audio.insert(key, vec![audio.clone()]);
                Some(audio)
            }
            Err(e) => {
                tracing::warn!(error = %e, segment = %text, "Segment synthesis failed");
                None
            }
        }
    }
}
