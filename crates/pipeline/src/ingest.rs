//! Audio ingest bridge
//!
//! Inbound frames are queued to a per-call ingest task that owns the
//! transcription stream. Recognition results are filtered there and sent as
//! [`TranscriptEvent`]s on the session's channel; nothing in this module
//! touches session state directly.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use call_agent_core::{SpeechToText, TranscriptEvent};

use crate::filter::{TranscriptFilter, UtteranceGate};
use crate::PipelineError;

const DEFAULT_FRAME_BUFFER: usize = 256;
const RESULT_BUFFER: usize = 32;
/// About a second of 20 ms telephony frames
const EARLY_FRAME_LIMIT: usize = 50;

type FrameSender = Arc<RwLock<Option<mpsc::Sender<Vec<u8>>>>>;

/// Cloneable handle for pushing media frames from the transport reader
#[derive(Clone)]
pub struct IngestHandle {
    frames: FrameSender,
}

impl IngestHandle {
    /// Queue one raw frame; returns false when no stream is running or the
    /// queue is full (the frame is dropped)
    pub fn push_audio(&self, frame: Vec<u8>) -> bool {
        let guard = self.frames.read();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Audio ingest queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether a transcription stream is currently accepting frames
    pub fn is_open(&self) -> bool {
        self.frames
            .read()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

/// Holds media that arrives before the call's stream is open
///
/// The transport reads frames while the session is still handling `start`,
/// so the first frames can beat the stream. Held frames are replayed in
/// arrival order once the stream opens; past the limit the oldest go first.
pub struct EarlyFrames {
    handle: IngestHandle,
    pending: VecDeque<Vec<u8>>,
    limit: usize,
}

impl EarlyFrames {
    pub fn new(handle: IngestHandle) -> Self {
        Self::with_limit(handle, EARLY_FRAME_LIMIT)
    }

    pub fn with_limit(handle: IngestHandle, limit: usize) -> Self {
        Self {
            handle,
            pending: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, frame: Vec<u8>) {
        if !self.handle.is_open() {
            if self.pending.len() == self.limit {
                self.pending.pop_front();
            }
            self.pending.push_back(frame);
            return;
        }

        if !self.pending.is_empty() {
            tracing::debug!(frames = self.pending.len(), "Replaying early audio");
            while let Some(held) = self.pending.pop_front() {
                self.handle.push_audio(held);
            }
        }
        self.handle.push_audio(frame);
    }

    pub fn held(&self) -> usize {
        self.pending.len()
    }
}

/// Couples the streaming transcription collaborator to one call
pub struct AudioIngestBridge {
    stt: Arc<dyn SpeechToText>,
    filter: TranscriptFilter,
    frames: FrameSender,
    frame_buffer: usize,
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl AudioIngestBridge {
    pub fn new(stt: Arc<dyn SpeechToText>, filter: TranscriptFilter) -> Self {
        Self {
            stt,
            filter,
            frames: Arc::new(RwLock::new(None)),
            frame_buffer: DEFAULT_FRAME_BUFFER,
            task: None,
            cancel: None,
        }
    }

    pub fn with_frame_buffer(mut self, frames: usize) -> Self {
        self.frame_buffer = frames.max(1);
        self
    }

    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            frames: self.frames.clone(),
        }
    }

    /// Start a transcription stream feeding `transcripts`
    ///
    /// Any previous stream is stopped first. The ingest task ends when
    /// `cancel` fires, when [`stop`](Self::stop) is called, or when the
    /// session stops reading transcripts.
    pub fn start(
        &mut self,
        transcripts: mpsc::Sender<TranscriptEvent>,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Ingest(format!("no async runtime: {}", e)))?;

        let (frame_tx, frame_rx) = mpsc::channel(self.frame_buffer);
        *self.frames.write() = Some(frame_tx);

        let task = runtime.spawn(run_ingest(
            self.stt.clone(),
            UtteranceGate::new(self.filter.clone()),
            frame_rx,
            transcripts,
            cancel.clone(),
        ));

        self.task = Some(task);
        self.cancel = Some(cancel);
        tracing::debug!(model = self.stt.model_name(), "Audio ingest started");
        Ok(())
    }

    /// Stop ingestion and release the transcription stream
    pub fn stop(&mut self) {
        self.frames.write().take();
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if self.task.take().is_some() {
            tracing::debug!("Audio ingest stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for AudioIngestBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ingest(
    stt: Arc<dyn SpeechToText>,
    mut gate: UtteranceGate,
    mut frames: mpsc::Receiver<Vec<u8>>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    cancel: CancellationToken,
) {
    let (results_tx, mut results) = mpsc::channel(RESULT_BUFFER);

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = stt.start_stream(results_tx) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open transcription stream");
                return;
            }
        },
    };

    let mut frames_open = true;
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            frame = frames.recv(), if frames_open => match frame {
                Some(frame) => {
                    if let Err(e) = stream.push_audio(frame).await {
                        tracing::warn!(error = %e, "Transcription push failed");
                    }
                }
                None => {
                    frames_open = false;
                    if let Err(e) = stream.stop().await {
                        tracing::debug!(error = %e, "Transcription stop failed");
                    }
                }
            },

            result = results.recv() => match result {
                Some(Ok(event)) => {
                    if let Some(event) = gate.admit(event) {
                        if transcripts.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Transcription collaborator error");
                }
                None => break,
            },
        }
    }

    if frames_open {
        if let Err(e) = stream.stop().await {
            tracing::debug!(error = %e, "Transcription stop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use call_agent_core::{Result, TranscriptionStream};

    /// Emits a final transcript for every frame, using the frame as UTF-8 text
    struct EchoStt;

    struct EchoStream {
        results: mpsc::Sender<Result<TranscriptEvent>>,
    }

    #[async_trait]
    impl TranscriptionStream for EchoStream {
        async fn push_audio(&mut self, frame: Vec<u8>) -> Result<()> {
            let text = String::from_utf8_lossy(&frame).to_string();
            let _ = self
                .results
                .send(Ok(TranscriptEvent::final_result(text)))
                .await;
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SpeechToText for EchoStt {
        async fn start_stream(
            &self,
            results: mpsc::Sender<Result<TranscriptEvent>>,
        ) -> Result<Box<dyn TranscriptionStream>> {
            Ok(Box::new(EchoStream { results }))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_frames_become_filtered_transcripts_in_order() {
        let mut bridge = AudioIngestBridge::new(Arc::new(EchoStt), TranscriptFilter::default());
        let handle = bridge.handle();
        let (tx, mut rx) = mpsc::channel(8);
        bridge.start(tx, CancellationToken::new()).unwrap();

        assert!(handle.push_audio(b"my internet is down".to_vec()));
        assert!(handle.push_audio(b".".to_vec()));
        assert!(handle.push_audio(b"the light is red".to_vec()));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.text, "my internet is down");
        assert_eq!(second.text, "the light is red");
        assert!(bridge.is_running());
    }

    #[tokio::test]
    async fn test_push_without_stream_is_rejected() {
        let bridge = AudioIngestBridge::new(Arc::new(EchoStt), TranscriptFilter::default());
        assert!(!bridge.handle().push_audio(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_cancel_stops_ingest() {
        let mut bridge = AudioIngestBridge::new(Arc::new(EchoStt), TranscriptFilter::default());
        let handle = bridge.handle();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        bridge.start(tx, cancel.clone()).unwrap();

        cancel.cancel();
        bridge.stop();

        assert!(!handle.push_audio(b"hello there".to_vec()));
        assert!(rx.recv().await.is_none());
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_early_frames_replayed_once_stream_opens() {
        let mut bridge = AudioIngestBridge::new(Arc::new(EchoStt), TranscriptFilter::default());
        let mut early = EarlyFrames::new(bridge.handle());

        early.push(b"my router".to_vec());
        early.push(b"is blinking".to_vec());
        assert_eq!(early.held(), 2);
        assert!(!bridge.handle().is_open());

        let (tx, mut rx) = mpsc::channel(8);
        bridge.start(tx, CancellationToken::new()).unwrap();
        early.push(b"since today".to_vec());
        assert_eq!(early.held(), 0);

        for expected in ["my router", "is blinking", "since today"] {
            assert_eq!(rx.recv().await.unwrap().text, expected);
        }
    }

    #[tokio::test]
    async fn test_early_frames_keep_newest_past_limit() {
        let mut bridge = AudioIngestBridge::new(Arc::new(EchoStt), TranscriptFilter::default());
        let mut early = EarlyFrames::with_limit(bridge.handle(), 2);

        early.push(b"first frame".to_vec());
        early.push(b"second frame".to_vec());
        early.push(b"third frame".to_vec());
        assert_eq!(early.held(), 2);

        let (tx, mut rx) = mpsc::channel(8);
        bridge.start(tx, CancellationToken::new()).unwrap();
        early.push(b"fourth frame".to_vec());

        for expected in ["second frame", "third frame", "fourth frame"] {
            assert_eq!(rx.recv().await.unwrap().text, expected);
        }
    }
}
