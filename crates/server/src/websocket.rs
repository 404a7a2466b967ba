//! WebSocket Handler
//!
//! One connection carries one call. The reader task decodes provider frames
//! into session events, the orchestrator runs on its own task, and a writer
//! task owns the socket's send half so synthesized audio never blocks the
//! reader.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use call_agent_agent::{CallSessionOrchestrator, SessionEvent};
use call_agent_core::{AudioSink, Error, Result};
use call_agent_pipeline::EarlyFrames;

use crate::protocol::{OutboundMedia, TransportEvent};
use crate::state::AppState;

const EVENT_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 128;

/// Sends synthesized audio back over the media stream
pub struct WsAudioSink {
    outbound: mpsc::Sender<Message>,
    stream_sid: Arc<RwLock<Option<String>>>,
}

impl WsAudioSink {
    pub fn new(outbound: mpsc::Sender<Message>, stream_sid: Arc<RwLock<Option<String>>>) -> Self {
        Self {
            outbound,
            stream_sid,
        }
    }
}

#[async_trait]
impl AudioSink for WsAudioSink {
    async fn send_media(&self, audio: Vec<u8>) -> Result<()> {
        let frame = {
            let guard = self.stream_sid.read();
            let stream_sid = guard
                .as_deref()
                .ok_or_else(|| Error::Transport("media stream not started".to_string()))?;
            OutboundMedia::new(stream_sid, &audio).encode()?
        };

        self.outbound
            .send(Message::Text(frame))
            .await
            .map_err(|_| Error::Transport("media stream closed".to_string()))
    }
}

/// `GET {ws_path}`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection_id = uuid::Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, connection_id))
}

/// `GET {ws_path}/:call_id`
pub async fn ws_handler_with_id(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, call_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, connection_id: String) {
    tracing::info!(connection = %connection_id, "Media stream connected");

    let hangup = state.register_call(&connection_id);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let writer_cancel = hangup.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                message = outbound_rx.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = ws_sender.send(message).await {
                        tracing::debug!(error = %e, "Media stream write failed");
                        break;
                    }
                }
                _ = writer_cancel.cancelled() => break,
            }
        }
        let _ = ws_sender.close().await;
    });

    let stream_sid = Arc::new(RwLock::new(None));
    let sink = Arc::new(WsAudioSink::new(outbound_tx, stream_sid.clone()));
    let orchestrator = CallSessionOrchestrator::new(state.deps.clone(), sink, hangup.clone());
    let mut early_frames = EarlyFrames::new(orchestrator.ingest_handle());

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let session_task = tokio::spawn(orchestrator.run(events_rx));

    read_loop(
        &mut ws_receiver,
        &events_tx,
        &mut early_frames,
        &stream_sid,
        &hangup,
        &connection_id,
    )
    .await;

    hangup.cancel();
    drop(events_tx);

    match session_task.await {
        Ok(Some(session)) => tracing::info!(
            connection = %connection_id,
            call_id = %session.call_id,
            status = %session.status,
            duration_secs = session.duration_secs(),
            "Call finished"
        ),
        Ok(None) => tracing::info!(connection = %connection_id, "Connection closed before start"),
        Err(e) => tracing::error!(connection = %connection_id, error = %e, "Session task failed"),
    }

    let _ = writer.await;
    state.release_call(&connection_id);
}

async fn read_loop(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    events: &mpsc::Sender<SessionEvent>,
    early_frames: &mut EarlyFrames,
    stream_sid: &RwLock<Option<String>>,
    hangup: &CancellationToken,
    connection_id: &str,
) {
    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = hangup.cancelled() => break,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(connection = %connection_id, error = %e, "Media stream read failed");
                break;
            },
        };

        let event = match TransportEvent::decode(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(connection = %connection_id, error = %e, "Ignoring frame");
                continue;
            },
        };

        let forwarded = match event {
            TransportEvent::Connected { .. } => {
                tracing::debug!(connection = %connection_id, "Provider handshake");
                None
            },
            TransportEvent::Start {
                ref start,
                ..
            } => {
                let sid = event.stream_sid().map(str::to_string);
                *stream_sid.write() = sid.clone();
                let call_id = start
                    .call_sid
                    .clone()
                    .unwrap_or_else(|| connection_id.to_string());
                Some(SessionEvent::Start {
                    call_id,
                    stream_id: sid,
                    from: start.from.clone(),
                })
            },
            TransportEvent::Dtmf { .. } => event.digit().map(SessionEvent::Dtmf),
            TransportEvent::Media { ref media } => {
                match media.decode_audio() {
                    Ok(audio) => early_frames.push(audio),
                    Err(e) => tracing::debug!(connection = %connection_id, error = %e, "Bad media frame"),
                }
                None
            },
            TransportEvent::Stop => {
                let _ = events.send(SessionEvent::Stop).await;
                break;
            },
        };

        if let Some(event) = forwarded {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}
