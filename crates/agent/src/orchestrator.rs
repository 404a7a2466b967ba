//! Call Session Orchestrator
//!
//! One orchestrator owns one call. Transport events and transcript events
//! are consumed by a single control loop, so every session-state mutation
//! happens in arrival order on one task.
//!
//! ```text
//!  transport ──SessionEvent──▶ ┌──────────────┐ ──text──▶ delivery ──▶ AudioSink
//!                              │ control loop │
//!  ingest task ──Transcript──▶ └──────────────┘ ──▶ tickets / notifier
//! ```
//!
//! States: `Connecting → CollectingIdentity → Diagnosing → {Resolved,
//! Escalated, Disconnected}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use call_agent_config::{FlowCatalog, Settings};
use call_agent_core::{
    AudioSink, CallReport, CallStatus, ConversationEntry, CustomerDirectory, CustomerProfile,
    Error, EscalationPriority, EscalationSink, KnowledgeRetriever, LanguageModel, Notifier,
    SessionState, SpeechToText, TextToSpeech, TicketRequest, TranscriptEvent,
    TroubleshootingStepRecord,
};
use call_agent_pipeline::{AudioIngestBridge, ResponseCaches, ResponseDeliveryPipeline, TranscriptFilter};

use crate::classifier::IssueClassifier;
use crate::conversation::{fallback_summary, ConversationHandle, ModelContext};
use crate::escalation::EscalationReason;
use crate::identity::{validate_identity, IdentityCollector, IdentityInput};
use crate::prompts;
use crate::troubleshooting::{StepView, Transition, TroubleshootingEngine};

const TRANSCRIPT_BUFFER: usize = 32;

/// Inbound event for one call, decoded by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start {
        call_id: String,
        stream_id: Option<String>,
        from: Option<String>,
    },
    Dtmf(char),
    Media(Vec<u8>),
    Stop,
}

/// Record of one phone call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub session_id: String,
    pub call_id: String,
    pub stream_id: Option<String>,
    /// Caller line from the transport
    pub from: Option<String>,
    /// Registered number entered on the keypad
    pub phone: Option<String>,
    pub customer: Option<CustomerProfile>,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub history: Vec<ConversationEntry>,
    pub steps: Vec<TroubleshootingStepRecord>,
    pub escalation_reasons: Vec<String>,
    pub issue_type: Option<String>,
    pub sub_issues: Vec<String>,
    pub ticket_id: Option<String>,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, stream_id: Option<String>, from: Option<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            stream_id,
            from,
            phone: None,
            customer: None,
            status: CallStatus::Active,
            started_at: Utc::now(),
            history: Vec::new(),
            steps: Vec::new(),
            escalation_reasons: Vec::new(),
            issue_type: None,
            sub_issues: Vec::new(),
            ticket_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CallStatus::Active
    }

    pub fn duration_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Collaborators and shared services handed to every call
#[derive(Clone)]
pub struct SessionDependencies {
    pub settings: Arc<Settings>,
    pub catalog: Arc<FlowCatalog>,
    pub caches: Arc<ResponseCaches>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    pub customers: Arc<dyn CustomerDirectory>,
    pub tickets: Arc<dyn EscalationSink>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct CallSessionOrchestrator {
    deps: SessionDependencies,
    sink: Arc<dyn AudioSink>,
    hangup: CancellationToken,
    call_token: CancellationToken,
    state: SessionState,
    session: Option<CallSession>,
    identity: IdentityCollector,
    classifier: IssueClassifier,
    engine: TroubleshootingEngine,
    conversation: ConversationHandle,
    delivery: ResponseDeliveryPipeline,
    filter: TranscriptFilter,
    ingest: AudioIngestBridge,
    transcripts_tx: mpsc::Sender<TranscriptEvent>,
    transcripts_rx: Option<mpsc::Receiver<TranscriptEvent>>,
    summary_flushed: bool,
}

impl CallSessionOrchestrator {
    /// `hangup` is cancelled by the transport when the caller hangs up or
    /// the connection drops
    pub fn new(deps: SessionDependencies, sink: Arc<dyn AudioSink>, hangup: CancellationToken) -> Self {
        let settings = deps.settings.clone();
        let filter = TranscriptFilter::new(&settings.transcript);
        let (transcripts_tx, transcripts_rx) = mpsc::channel(TRANSCRIPT_BUFFER);

        Self {
            identity: IdentityCollector::new(&settings.identity),
            classifier: IssueClassifier::new(),
            engine: TroubleshootingEngine::new(deps.catalog.clone(), settings.escalation.clone()),
            conversation: Self::conversation_for(&deps),
            delivery: ResponseDeliveryPipeline::new(
                deps.tts.clone(),
                deps.caches.clone(),
                &settings.delivery,
            ),
            ingest: AudioIngestBridge::new(deps.stt.clone(), filter.clone()),
            filter,
            call_token: hangup.child_token(),
            hangup,
            sink,
            deps,
            state: SessionState::Connecting,
            session: None,
            transcripts_tx,
            transcripts_rx: Some(transcripts_rx),
            summary_flushed: false,
        }
    }

    fn conversation_for(deps: &SessionDependencies) -> ConversationHandle {
        ConversationHandle::new(
            deps.llm.clone(),
            deps.knowledge.clone(),
            deps.caches.clone(),
            deps.settings.dialogue.clone(),
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn engine(&self) -> &TroubleshootingEngine {
        &self.engine
    }

    /// Handle for the transport to push inbound audio without going
    /// through the control loop
    pub fn ingest_handle(&self) -> call_agent_pipeline::IngestHandle {
        self.ingest.handle()
    }

    /// Drive the call until `stop`, hang-up or the transport goes away
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> Option<CallSession> {
        let Some(mut transcripts) = self.transcripts_rx.take() else {
            tracing::error!("Session control loop started twice");
            return self.session;
        };

        loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    match event {
                        Some(SessionEvent::Stop) => {
                            self.on_stop().await;
                            break;
                        }
                        Some(event) => self.handle_event(event).await,
                        None => {
                            tracing::info!("Transport closed, ending session");
                            self.on_stop().await;
                            break;
                        }
                    }
                }

                Some(transcript) = transcripts.recv() => {
                    self.on_transcript(transcript).await;
                }

                _ = self.hangup.cancelled() => {
                    self.on_stop().await;
                    break;
                }
            }
        }

        self.session
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start {
                call_id,
                stream_id,
                from,
            } => self.on_start(call_id, stream_id, from).await,
            SessionEvent::Dtmf(digit) => self.on_dtmf(digit).await,
            SessionEvent::Media(frame) => {
                self.ingest.handle().push_audio(frame);
            }
            SessionEvent::Stop => self.on_stop().await,
        }
    }

    /// Begin a new call, replacing any previous one on this connection
    pub async fn on_start(&mut self, call_id: String, stream_id: Option<String>, from: Option<String>) {
        if self.session.is_some() {
            tracing::warn!(call_id = %call_id, "Start received on a live session, resetting");
            self.on_stop().await;
            self.call_token = self.hangup.child_token();
        }

        let settings = self.deps.settings.clone();
        self.identity = IdentityCollector::new(&settings.identity);
        self.engine = TroubleshootingEngine::new(self.deps.catalog.clone(), settings.escalation.clone());
        self.conversation = Self::conversation_for(&self.deps);
        self.summary_flushed = false;

        let session = CallSession::new(call_id, stream_id, from);
        tracing::info!(
            session_id = %session.session_id,
            call_id = %session.call_id,
            "Call started"
        );
        self.session = Some(session);
        self.state = SessionState::CollectingIdentity;
        metrics::counter!("call_agent_calls_started_total").increment(1);

        if let Err(e) = self
            .ingest
            .start(self.transcripts_tx.clone(), self.call_token.child_token())
        {
            let e: Error = e.into();
            tracing::error!(error = %e, "Audio ingest failed to start; keypad input only");
        }

        self.identity.start();
        self.speak(&prompts::welcome(settings.identity.id_length)).await;
    }

    /// Keypad input
    pub async fn on_dtmf(&mut self, digit: char) {
        match self.state {
            SessionState::CollectingIdentity => {
                let id_length = self.deps.settings.identity.id_length;
                match self.identity.push_digit(digit) {
                    IdentityInput::Complete(digits) => self.on_identity(&digits).await,
                    IdentityInput::Invalid(reason) => {
                        tracing::info!(%reason, "Identity input rejected");
                        self.identity.start();
                        self.speak(&prompts::wrong_length(id_length)).await;
                    }
                    IdentityInput::Cleared => {
                        self.speak(&prompts::number_cleared(id_length)).await;
                    }
                    IdentityInput::Pending { .. } | IdentityInput::Ignored => {}
                }
            }
            SessionState::Diagnosing
                if digit == self.deps.settings.identity.human_request_digit =>
            {
                tracing::info!("Caller requested a human agent");
                let transition = self.engine.request_human();
                self.apply_transition(None, transition).await;
            }
            state => {
                tracing::debug!(%digit, state = %state, "Ignoring keypad input");
            }
        }
    }

    /// Validate the keyed identifier and look the caller up
    pub async fn on_identity(&mut self, digits: &str) {
        if self.state != SessionState::CollectingIdentity {
            return;
        }
        let id_length = self.deps.settings.identity.id_length;

        let phone = match validate_identity(digits, id_length) {
            Ok(phone) => phone,
            Err(e) => {
                tracing::info!(error = %e, "Malformed identifier");
                self.identity.start();
                self.speak(&prompts::wrong_length(id_length)).await;
                return;
            }
        };

        let greeting = match self.deps.customers.find_by_phone(&phone).await {
            Ok(Some(customer)) => {
                tracing::info!(customer = %customer.name, "Customer identified");
                self.engine.update_customer_profile(&customer);
                let greeting = prompts::greet_customer(customer.first_name());
                if let Some(session) = self.session.as_mut() {
                    session.customer = Some(customer);
                }
                greeting
            }
            Ok(None) => {
                tracing::info!(phone = %phone, "No customer for identifier");
                self.identity.start();
                self.speak(prompts::UNKNOWN_CUSTOMER).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Customer lookup failed, continuing with default profile");
                prompts::GREET_UNVERIFIED.to_string()
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.phone = Some(phone);
        }
        self.identity.reset();
        self.state = SessionState::Diagnosing;
        self.speak(&greeting).await;
    }

    /// A transcript forwarded by the ingest task
    pub async fn on_transcript(&mut self, event: TranscriptEvent) {
        if self.state != SessionState::Diagnosing {
            tracing::debug!(state = %self.state, "Transcript outside diagnosis ignored");
            return;
        }
        if !self.session.as_ref().is_some_and(CallSession::is_active) {
            return;
        }
        if !self.filter.accept(&event) {
            tracing::debug!(
                text = %event.text,
                is_final = event.is_final,
                stability = event.stability,
                "Transcript below acceptance threshold discarded"
            );
            return;
        }
        let text = event.text.trim().to_string();

        let started = Instant::now();
        tracing::info!(%text, is_final = event.is_final, "Caller said");

        if self.engine.issue_type().is_none() {
            let history = self
                .session
                .as_ref()
                .map(|s| s.history.clone())
                .unwrap_or_default();
            let classification = self.classifier.classify(&text, &history);
            tracing::info!(
                issue_type = %classification.issue_type,
                confidence = classification.confidence,
                sub_issues = ?classification.sub_issues,
                "Issue classified"
            );

            match self.engine.start(&classification) {
                Some(first) => {
                    if let Some(session) = self.session.as_mut() {
                        session.issue_type = self.engine.issue_type().map(str::to_string);
                        session.sub_issues = self.engine.sub_issues().to_vec();
                    }
                    let reply = self.phrase_step(&text, &first).await;
                    self.commit_reply(text, reply, started).await;
                }
                None => {
                    tracing::warn!("No troubleshooting flow available");
                    self.commit_reply(text, prompts::CLARIFY_ISSUE.to_string(), started)
                        .await;
                }
            }
            return;
        }

        let transition = self.engine.process_response(&text);
        if let Some(session) = self.session.as_mut() {
            session.steps = self.engine.history().to_vec();
        }
        self.apply_transition(Some((text, started)), transition).await;
    }

    async fn apply_transition(&mut self, utterance: Option<(String, Instant)>, transition: Transition) {
        let reply = match transition {
            Transition::Continue(next) => {
                let user_text = utterance.as_ref().map(|(t, _)| t.as_str()).unwrap_or_default();
                self.phrase_step(user_text, &next).await
            }
            Transition::Resolved { step_id } => {
                tracing::info!(step_id = %step_id, "Call resolved");
                self.state = SessionState::Resolved;
                if let Some(session) = self.session.as_mut() {
                    session.status = CallStatus::Resolved;
                }
                prompts::RESOLVED.to_string()
            }
            Transition::Escalate { reasons, priority } => self.escalate(&reasons, priority).await,
            Transition::NotStarted => prompts::CLARIFY_ISSUE.to_string(),
        };

        match utterance {
            Some((text, started)) => self.commit_reply(text, reply, started).await,
            None => {
                if self.call_token.is_cancelled() {
                    return;
                }
                self.speak(&reply).await;
            }
        }
    }

    /// Phrase a step for the caller, through the model when enabled
    async fn phrase_step(&self, user_text: &str, step: &StepView) -> String {
        if !self.conversation.uses_language_model() {
            return step.prompt.clone();
        }

        let session = self.session.as_ref();
        let customer = session.and_then(|s| s.customer.as_ref());
        let knowledge = self.conversation.knowledge_context(user_text, customer).await;

        let context = self.conversation.build_context(&ModelContext {
            customer,
            history: session.map(|s| s.history.as_slice()).unwrap_or_default(),
            steps: session.map(|s| s.steps.as_slice()).unwrap_or_default(),
            issue_type: self.engine.issue_type(),
            sub_issues: self.engine.sub_issues(),
            step_guidance: Some(&step.prompt),
            knowledge: knowledge.as_deref(),
        });

        match self.conversation.complete(user_text, &context).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, step_id = %step.step_id, "Generation failed, reading step prompt");
                format!("{} {}", prompts::APOLOGY, step.prompt)
            }
        }
    }

    async fn escalate(&mut self, reasons: &[EscalationReason], priority: EscalationPriority) -> String {
        self.state = SessionState::Escalated;
        let names: Vec<String> = reasons.iter().map(|r| r.as_str().to_string()).collect();

        let (history, steps, customer, phone) = match self.session.as_mut() {
            Some(session) => {
                session.status = CallStatus::Escalated;
                session.escalation_reasons = names.clone();
                (
                    session.history.clone(),
                    session.steps.clone(),
                    session.customer.clone(),
                    session.phone.clone().or_else(|| session.from.clone()),
                )
            }
            None => return prompts::ESCALATED_NO_TICKET.to_string(),
        };

        metrics::counter!("call_agent_escalations_total", "priority" => priority.as_str())
            .increment(1);

        let summary = fallback_summary(&history, &steps, self.engine.issue_type());
        let description =
            self.engine
                .ticket_description(phone.as_deref(), customer.as_ref(), &summary);
        let ticket = TicketRequest::new(
            self.engine.issue_type().unwrap_or("unknown"),
            description,
            priority,
        )
        .with_customer(customer.and_then(|c| c.customer_id), phone);

        let reference = match self.deps.tickets.create_ticket(&ticket).await {
            Ok(id) => {
                tracing::info!(ticket_id = %id, reasons = ?names, priority = %priority, "Escalation ticket created");
                id
            }
            Err(e) => {
                tracing::error!(error = %e, ticket_id = %ticket.ticket_id, "Escalation ticket could not be recorded");
                ticket.ticket_id.clone()
            }
        };

        let short: String = reference.chars().take(8).collect();
        if let Some(session) = self.session.as_mut() {
            session.ticket_id = Some(reference);
        }
        prompts::escalated(&short)
    }

    /// Record the exchange and speak the reply, unless the call ended while
    /// the reply was being produced
    async fn commit_reply(&mut self, user_text: String, reply: String, started: Instant) {
        if self.call_token.is_cancelled() {
            tracing::info!("Call ended during generation, discarding reply");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status == CallStatus::Disconnected {
            return;
        }

        let mut entry = ConversationEntry::new(user_text);
        entry.bot = reply.clone();
        session.history.push(entry);

        metrics::histogram!("call_agent_response_latency_seconds")
            .record(started.elapsed().as_secs_f64());
        self.speak(&reply).await;
    }

    async fn speak(&self, text: &str) {
        match self
            .delivery
            .deliver(text, self.sink.as_ref(), &self.call_token)
            .await
        {
            Ok(report) => {
                tracing::debug!(
                    segments = report.segments,
                    sent = report.sent,
                    from_cache = report.from_cache,
                    cancelled = report.cancelled,
                    "Response delivered"
                );
            }
            Err(Error::Transport(msg)) => {
                tracing::warn!(error = %msg, "Transport rejected audio");
            }
            Err(e) => {
                tracing::error!(error = %e, "Response delivery failed");
            }
        }
    }

    /// End the call: mark it disconnected unless already terminal, stop
    /// ingestion and flush the report once
    pub async fn on_stop(&mut self) {
        self.call_token.cancel();
        self.ingest.stop();

        let Some(session) = self.session.as_mut() else {
            self.state = SessionState::Disconnected;
            return;
        };
        if session.status == CallStatus::Active {
            session.status = CallStatus::Disconnected;
        }
        self.state = SessionState::Disconnected;

        if self.summary_flushed {
            return;
        }
        self.summary_flushed = true;

        let status = session.status;
        let history = session.history.clone();
        let steps = session.steps.clone();
        let issue_type = session.issue_type.clone();

        let summary = self
            .conversation
            .summarize(&history, &steps, issue_type.as_deref())
            .await;
        let report = self.build_report(summary);

        tracing::info!(
            status = %status,
            steps = steps.len(),
            duration_secs = report.as_ref().map(|r| r.duration_secs).unwrap_or_default(),
            "Call ended"
        );
        metrics::counter!("call_agent_calls_ended_total", "status" => status.as_str()).increment(1);

        if let Some(report) = report {
            if let Err(e) = self.deps.notifier.send_call_report(&report).await {
                tracing::warn!(error = %e, "Call report not delivered");
            }
        }
    }

    fn build_report(&self, summary: String) -> Option<CallReport> {
        let session = self.session.as_ref()?;
        let resolution = match session.status {
            CallStatus::Resolved => format!(
                "resolved at step {}",
                session
                    .steps
                    .last()
                    .map(|s| s.step_id.as_str())
                    .unwrap_or("unknown")
            ),
            CallStatus::Escalated => format!("escalated: {}", session.escalation_reasons.join(", ")),
            _ => "caller disconnected".to_string(),
        };

        Some(CallReport {
            call_id: session.call_id.clone(),
            phone: session.phone.clone().or_else(|| session.from.clone()),
            customer_name: session.customer.as_ref().map(|c| c.name.clone()),
            customer_info: session.customer.as_ref().map(CustomerProfile::info_block),
            status: session.status,
            started_at: session.started_at,
            duration_secs: session.duration_secs(),
            issue_type: session.issue_type.clone(),
            sub_issues: session.sub_issues.clone(),
            steps: session.steps.clone(),
            escalation_reasons: session.escalation_reasons.clone(),
            ticket_id: session.ticket_id.clone(),
            resolution,
            summary,
        })
    }
}
