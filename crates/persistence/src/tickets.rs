//! Escalation ticket sinks
//!
//! - [`RestTicketSink`]: `POST {endpoint}/escalations`, retried with
//!   exponential backoff; the client-generated ticket id doubles as the
//!   idempotency key
//! - [`LocalEscalationLog`]: append-only JSON lines file
//! - [`FallbackEscalationSink`]: primary sink with the local log behind it,
//!   so an escalation is never silently lost

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use call_agent_config::PersistenceConfig;
use call_agent_core::{EscalationSink, Error, Result, TicketRequest};

use crate::PersistenceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct CreatedTicket {
    #[serde(default)]
    id: Option<String>,
}

/// Ticket store reached over HTTP
pub struct RestTicketSink {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl RestTicketSink {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        max_retries: u32,
    ) -> std::result::Result<Self, PersistenceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/escalations", endpoint.trim_end_matches('/')),
            api_key,
            max_retries,
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn post(&self, ticket: &TicketRequest) -> std::result::Result<String, PersistenceError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &ticket.ticket_id)
            .json(ticket);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PersistenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Stores may echo the id or return an empty body
        let created: CreatedTicket = response.json().await.unwrap_or(CreatedTicket { id: None });
        Ok(created.id.unwrap_or_else(|| ticket.ticket_id.clone()))
    }
}

#[async_trait]
impl EscalationSink for RestTicketSink {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String> {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    ticket_id = %ticket.ticket_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Ticket creation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.post(ticket).await {
                Ok(id) => {
                    tracing::info!(
                        ticket_id = %id,
                        priority = %ticket.priority,
                        issue_type = %ticket.issue_type,
                        "Escalation ticket created"
                    );
                    return Ok(id);
                }
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(Error::EscalationSink(e.to_string())),
            }
        }

        Err(Error::EscalationSink(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "max retries exceeded".to_string()),
        ))
    }
}

/// One line of the local escalation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEscalation {
    #[serde(flatten)]
    pub ticket: TicketRequest,
    /// Why the primary store was bypassed
    #[serde(default)]
    pub fallback_reason: Option<String>,
}

/// Append-only local escalation log (JSON lines)
pub struct LocalEscalationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalEscalationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(
        &self,
        ticket: &TicketRequest,
        fallback_reason: Option<String>,
    ) -> std::result::Result<(), PersistenceError> {
        let entry = LoggedEscalation {
            ticket: ticket.clone(),
            fallback_reason,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read back every logged escalation
    pub async fn entries(&self) -> std::result::Result<Vec<LoggedEscalation>, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PersistenceError::from))
            .collect()
    }
}

#[async_trait]
impl EscalationSink for LocalEscalationLog {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String> {
        self.append(ticket, None)
            .await
            .map_err(|e| Error::EscalationSink(e.to_string()))?;
        Ok(ticket.ticket_id.clone())
    }
}

/// Primary sink with durable local fallback
pub struct FallbackEscalationSink {
    primary: Option<Arc<dyn EscalationSink>>,
    fallback: LocalEscalationLog,
}

impl FallbackEscalationSink {
    pub fn new(primary: Option<Arc<dyn EscalationSink>>, fallback: LocalEscalationLog) -> Self {
        Self { primary, fallback }
    }

    pub fn from_config(config: &PersistenceConfig) -> std::result::Result<Self, PersistenceError> {
        let primary: Option<Arc<dyn EscalationSink>> = match &config.ticket_endpoint {
            Some(endpoint) => Some(Arc::new(RestTicketSink::new(
                endpoint,
                config.ticket_api_key.clone(),
                config.ticket_max_retries,
            )?)),
            None => None,
        };
        Ok(Self::new(
            primary,
            LocalEscalationLog::new(&config.fallback_log_path),
        ))
    }

    pub fn fallback_log(&self) -> &LocalEscalationLog {
        &self.fallback
    }
}

#[async_trait]
impl EscalationSink for FallbackEscalationSink {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String> {
        let reason = match &self.primary {
            Some(primary) => match primary.create_ticket(ticket).await {
                Ok(id) => return Ok(id),
                Err(e) => {
                    tracing::error!(
                        ticket_id = %ticket.ticket_id,
                        error = %e,
                        "Primary ticket store failed, writing to local escalation log"
                    );
                    e.to_string()
                }
            },
            None => "no ticket store configured".to_string(),
        };

        self.fallback
            .append(ticket, Some(reason))
            .await
            .map_err(|e| Error::EscalationSink(format!("fallback log write failed: {}", e)))?;

        metrics::counter!("call_agent_escalation_fallback_total").increment(1);
        tracing::warn!(
            ticket_id = %ticket.ticket_id,
            path = %self.fallback.path().display(),
            "Escalation recorded in local log"
        );
        Ok(ticket.ticket_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_agent_core::EscalationPriority;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EscalationSink for FailingSink {
        async fn create_ticket(&self, _ticket: &TicketRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::EscalationSink("store unavailable".into()))
        }
    }

    struct AcceptingSink;

    #[async_trait]
    impl EscalationSink for AcceptingSink {
        async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String> {
            Ok(format!("remote-{}", ticket.ticket_id))
        }
    }

    fn ticket() -> TicketRequest {
        TicketRequest::new("internet_down", "Red light on modem", EscalationPriority::Medium)
            .with_customer(Some("C-1".into()), Some("9876543210".into()))
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalEscalationLog::new(dir.path().join("logs/escalations.log"));
        let primary = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let sink = FallbackEscalationSink::new(Some(primary.clone()), log);

        let ticket = ticket();
        let id = sink.create_ticket(&ticket).await.unwrap();
        assert_eq!(id, ticket.ticket_id);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        let entries = sink.fallback_log().entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ticket, ticket);
        assert!(entries[0]
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("store unavailable"));
    }

    #[tokio::test]
    async fn test_primary_success_skips_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalEscalationLog::new(dir.path().join("escalations.log"));
        let sink = FallbackEscalationSink::new(Some(Arc::new(AcceptingSink)), log);

        let ticket = ticket();
        let id = sink.create_ticket(&ticket).await.unwrap();
        assert_eq!(id, format!("remote-{}", ticket.ticket_id));
        assert!(sink.fallback_log().entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_store_logs_locally() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FallbackEscalationSink::new(None, LocalEscalationLog::new(dir.path().join("e.log")));

        sink.create_ticket(&ticket()).await.unwrap();
        sink.create_ticket(&ticket()).await.unwrap();
        assert_eq!(sink.fallback_log().entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_fallback_is_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the log file should be
        let sink = FallbackEscalationSink::new(None, LocalEscalationLog::new(dir.path()));

        let err = sink.create_ticket(&ticket()).await.unwrap_err();
        assert_eq!(err.kind(), "escalation_sink");
    }

    #[tokio::test]
    async fn test_rest_sink_unreachable_exhausts_retries() {
        let sink = RestTicketSink::new("http://127.0.0.1:9", None, 1)
            .unwrap()
            .with_initial_backoff(Duration::from_millis(1));
        let err = sink.create_ticket(&ticket()).await.unwrap_err();
        assert_eq!(err.kind(), "escalation_sink");
    }

    #[test]
    fn test_rest_sink_url() {
        let sink = RestTicketSink::new("https://tickets.example.com/api/", None, 0).unwrap();
        assert_eq!(sink.url, "https://tickets.example.com/api/escalations");
    }
}
