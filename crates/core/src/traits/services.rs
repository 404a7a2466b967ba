//! Storage, retrieval and notification collaborators

use crate::{CallReport, CustomerProfile, Result, TicketRequest};
use async_trait::async_trait;

/// Knowledge ("RAG") lookup
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync + 'static {
    /// Return a context snippet for the utterance; may be empty
    async fn query(&self, text: &str, customer: Option<&CustomerProfile>) -> Result<String>;
}

/// Identity lookup by registered phone number
#[async_trait]
pub trait CustomerDirectory: Send + Sync + 'static {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<CustomerProfile>>;
}

/// Human-handoff ticket store
///
/// Implementations must tolerate retries of the same `ticket_id`.
#[async_trait]
pub trait EscalationSink: Send + Sync + 'static {
    /// Create the ticket and return its id
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<String>;
}

/// Outbound call-report notification
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_call_report(&self, report: &CallReport) -> Result<()>;
}

/// Outbound media path back to the caller
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn send_media(&self, audio: Vec<u8>) -> Result<()>;
}
