//! Persistence layer for the call agent
//!
//! Provides:
//! - Customer lookup by registered phone number (JSON directory)
//! - Escalation tickets (REST store with a local JSON-lines fallback)
//! - End-of-call report notification (Telegram or log)

pub mod customers;
pub mod error;
pub mod notifier;
pub mod tickets;

pub use customers::{normalize_phone, JsonCustomerDirectory};
pub use error::PersistenceError;
pub use notifier::{short_report, LogNotifier, TelegramNotifier};
pub use tickets::{FallbackEscalationSink, LocalEscalationLog, LoggedEscalation, RestTicketSink};

use std::sync::Arc;

use call_agent_config::{NotifierKind, PersistenceConfig};
use call_agent_core::{CustomerDirectory, EscalationSink, Notifier};

/// Initialize the persistence layer from configuration
///
/// A Telegram notifier without credentials falls back to the log notifier.
pub fn init(config: &PersistenceConfig) -> Result<PersistenceLayer, PersistenceError> {
    let customers = JsonCustomerDirectory::load_or_empty(&config.customers_file)?;
    let tickets = FallbackEscalationSink::from_config(config)?;

    let notifier: Arc<dyn Notifier> = match (
        config.notifier,
        &config.telegram_bot_token,
        &config.telegram_chat_id,
    ) {
        (NotifierKind::Telegram, Some(token), Some(chat_id)) => {
            Arc::new(TelegramNotifier::new(token, chat_id.clone())?)
        }
        (NotifierKind::Telegram, _, _) => {
            tracing::warn!("Telegram notifier selected without bot token or chat id, logging reports");
            Arc::new(LogNotifier)
        }
        (NotifierKind::Log, _, _) => Arc::new(LogNotifier),
    };

    tracing::info!(
        customers = customers.len(),
        ticket_endpoint = config.ticket_endpoint.as_deref().unwrap_or("-"),
        fallback_log = %config.fallback_log_path,
        "Persistence layer ready"
    );

    Ok(PersistenceLayer {
        customers: Arc::new(customers),
        tickets: Arc::new(tickets),
        notifier,
    })
}

/// Combined persistence layer with all services
#[derive(Clone)]
pub struct PersistenceLayer {
    pub customers: Arc<dyn CustomerDirectory>,
    /// Never loses a ticket: failures of the primary store land in the local log
    pub tickets: Arc<dyn EscalationSink>,
    pub notifier: Arc<dyn Notifier>,
}
