//! End-of-call report notifiers

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use call_agent_core::{CallReport, Error, Notifier, Result};

use crate::PersistenceError;

const TELEGRAM_API: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Posts call reports to a Telegram chat
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: impl Into<String>) -> std::result::Result<Self, PersistenceError> {
        Self::with_base_url(TELEGRAM_API, bot_token, chat_id)
    }

    pub fn with_base_url(
        base_url: &str,
        bot_token: &str,
        chat_id: impl Into<String>,
    ) -> std::result::Result<Self, PersistenceError> {
        if bot_token.trim().is_empty() {
            return Err(PersistenceError::NotConfigured(
                "telegram bot token".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/bot{}/sendMessage",
                base_url.trim_end_matches('/'),
                bot_token
            ),
            chat_id: chat_id.into(),
        })
    }

    async fn send_text(&self, text: &str) -> std::result::Result<(), PersistenceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PersistenceError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// One-line report used when the full rendering is rejected
pub fn short_report(report: &CallReport) -> String {
    format!(
        "Call report for {}: {} - {}",
        report.phone.as_deref().unwrap_or("unknown"),
        report.issue_type.as_deref().unwrap_or("not identified"),
        report.resolution
    )
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_call_report(&self, report: &CallReport) -> Result<()> {
        let full = report.render();
        match self.send_text(&full).await {
            Ok(()) => {
                tracing::info!(call_id = %report.call_id, "Call report sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    call_id = %report.call_id,
                    error = %e,
                    "Full call report rejected, sending short form"
                );
                self.send_text(&short_report(report))
                    .await
                    .map_err(|e| Error::notification(e.to_string()))
            }
        }
    }
}

/// Writes call reports to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_call_report(&self, report: &CallReport) -> Result<()> {
        tracing::info!(
            call_id = %report.call_id,
            status = %report.status,
            resolved = report.resolved(),
            duration_secs = report.duration_secs,
            issue_type = report.issue_type.as_deref().unwrap_or("-"),
            steps = report.steps.len(),
            ticket_id = report.ticket_id.as_deref().unwrap_or("-"),
            "Call report\n{}",
            report.render()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_agent_core::CallStatus;
    use chrono::Utc;

    fn report() -> CallReport {
        CallReport {
            call_id: "CA42".into(),
            phone: Some("9876543210".into()),
            customer_name: Some("Anu".into()),
            customer_info: None,
            status: CallStatus::Resolved,
            started_at: Utc::now(),
            duration_secs: 61,
            issue_type: Some("slow_internet".into()),
            sub_issues: vec![],
            steps: vec![],
            escalation_reasons: vec![],
            ticket_id: None,
            resolution: "resolved after modem restart".into(),
            summary: "slow speeds in the evening".into(),
        }
    }

    #[test]
    fn test_short_report() {
        assert_eq!(
            short_report(&report()),
            "Call report for 9876543210: slow_internet - resolved after modem restart"
        );
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            TelegramNotifier::new("  ", "123"),
            Err(PersistenceError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_url_contains_token() {
        let n = TelegramNotifier::with_base_url("http://localhost:9999/", "abc:123", "42").unwrap();
        assert_eq!(n.url, "http://localhost:9999/botabc:123/sendMessage");
    }

    #[tokio::test]
    async fn test_unreachable_telegram_is_notification_error() {
        let n = TelegramNotifier::with_base_url("http://127.0.0.1:9", "abc", "42").unwrap();
        let err = n.send_call_report(&report()).await.unwrap_err();
        assert_eq!(err.kind(), "notification");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.send_call_report(&report()).await.is_ok());
    }
}
