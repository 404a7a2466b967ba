//! Escalation ticket and end-of-call report payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{CallStatus, TroubleshootingStepRecord};

/// Ticket priority derived from the escalation reasons that fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPriority {
    High,
    Medium,
    #[default]
    Normal,
}

impl EscalationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Normal => "normal",
        }
    }
}

impl std::fmt::Display for EscalationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to open a human-handoff ticket
///
/// `ticket_id` is generated by the caller so that retries against the sink
/// are idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRequest {
    pub ticket_id: String,
    pub issue_type: String,
    pub description: String,
    pub priority: EscalationPriority,
    pub customer_id: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TicketRequest {
    pub fn new(
        issue_type: impl Into<String>,
        description: impl Into<String>,
        priority: EscalationPriority,
    ) -> Self {
        Self {
            ticket_id: Uuid::new_v4().to_string(),
            issue_type: issue_type.into(),
            description: description.into(),
            priority,
            customer_id: None,
            phone: None,
            status: "open".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_customer(mut self, customer_id: Option<String>, phone: Option<String>) -> Self {
        self.customer_id = customer_id;
        self.phone = phone;
        self
    }
}

/// Summary sent to the notifier when a call ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReport {
    pub call_id: String,
    pub phone: Option<String>,
    pub customer_name: Option<String>,
    pub customer_info: Option<String>,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub issue_type: Option<String>,
    pub sub_issues: Vec<String>,
    pub steps: Vec<TroubleshootingStepRecord>,
    pub escalation_reasons: Vec<String>,
    pub ticket_id: Option<String>,
    pub resolution: String,
    pub summary: String,
}

impl CallReport {
    pub fn resolved(&self) -> bool {
        self.status == CallStatus::Resolved
    }

    /// Plain-text rendering used by chat notifiers and log output
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Call report {}\n", self.call_id));
        out.push_str(&format!(
            "Phone: {}\n",
            self.phone.as_deref().unwrap_or("unknown")
        ));
        out.push_str(&format!("Status: {}\n", self.status));
        out.push_str(&format!(
            "Duration: {}m {}s\n",
            self.duration_secs / 60,
            self.duration_secs % 60
        ));
        out.push_str(&format!(
            "Resolved: {}\n",
            if self.resolved() { "yes" } else { "no" }
        ));
        if let Some(info) = &self.customer_info {
            out.push_str(&format!("Customer:\n{}\n", info));
        }
        out.push_str(&format!(
            "Issue: {}\n",
            self.issue_type.as_deref().unwrap_or("not identified")
        ));
        if !self.sub_issues.is_empty() {
            out.push_str(&format!("Sub-issues: {}\n", self.sub_issues.join(", ")));
        }
        if !self.steps.is_empty() {
            out.push_str("Steps:\n");
            for (i, step) in self.steps.iter().take(5).enumerate() {
                out.push_str(&format!(
                    "{}. {} ({})\n",
                    i + 1,
                    step.step_id,
                    step.outcome.as_str()
                ));
            }
        }
        if !self.escalation_reasons.is_empty() {
            out.push_str(&format!(
                "Escalation reasons: {}\n",
                self.escalation_reasons.join(", ")
            ));
        }
        if let Some(ticket) = &self.ticket_id {
            out.push_str(&format!("Ticket: {}\n", ticket));
        }
        out.push_str(&format!("Summary: {}\n", self.summary));
        out.push_str(&format!("Resolution: {}", self.resolution));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::StepOutcome;

    #[test]
    fn test_ticket_ids_are_unique() {
        let a = TicketRequest::new("internet_down", "desc", EscalationPriority::High);
        let b = TicketRequest::new("internet_down", "desc", EscalationPriority::High);
        assert_ne!(a.ticket_id, b.ticket_id);
        assert_eq!(a.status, "open");
    }

    #[test]
    fn test_report_render_limits_steps() {
        let steps = (0..7)
            .map(|i| TroubleshootingStepRecord {
                step_id: format!("step_{}", i),
                prompt: String::new(),
                user_response: String::new(),
                outcome: StepOutcome::Failure,
                priority_score: 0.0,
                timestamp: Utc::now(),
            })
            .collect();
        let report = CallReport {
            call_id: "CA1".into(),
            phone: Some("9876543210".into()),
            customer_name: None,
            customer_info: None,
            status: CallStatus::Escalated,
            started_at: Utc::now(),
            duration_secs: 125,
            issue_type: Some("internet_down".into()),
            sub_issues: vec![],
            steps,
            escalation_reasons: vec!["multiple_failures".into()],
            ticket_id: Some("t-1".into()),
            resolution: "escalated to human agent".into(),
            summary: "caller had no internet".into(),
        };
        let text = report.render();
        assert!(text.contains("Duration: 2m 5s"));
        assert!(text.contains("5. step_4"));
        assert!(!text.contains("6. step_5"));
        assert!(text.contains("Resolved: no"));
    }
}
