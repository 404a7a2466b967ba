//! Multi-criteria escalation policy
//!
//! After every diagnostic step the engine asks [`EscalationManager`] whether
//! the call should go to a human. Reasons are re-evaluated from scratch on
//! each call; reasons raised with [`EscalationManager::force`] (caller asked
//! for a human, handoff step reached, fast path) stick for the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use call_agent_config::{CriteriaUpdate, EscalationCriteria};
use call_agent_core::{CustomerProfile, EscalationPriority, PriorIssue};

use crate::lexicon::PhraseSet;

/// Why a call was handed to a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    CustomerRequest,
    MultipleFailures,
    StepsExhausted,
    TechnicalComplexity,
    AreaOutage,
    AccountIssue,
    HardwareIssue,
    RepeatedIssue,
    LowConfidence,
    Timeout,
    EscalationKeyword,
    BusinessCustomer,
    VipCustomer,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerRequest => "customer_request",
            Self::MultipleFailures => "multiple_failures",
            Self::StepsExhausted => "steps_exhausted",
            Self::TechnicalComplexity => "technical_complexity",
            Self::AreaOutage => "area_outage",
            Self::AccountIssue => "account_issue",
            Self::HardwareIssue => "hardware_issue",
            Self::RepeatedIssue => "repeated_issue",
            Self::LowConfidence => "low_confidence",
            Self::Timeout => "timeout",
            Self::EscalationKeyword => "escalation_keyword",
            Self::BusinessCustomer => "business_customer",
            Self::VipCustomer => "vip_customer",
        }
    }

    /// Parse a reason name as used in flow handoff steps
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "customer_request" => Self::CustomerRequest,
            "multiple_failures" => Self::MultipleFailures,
            "steps_exhausted" => Self::StepsExhausted,
            "technical_complexity" => Self::TechnicalComplexity,
            "area_outage" => Self::AreaOutage,
            "account_issue" => Self::AccountIssue,
            "hardware_issue" => Self::HardwareIssue,
            "repeated_issue" => Self::RepeatedIssue,
            "low_confidence" => Self::LowConfidence,
            "timeout" => Self::Timeout,
            "escalation_keyword" => Self::EscalationKeyword,
            "business_customer" => Self::BusinessCustomer,
            "vip_customer" => Self::VipCustomer,
            _ => return None,
        })
    }

    fn priority(&self) -> EscalationPriority {
        match self {
            Self::AreaOutage | Self::VipCustomer | Self::BusinessCustomer => {
                EscalationPriority::High
            }
            Self::MultipleFailures | Self::HardwareIssue | Self::RepeatedIssue => {
                EscalationPriority::Medium
            }
            _ => EscalationPriority::Normal,
        }
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts the policy is evaluated against
#[derive(Debug, Clone, Default)]
pub struct EscalationInput<'a> {
    pub failed_steps: usize,
    pub total_steps: usize,
    pub issue_type: &'a str,
    pub sub_issues: &'a [String],
    pub confidence: f64,
    pub business_customer: bool,
    pub vip: bool,
    /// Caller utterances, oldest first
    pub recent_user_utterances: &'a [String],
    pub prior_issues: &'a [PriorIssue],
}

/// Time spent on one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_id: String,
    pub seconds: f64,
}

/// Snapshot of the escalation decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSummary {
    pub escalated: bool,
    pub reasons: Vec<String>,
    pub priority: EscalationPriority,
    pub troubleshooting_minutes: f64,
    pub step_times: Vec<StepTiming>,
}

/// Decides when automated diagnosis should stop
#[derive(Debug)]
pub struct EscalationManager {
    criteria: EscalationCriteria,
    keywords: PhraseSet,
    forced: Vec<EscalationReason>,
    evaluated: Vec<EscalationReason>,
    started: Instant,
    last_step: Instant,
    step_times: Vec<StepTiming>,
}

impl Default for EscalationManager {
    fn default() -> Self {
        Self::new(EscalationCriteria::default())
    }
}

impl EscalationManager {
    pub fn new(criteria: EscalationCriteria) -> Self {
        let now = Instant::now();
        Self {
            keywords: PhraseSet::new(&criteria.escalation_keywords),
            criteria,
            forced: Vec::new(),
            evaluated: Vec::new(),
            started: now,
            last_step: now,
            step_times: Vec::new(),
        }
    }

    pub fn criteria(&self) -> &EscalationCriteria {
        &self.criteria
    }

    /// Evaluate every criterion
    ///
    /// Returns false while fewer than `min_steps_before_escalation` steps
    /// were attempted, unless a reason was forced.
    pub fn should_escalate(&mut self, input: &EscalationInput<'_>) -> bool {
        self.evaluated.clear();

        if input.total_steps < self.criteria.min_steps_before_escalation {
            return !self.forced.is_empty();
        }

        let c = &self.criteria;
        let mut reasons = Vec::new();

        if input.failed_steps >= c.max_failed_steps {
            reasons.push(EscalationReason::MultipleFailures);
        }
        if input.total_steps >= c.max_total_steps {
            reasons.push(EscalationReason::StepsExhausted);
        }
        if self.elapsed_minutes() >= c.max_troubleshooting_minutes as f64 {
            reasons.push(EscalationReason::Timeout);
        }
        if input.confidence < c.min_confidence {
            reasons.push(EscalationReason::LowConfidence);
        }
        if input.business_customer && c.business_customer_auto_escalate {
            reasons.push(EscalationReason::BusinessCustomer);
        }
        if input.vip && c.vip_customer_auto_escalate {
            reasons.push(EscalationReason::VipCustomer);
        }
        if c.auto_escalate_issues.contains(input.issue_type) {
            reasons.push(EscalationReason::TechnicalComplexity);
        }
        for sub_issue in input.sub_issues {
            if c.auto_escalate_issues.contains(sub_issue) {
                reasons.push(match sub_issue.as_str() {
                    "area_outage" => EscalationReason::AreaOutage,
                    "account_suspended" => EscalationReason::AccountIssue,
                    _ => EscalationReason::HardwareIssue,
                });
            }
        }
        if let Some(keyword) = self.keyword_in(input.recent_user_utterances) {
            tracing::info!(keyword = %keyword, "Escalation keyword heard");
            reasons.push(EscalationReason::EscalationKeyword);
        }
        if self.is_repeated_issue(input.issue_type, input.prior_issues, Utc::now()) {
            reasons.push(EscalationReason::RepeatedIssue);
        }

        for reason in reasons {
            if !self.evaluated.contains(&reason) {
                self.evaluated.push(reason);
            }
        }

        if !self.evaluated.is_empty() {
            tracing::info!(
                failed = input.failed_steps,
                total = input.total_steps,
                reasons = ?self.reason_names(),
                "Escalation criteria met"
            );
        }

        !self.forced.is_empty() || !self.evaluated.is_empty()
    }

    /// Record a reason that escalates regardless of the step gate
    pub fn force(&mut self, reason: EscalationReason) {
        if !self.forced.contains(&reason) {
            tracing::info!(reason = %reason, "Escalation forced");
            self.forced.push(reason);
        }
    }

    pub fn is_forced(&self) -> bool {
        !self.forced.is_empty()
    }

    /// Forced reasons first, then those found by the last evaluation
    pub fn reasons(&self) -> Vec<EscalationReason> {
        let mut all = self.forced.clone();
        for reason in &self.evaluated {
            if !all.contains(reason) {
                all.push(*reason);
            }
        }
        all
    }

    pub fn reason_names(&self) -> Vec<String> {
        self.reasons().iter().map(|r| r.as_str().to_string()).collect()
    }

    /// Highest priority among the reasons
    pub fn priority(&self) -> EscalationPriority {
        let reasons = self.reasons();
        if reasons.iter().any(|r| r.priority() == EscalationPriority::High) {
            EscalationPriority::High
        } else if reasons.iter().any(|r| r.priority() == EscalationPriority::Medium) {
            EscalationPriority::Medium
        } else {
            EscalationPriority::Normal
        }
    }

    /// Close the timing window of `step_id`
    pub fn record_step_time(&mut self, step_id: &str) {
        let now = Instant::now();
        let seconds = now.duration_since(self.last_step).as_secs_f64();
        self.last_step = now;

        if seconds > self.criteria.max_time_per_step_seconds as f64 {
            tracing::warn!(
                step_id,
                seconds = format!("{:.1}", seconds),
                limit = self.criteria.max_time_per_step_seconds,
                "Step exceeded time limit"
            );
        }

        match self.step_times.iter_mut().find(|t| t.step_id == step_id) {
            Some(timing) => timing.seconds = seconds,
            None => self.step_times.push(StepTiming {
                step_id: step_id.to_string(),
                seconds,
            }),
        }
    }

    pub fn update_criteria(&mut self, update: &CriteriaUpdate) {
        if update.is_empty() {
            return;
        }
        self.criteria.apply(update);
        self.keywords = PhraseSet::new(&self.criteria.escalation_keywords);
        tracing::info!(
            max_failed_steps = self.criteria.max_failed_steps,
            max_total_steps = self.criteria.max_total_steps,
            max_minutes = self.criteria.max_troubleshooting_minutes,
            "Escalation criteria updated"
        );
    }

    /// Replace the criteria wholesale
    pub fn set_criteria(&mut self, criteria: EscalationCriteria) {
        self.keywords = PhraseSet::new(&criteria.escalation_keywords);
        self.criteria = criteria;
    }

    /// Clear reasons and timings and restart the clock
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.forced.clear();
        self.evaluated.clear();
        self.started = now;
        self.last_step = now;
        self.step_times.clear();
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 60.0
    }

    pub fn step_times(&self) -> &[StepTiming] {
        &self.step_times
    }

    pub fn summary(&self) -> EscalationSummary {
        EscalationSummary {
            escalated: !self.reasons().is_empty(),
            reasons: self.reason_names(),
            priority: self.priority(),
            troubleshooting_minutes: self.elapsed_minutes(),
            step_times: self.step_times.clone(),
        }
    }

    /// Ticket body for the human team
    pub fn build_ticket_description(
        &self,
        issue_type: &str,
        phone: Option<&str>,
        customer: Option<&CustomerProfile>,
        steps: &[String],
        conversation_summary: &str,
    ) -> String {
        let customer_info = customer
            .map(CustomerProfile::info_block)
            .unwrap_or_else(|| CustomerProfile::new("Unknown", "").info_block());

        let mut lines = vec![
            format!("Issue Type: {}", issue_type),
            format!("Customer Phone: {}", phone.unwrap_or("Unknown")),
            format!("Escalation Reasons: {}", self.reason_names().join(", ")),
            format!("Troubleshooting Time: {:.1} minutes", self.elapsed_minutes()),
            format!("Steps Attempted: {}", steps.len()),
            String::new(),
            "Customer Information:".to_string(),
            customer_info,
            String::new(),
            "Troubleshooting Steps:".to_string(),
        ];
        lines.extend(
            steps
                .iter()
                .enumerate()
                .map(|(i, step)| format!("{}. {}", i + 1, step)),
        );
        lines.push(String::new());
        lines.push("Conversation Summary:".to_string());
        lines.push(conversation_summary.to_string());
        lines.join("\n")
    }

    fn keyword_in<'k>(&'k self, utterances: &[String]) -> Option<&'k str> {
        let start = utterances.len().saturating_sub(self.criteria.keyword_lookback);
        utterances[start..]
            .iter()
            .find_map(|utterance| self.keywords.first_match(utterance))
    }

    fn is_repeated_issue(&self, issue_type: &str, prior: &[PriorIssue], now: DateTime<Utc>) -> bool {
        if prior.is_empty() {
            return false;
        }
        let recent = prior
            .iter()
            .filter(|p| p.issue_type == issue_type)
            .filter(|p| (now - p.reported_at).num_days() <= self.criteria.repeated_issue_window_days)
            .count();
        recent >= self.criteria.repeated_issue_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn input(failed: usize, total: usize) -> EscalationInput<'static> {
        EscalationInput {
            failed_steps: failed,
            total_steps: total,
            issue_type: "internet_down",
            confidence: 0.9,
            ..Default::default()
        }
    }

    #[test]
    fn test_gate_blocks_early_escalation() {
        let mut m = EscalationManager::default();
        let mut i = input(1, 1);
        i.vip = true;
        assert!(!m.should_escalate(&i));
        assert!(m.reasons().is_empty());
    }

    #[test]
    fn test_three_failures_escalate() {
        let mut m = EscalationManager::default();
        assert!(m.should_escalate(&input(3, 3)));
        assert!(m.reasons().contains(&EscalationReason::MultipleFailures));
        assert_eq!(m.priority(), EscalationPriority::Medium);
    }

    #[test]
    fn test_monotonic_once_past_gate() {
        let mut m = EscalationManager::default();
        let mut i = input(0, 2);
        i.business_customer = true;
        for total in 2..8 {
            i.total_steps = total;
            assert!(m.should_escalate(&i), "total {}", total);
        }
        assert_eq!(m.priority(), EscalationPriority::High);
    }

    #[test]
    fn test_sub_issue_mapping() {
        let mut m = EscalationManager::default();
        let subs = vec![
            "area_outage".to_string(),
            "account_suspended".to_string(),
            "fiber_break".to_string(),
            "modem_issue".to_string(),
        ];
        let mut i = input(0, 2);
        i.sub_issues = &subs;
        assert!(m.should_escalate(&i));
        assert_eq!(
            m.reasons(),
            vec![
                EscalationReason::AreaOutage,
                EscalationReason::AccountIssue,
                EscalationReason::HardwareIssue
            ]
        );
        assert_eq!(m.priority(), EscalationPriority::High);
    }

    #[test]
    fn test_keyword_only_in_lookback() {
        let mut m = EscalationManager::default();
        let old = vec![
            "let me speak to a supervisor".to_string(),
            "ok".to_string(),
            "fine".to_string(),
            "done".to_string(),
        ];
        let mut i = input(0, 2);
        i.recent_user_utterances = &old;
        assert!(!m.should_escalate(&i));

        let recent = vec!["ok".to_string(), "I want a TECHNICIAN now".to_string()];
        i.recent_user_utterances = &recent;
        assert!(m.should_escalate(&i));
        assert_eq!(m.reasons(), vec![EscalationReason::EscalationKeyword]);
        assert_eq!(m.priority(), EscalationPriority::Normal);
    }

    #[test]
    fn test_keyword_needs_whole_word() {
        let mut m = EscalationManager::default();
        let said = vec!["it is for personal use, the managerial plan".to_string()];
        let mut i = input(0, 2);
        i.recent_user_utterances = &said;
        assert!(!m.should_escalate(&i));

        let said = vec!["can I talk to a real person?".to_string()];
        i.recent_user_utterances = &said;
        assert!(m.should_escalate(&i));
        assert_eq!(m.reasons(), vec![EscalationReason::EscalationKeyword]);
    }

    #[test]
    fn test_malayalam_keyword() {
        let mut m = EscalationManager::default();
        let said = vec!["എനിക്ക് ടെക്നീഷ്യൻ വേണം".to_string()];
        let mut i = input(0, 2);
        i.recent_user_utterances = &said;
        assert!(m.should_escalate(&i));
    }

    #[test]
    fn test_repeated_issue_window() {
        let mut m = EscalationManager::default();
        let now = Utc::now();
        let prior = vec![
            PriorIssue {
                issue_type: "internet_down".into(),
                reported_at: now - ChronoDuration::days(2),
            },
            PriorIssue {
                issue_type: "internet_down".into(),
                reported_at: now - ChronoDuration::days(6),
            },
            PriorIssue {
                issue_type: "tv_issues".into(),
                reported_at: now - ChronoDuration::days(1),
            },
        ];
        let mut i = input(0, 2);
        i.prior_issues = &prior;
        assert!(m.should_escalate(&i));
        assert_eq!(m.reasons(), vec![EscalationReason::RepeatedIssue]);

        let stale = vec![prior[0].clone(), PriorIssue {
            issue_type: "internet_down".into(),
            reported_at: now - ChronoDuration::days(30),
        }];
        i.prior_issues = &stale;
        assert!(!m.should_escalate(&i));
    }

    #[test]
    fn test_forced_reason_bypasses_gate_and_sticks() {
        let mut m = EscalationManager::default();
        m.force(EscalationReason::CustomerRequest);
        assert!(m.should_escalate(&input(0, 0)));
        assert!(m.should_escalate(&input(0, 3)));
        assert_eq!(m.reasons(), vec![EscalationReason::CustomerRequest]);
        m.reset();
        assert!(!m.should_escalate(&input(0, 0)));
    }

    #[test]
    fn test_low_confidence() {
        let mut m = EscalationManager::default();
        let mut i = input(0, 2);
        i.confidence = 0.5;
        assert!(m.should_escalate(&i));
        assert_eq!(m.reasons(), vec![EscalationReason::LowConfidence]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_step_times() {
        let mut m = EscalationManager::default();
        tokio::time::advance(Duration::from_secs(200)).await;
        m.record_step_time("restart_modem");
        assert_eq!(m.step_times().len(), 1);
        assert!((m.step_times()[0].seconds - 200.0).abs() < 1.0);

        assert!(!m.should_escalate(&input(0, 2)));
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        assert!(m.should_escalate(&input(0, 2)));
        assert_eq!(m.reasons(), vec![EscalationReason::Timeout]);

        let summary = m.summary();
        assert!(summary.escalated);
        assert!(summary.troubleshooting_minutes >= 10.0);
    }

    #[test]
    fn test_update_criteria() {
        let mut m = EscalationManager::default();
        m.update_criteria(&CriteriaUpdate {
            max_failed_steps: Some(1),
            ..Default::default()
        });
        assert!(m.should_escalate(&input(1, 2)));
    }

    #[test]
    fn test_ticket_description_layout() {
        let mut m = EscalationManager::default();
        m.force(EscalationReason::HardwareIssue);
        let mut customer = CustomerProfile::new("Anu Mathew", "9876543210");
        customer.plan = Some("Fiber 100".into());
        let steps = vec!["check_lights".to_string(), "fiber_cut_detected".to_string()];
        let text = m.build_ticket_description(
            "internet_down",
            Some("9876543210"),
            Some(&customer),
            &steps,
            "Red light on the modem",
        );
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Issue Type: internet_down");
        assert_eq!(lines[1], "Customer Phone: 9876543210");
        assert_eq!(lines[2], "Escalation Reasons: hardware_issue");
        assert!(lines[3].starts_with("Troubleshooting Time: "));
        assert_eq!(lines[4], "Steps Attempted: 2");
        assert!(text.contains("- Plan: Fiber 100"));
        assert!(text.contains("1. check_lights\n2. fiber_cut_detected"));
        assert!(text.ends_with("Conversation Summary:\nRed light on the modem"));
    }

    #[test]
    fn test_reason_names_round_trip_parse() {
        assert_eq!(
            EscalationReason::parse("account_issue"),
            Some(EscalationReason::AccountIssue)
        );
        assert_eq!(EscalationReason::parse("bogus"), None);
    }
}
