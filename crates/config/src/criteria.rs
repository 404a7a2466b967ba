//! Escalation policy thresholds

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ConfigError;

/// Thresholds consulted by the escalation manager after every step
///
/// A process-wide default lives in [`crate::Settings`]; each session works on
/// its own copy so profile-based adjustments never leak across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationCriteria {
    #[serde(default = "default_max_failed_steps")]
    pub max_failed_steps: usize,

    #[serde(default = "default_max_total_steps")]
    pub max_total_steps: usize,

    /// No escalation is decided before this many steps were attempted
    #[serde(default = "default_min_steps")]
    pub min_steps_before_escalation: usize,

    #[serde(default = "default_max_minutes")]
    pub max_troubleshooting_minutes: u64,

    /// Steps running longer than this are logged
    #[serde(default = "default_max_step_seconds")]
    pub max_time_per_step_seconds: u64,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_true")]
    pub business_customer_auto_escalate: bool,

    #[serde(default = "default_true")]
    pub vip_customer_auto_escalate: bool,

    /// Issue types and sub-issues that always go to a human
    #[serde(default = "default_auto_escalate_issues")]
    pub auto_escalate_issues: BTreeSet<String>,

    #[serde(default = "default_escalation_keywords")]
    pub escalation_keywords: BTreeSet<String>,

    /// How many recent exchanges are scanned for escalation keywords
    #[serde(default = "default_keyword_lookback")]
    pub keyword_lookback: usize,

    #[serde(default = "default_repeated_window_days")]
    pub repeated_issue_window_days: i64,

    #[serde(default = "default_repeated_count")]
    pub repeated_issue_count: usize,
}

fn default_max_failed_steps() -> usize {
    2
}
fn default_max_total_steps() -> usize {
    5
}
fn default_min_steps() -> usize {
    2
}
fn default_max_minutes() -> u64 {
    10
}
fn default_max_step_seconds() -> u64 {
    180
}
fn default_min_confidence() -> f64 {
    0.6
}
fn default_true() -> bool {
    true
}
fn default_keyword_lookback() -> usize {
    3
}
fn default_repeated_window_days() -> i64 {
    7
}
fn default_repeated_count() -> usize {
    2
}

fn default_auto_escalate_issues() -> BTreeSet<String> {
    ["account_suspended", "area_outage", "hardware_failure", "fiber_break"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_escalation_keywords() -> BTreeSet<String> {
    [
        "technician",
        "ടെക്നീഷ്യൻ",
        "supervisor",
        "സൂപ്പർവൈസർ",
        "manager",
        "മാനേജർ",
        "escalate",
        "എസ്കലേറ്റ്",
        "human",
        "മനുഷ്യൻ",
        "person",
        "വ്യക്തി",
        "speak",
        "സംസാരിക്കാൻ",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for EscalationCriteria {
    fn default() -> Self {
        Self {
            max_failed_steps: default_max_failed_steps(),
            max_total_steps: default_max_total_steps(),
            min_steps_before_escalation: default_min_steps(),
            max_troubleshooting_minutes: default_max_minutes(),
            max_time_per_step_seconds: default_max_step_seconds(),
            min_confidence: default_min_confidence(),
            business_customer_auto_escalate: true,
            vip_customer_auto_escalate: true,
            auto_escalate_issues: default_auto_escalate_issues(),
            escalation_keywords: default_escalation_keywords(),
            keyword_lookback: default_keyword_lookback(),
            repeated_issue_window_days: default_repeated_window_days(),
            repeated_issue_count: default_repeated_count(),
        }
    }
}

/// Partial override applied on top of a session's criteria
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaUpdate {
    pub max_failed_steps: Option<usize>,
    pub max_total_steps: Option<usize>,
    pub max_troubleshooting_minutes: Option<u64>,
    pub min_confidence: Option<f64>,
}

impl CriteriaUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl EscalationCriteria {
    pub fn apply(&mut self, update: &CriteriaUpdate) {
        if let Some(v) = update.max_failed_steps {
            self.max_failed_steps = v;
        }
        if let Some(v) = update.max_total_steps {
            self.max_total_steps = v;
        }
        if let Some(v) = update.max_troubleshooting_minutes {
            self.max_troubleshooting_minutes = v;
        }
        if let Some(v) = update.min_confidence {
            self.min_confidence = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_failed_steps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "escalation.max_failed_steps".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        if self.max_total_steps < self.min_steps_before_escalation {
            return Err(ConfigError::InvalidValue {
                field: "escalation.max_total_steps".to_string(),
                message: format!(
                    "Must be >= min_steps_before_escalation ({})",
                    self.min_steps_before_escalation
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidValue {
                field: "escalation.min_confidence".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", self.min_confidence),
            });
        }
        Ok(())
    }
}
