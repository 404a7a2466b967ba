//! Call lifecycle types: session states, call status, history entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Orchestrator state for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Transport connected, no `start` event yet
    #[default]
    Connecting,
    /// Waiting for the caller to key in their registered number
    CollectingIdentity,
    /// Walking a troubleshooting flow
    Diagnosing,
    Resolved,
    Escalated,
    Disconnected,
}

static STATE_TRANSITIONS: Lazy<HashMap<SessionState, &'static [SessionState]>> =
    Lazy::new(|| {
        use SessionState::*;
        let mut map = HashMap::new();
        map.insert(Connecting, &[CollectingIdentity, Disconnected] as &[_]);
        map.insert(
            CollectingIdentity,
            &[CollectingIdentity, Diagnosing, Escalated, Disconnected] as &[_],
        );
        map.insert(Diagnosing, &[Resolved, Escalated, Disconnected] as &[_]);
        map.insert(Resolved, &[Disconnected] as &[_]);
        map.insert(Escalated, &[Disconnected] as &[_]);
        map.insert(Disconnected, &[] as &[_]);
        map
    });

impl SessionState {
    pub fn allowed_transitions(&self) -> &'static [SessionState] {
        STATE_TRANSITIONS.get(self).copied().unwrap_or(&[])
    }

    pub fn can_transition_to(&self, target: SessionState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Resolved, escalated and disconnected calls take no further diagnostic input
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated | Self::Disconnected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::CollectingIdentity => "collecting_identity",
            Self::Diagnosing => "diagnosing",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status recorded on the call session itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Active,
    Resolved,
    Escalated,
    Disconnected,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One caller utterance paired with the agent's reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub user: String,
    pub bot: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome inferred from the caller's answer to a diagnostic step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    Unknown,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unknown => "unknown",
        }
    }
}

/// Immutable log record of one diagnostic exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TroubleshootingStepRecord {
    pub step_id: String,
    pub prompt: String,
    pub user_response: String,
    pub outcome: StepOutcome,
    pub priority_score: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(SessionState::Connecting.can_transition_to(SessionState::CollectingIdentity));
        assert!(SessionState::CollectingIdentity.can_transition_to(SessionState::Diagnosing));
        assert!(SessionState::Diagnosing.can_transition_to(SessionState::Escalated));
        assert!(!SessionState::Diagnosing.can_transition_to(SessionState::CollectingIdentity));
        assert!(SessionState::Disconnected.allowed_transitions().is_empty());
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Resolved.is_terminal());
        assert!(SessionState::Escalated.is_terminal());
        assert!(!SessionState::Diagnosing.is_terminal());
        assert!(!CallStatus::Active.is_terminal());
        assert!(CallStatus::Disconnected.is_terminal());
    }
}
