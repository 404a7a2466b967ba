//! Call session orchestration and troubleshooting decisions
//!
//! Features:
//! - Issue classification with weighted keywords and override rules
//! - Step ranking with online-learned success rates
//! - Decision-tree troubleshooting with escalation policy
//! - DTMF identity collection
//! - Per-call conversation handle over the language model
//! - Call session orchestrator driving one call from a single control loop

pub mod classifier;
pub mod conversation;
pub mod escalation;
pub mod identity;
pub mod lexicon;
pub mod orchestrator;
pub mod prioritizer;
pub mod prompts;
pub mod troubleshooting;

pub use classifier::{Classification, ClassificationMetadata, IssueClassifier, MentionedSpeed};
pub use conversation::{fallback_summary, trim_response, ConversationHandle, ModelContext};
pub use escalation::{
    EscalationInput, EscalationManager, EscalationReason, EscalationSummary, StepTiming,
};
pub use identity::{validate_identity, IdentityCollector, IdentityInput};
pub use orchestrator::{CallSession, CallSessionOrchestrator, SessionDependencies, SessionEvent};
pub use prioritizer::{PriorityWeights, StepPrioritizer};
pub use troubleshooting::{
    criteria_for, infer_outcome, StepDetail, StepView, Transition, TroubleshootingEngine,
    TroubleshootingSummary,
};
