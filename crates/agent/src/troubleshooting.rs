//! Troubleshooting engine
//!
//! Holds a cursor into one shared, read-only [`TroubleshootingFlow`] and the
//! per-session bookkeeping around it: attempted/successful/failed step sets,
//! the step log, learned success rates and the escalation policy.
//!
//! Each caller answer is turned into an outcome by indicator phrases. The
//! next step comes from the current step's conditional edges, then its
//! default edge, then the prioritizer over the flow's remaining actions.

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use call_agent_config::{
    CriteriaUpdate, EscalationCriteria, FlowCatalog, StepDefinition, StepKind, TroubleshootingFlow,
};
use call_agent_core::{
    CustomerProfile, CustomerTechnicalProfile, EscalationPriority, PriorIssue, StepOutcome,
    TroubleshootingStepRecord,
};

use crate::classifier::Classification;
use crate::escalation::{EscalationInput, EscalationManager, EscalationReason, EscalationSummary};
use crate::lexicon::{contains_phrase, PhraseSet};
use crate::prioritizer::StepPrioritizer;

pub const SUCCESS_INDICATORS: &[&str] = &[
    "worked",
    "fixed",
    "resolved",
    "better",
    "good",
    "yes",
    "done",
    "completed",
    "ശരിയായി",
    "നന്നായി",
];

pub const FAILURE_INDICATORS: &[&str] = &[
    "not working",
    "still",
    "same problem",
    "no change",
    "didn't work",
    "failed",
    "ശരിയായില്ല",
    "ഇപ്പോഴും",
    "ഇല്ല",
];

static SUCCESS: Lazy<PhraseSet> = Lazy::new(|| PhraseSet::new(SUCCESS_INDICATORS.iter().copied()));
static FAILURE: Lazy<PhraseSet> = Lazy::new(|| PhraseSet::new(FAILURE_INDICATORS.iter().copied()));

/// Outcome of a step from the caller's answer
///
/// Success phrases are checked first, so "yes, still the same" counts as a
/// success. Answers with neither kind of phrase are `Unknown`, which the
/// engine treats as success to avoid escalating on vague replies. Both are
/// known weaknesses of the lexical heuristic.
pub fn infer_outcome(response: &str) -> StepOutcome {
    if SUCCESS.is_match(response) {
        StepOutcome::Success
    } else if FAILURE.is_match(response) {
        StepOutcome::Failure
    } else {
        StepOutcome::Unknown
    }
}

/// The step currently put to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub step_id: String,
    pub prompt: String,
    pub kind: StepKind,
    pub priority_score: f64,
}

/// What happens after a caller answer
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Ask the next step
    Continue(StepView),
    /// The last step fixed the problem
    Resolved { step_id: String },
    /// Hand the call to a human; terminal
    Escalate {
        reasons: Vec<EscalationReason>,
        priority: EscalationPriority,
    },
    /// No flow was started
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetail {
    pub step_id: String,
    pub outcome: StepOutcome,
}

/// End-of-session view of the diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TroubleshootingSummary {
    pub issue_type: String,
    pub sub_issues: Vec<String>,
    pub steps_attempted: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub escalated: bool,
    pub resolved: bool,
    pub escalation: Option<EscalationSummary>,
    pub steps: Vec<StepDetail>,
}

/// Caller facts the policy reads
#[derive(Debug, Clone, Default)]
struct CallerContext {
    profile: CustomerTechnicalProfile,
    business_customer: bool,
    vip: bool,
    prior_issues: Vec<PriorIssue>,
}

/// Per-session diagnostic state machine
pub struct TroubleshootingEngine {
    catalog: Arc<FlowCatalog>,
    base_criteria: EscalationCriteria,
    flow: Option<Arc<TroubleshootingFlow>>,
    current: Option<StepView>,
    issue_type: Option<String>,
    sub_issues: Vec<String>,
    confidence: f64,
    skip_further_troubleshooting: bool,
    caller: CallerContext,
    prioritizer: StepPrioritizer,
    escalation: EscalationManager,
    attempted_order: Vec<String>,
    attempted: HashSet<String>,
    successful: HashSet<String>,
    failed: HashSet<String>,
    history: Vec<TroubleshootingStepRecord>,
    utterances: Vec<String>,
    escalated: bool,
    resolved: bool,
}

impl TroubleshootingEngine {
    pub fn new(catalog: Arc<FlowCatalog>, criteria: EscalationCriteria) -> Self {
        Self {
            catalog,
            escalation: EscalationManager::new(criteria.clone()),
            base_criteria: criteria,
            flow: None,
            current: None,
            issue_type: None,
            sub_issues: Vec::new(),
            confidence: 1.0,
            skip_further_troubleshooting: false,
            caller: CallerContext::default(),
            prioritizer: StepPrioritizer::new(),
            attempted_order: Vec::new(),
            attempted: HashSet::new(),
            successful: HashSet::new(),
            failed: HashSet::new(),
            history: Vec::new(),
            utterances: Vec::new(),
            escalated: false,
            resolved: false,
        }
    }

    /// Enter the flow for a classified issue and return its first step
    ///
    /// Override classifications carrying an entry step start there instead of
    /// at the flow root.
    pub fn start(&mut self, classification: &Classification) -> Option<StepView> {
        let flow = self.catalog.get_or_fallback(&classification.issue_type)?;

        let entry = classification
            .metadata
            .entry_step
            .as_deref()
            .and_then(|id| flow.step(id))
            .unwrap_or_else(|| flow.root_step());

        self.issue_type = Some(flow.issue_type().to_string());
        self.sub_issues = classification.sub_issues.clone();
        self.confidence = classification.confidence;
        self.skip_further_troubleshooting = classification.skips_troubleshooting();
        self.attempted_order.clear();
        self.attempted.clear();
        self.successful.clear();
        self.failed.clear();
        self.history.clear();
        self.escalated = false;
        self.resolved = false;

        let view = self.view_of(entry);
        tracing::info!(
            issue_type = flow.issue_type(),
            entry_step = %entry.id,
            fast_path = self.skip_further_troubleshooting,
            "Troubleshooting started"
        );
        self.current = Some(view.clone());
        self.flow = Some(flow);
        Some(view)
    }

    /// Consume the caller's answer to the current step
    pub fn process_response(&mut self, response: &str) -> Transition {
        if self.escalated {
            return self.escalate_transition();
        }
        if self.resolved {
            if let Some(last) = self.history.last() {
                return Transition::Resolved {
                    step_id: last.step_id.clone(),
                };
            }
        }
        let (Some(flow), Some(current)) = (self.flow.clone(), self.current.clone()) else {
            return Transition::NotStarted;
        };
        let Some(step) = flow.step(&current.step_id) else {
            return Transition::NotStarted;
        };

        self.escalation.record_step_time(&step.id);
        self.utterances.push(response.to_string());

        let outcome = infer_outcome(response);
        self.record(step, &current, response, outcome);

        if self.skip_further_troubleshooting {
            tracing::info!(step_id = %step.id, "Fast path, skipping further troubleshooting");
            self.escalation.force(EscalationReason::HardwareIssue);
            return self.mark_escalated();
        }

        if step.resolves_on_success && outcome == StepOutcome::Success {
            self.resolved = true;
            self.current = None;
            tracing::info!(step_id = %step.id, "Issue resolved");
            return Transition::Resolved {
                step_id: step.id.clone(),
            };
        }

        if self.should_escalate() {
            return self.mark_escalated();
        }

        match self.next_step(&flow, step, response) {
            Some(next) if next.kind == StepKind::Handoff => {
                let reason = next
                    .handoff_reason
                    .as_deref()
                    .and_then(EscalationReason::parse)
                    .unwrap_or(EscalationReason::TechnicalComplexity);
                tracing::info!(step_id = %next.id, reason = %reason, "Handoff step reached");
                self.escalation.force(reason);
                self.mark_escalated()
            }
            Some(next) => {
                let view = self.view_of(next);
                tracing::debug!(from = %step.id, to = %view.step_id, "Next step");
                self.current = Some(view.clone());
                Transition::Continue(view)
            }
            None => {
                tracing::info!(step_id = %step.id, "No steps left");
                self.escalation.force(EscalationReason::StepsExhausted);
                self.mark_escalated()
            }
        }
    }

    /// Evaluate the escalation policy against the current state
    pub fn should_escalate(&mut self) -> bool {
        let issue_type = self.issue_type.clone().unwrap_or_default();
        let lookback = self.escalation.criteria().keyword_lookback;
        let start = self.utterances.len().saturating_sub(lookback);

        let input = EscalationInput {
            failed_steps: self.failed.len(),
            total_steps: self.attempted.len(),
            issue_type: &issue_type,
            sub_issues: &self.sub_issues,
            confidence: self.confidence,
            business_customer: self.caller.business_customer,
            vip: self.caller.vip,
            recent_user_utterances: &self.utterances[start..],
            prior_issues: &self.caller.prior_issues,
        };
        self.escalation.should_escalate(&input)
    }

    /// The caller asked for a human
    pub fn request_human(&mut self) -> Transition {
        self.escalation.force(EscalationReason::CustomerRequest);
        self.mark_escalated()
    }

    /// Refine the caller profile and derive this session's criteria from it
    pub fn update_customer_profile(&mut self, customer: &CustomerProfile) {
        let profile = CustomerTechnicalProfile::from_customer(customer);
        self.caller = CallerContext {
            profile,
            business_customer: customer.business_customer,
            vip: customer.vip,
            prior_issues: customer.prior_issues.clone(),
        };

        let mut criteria = self.base_criteria.clone();
        criteria.apply(&criteria_for(&profile));
        self.escalation.set_criteria(criteria);
        if !self.escalated {
            self.escalation.reset();
        }

        tracing::info!(
            technical_level = profile.technical_level,
            patience_level = profile.patience_level,
            max_failed_steps = self.escalation.criteria().max_failed_steps,
            max_total_steps = self.escalation.criteria().max_total_steps,
            "Customer profile applied"
        );
    }

    pub fn current_step(&self) -> Option<&StepView> {
        self.current.as_ref()
    }

    pub fn issue_type(&self) -> Option<&str> {
        self.issue_type.as_deref()
    }

    pub fn sub_issues(&self) -> &[String] {
        &self.sub_issues
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn attempted(&self) -> &HashSet<String> {
        &self.attempted
    }

    pub fn successful(&self) -> &HashSet<String> {
        &self.successful
    }

    pub fn failed(&self) -> &HashSet<String> {
        &self.failed
    }

    /// Step log in the order answers arrived
    pub fn history(&self) -> &[TroubleshootingStepRecord] {
        &self.history
    }

    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    pub fn prioritizer(&self) -> &StepPrioritizer {
        &self.prioritizer
    }

    /// Ticket body for the current escalation
    pub fn ticket_description(
        &self,
        phone: Option<&str>,
        customer: Option<&CustomerProfile>,
        conversation_summary: &str,
    ) -> String {
        self.escalation.build_ticket_description(
            self.issue_type.as_deref().unwrap_or("unknown"),
            phone,
            customer,
            &self.attempted_order,
            conversation_summary,
        )
    }

    pub fn summary(&self) -> TroubleshootingSummary {
        TroubleshootingSummary {
            issue_type: self
                .issue_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            sub_issues: self.sub_issues.clone(),
            steps_attempted: self.attempted.len(),
            steps_succeeded: self.successful.len(),
            steps_failed: self.failed.len(),
            escalated: self.escalated,
            resolved: self.resolved,
            escalation: self.escalated.then(|| self.escalation.summary()),
            steps: self
                .attempted_order
                .iter()
                .map(|id| StepDetail {
                    step_id: id.clone(),
                    outcome: self
                        .history
                        .iter()
                        .rev()
                        .find(|r| &r.step_id == id)
                        .map(|r| r.outcome)
                        .unwrap_or(StepOutcome::Unknown),
                })
                .collect(),
        }
    }

    fn record(
        &mut self,
        step: &StepDefinition,
        current: &StepView,
        response: &str,
        outcome: StepOutcome,
    ) {
        if self.attempted.insert(step.id.clone()) {
            self.attempted_order.push(step.id.clone());
        }

        // Unknown counts as success; a revisit keeps only the latest outcome
        let succeeded = outcome != StepOutcome::Failure;
        if succeeded {
            self.failed.remove(&step.id);
            self.successful.insert(step.id.clone());
        } else {
            self.successful.remove(&step.id);
            self.failed.insert(step.id.clone());
        }

        if step.kind == StepKind::Action {
            self.prioritizer
                .update_success_rate(step.action_key(), succeeded);
        }

        self.history.push(TroubleshootingStepRecord {
            step_id: step.id.clone(),
            prompt: current.prompt.clone(),
            user_response: response.to_string(),
            outcome,
            priority_score: current.priority_score,
            timestamp: Utc::now(),
        });

        tracing::info!(
            step_id = %step.id,
            outcome = outcome.as_str(),
            attempted = self.attempted.len(),
            failed = self.failed.len(),
            "Step recorded"
        );
    }

    fn next_step<'f>(
        &self,
        flow: &'f TroubleshootingFlow,
        step: &StepDefinition,
        response: &str,
    ) -> Option<&'f StepDefinition> {
        if let Some(edge) = step.edges.iter().find(|e| contains_phrase(response, &e.when)) {
            return flow.step(&edge.next);
        }
        if let Some(default) = &step.default {
            return flow.step(default);
        }

        let candidates: Vec<&StepDefinition> =
            flow.steps().iter().filter(|s| s.is_rankable()).collect();
        let ranked = self.prioritizer.prioritize(
            &candidates,
            flow.issue_type(),
            &self.sub_issues,
            &self.caller.profile,
            &self.attempted,
        );
        ranked.first().and_then(|(id, _)| flow.step(id))
    }

    fn view_of(&self, step: &StepDefinition) -> StepView {
        let issue_type = self.issue_type.as_deref().unwrap_or_default();
        let dependencies_met = step.depends_on.iter().all(|d| self.attempted.contains(d));
        StepView {
            step_id: step.id.clone(),
            prompt: step.prompt.clone(),
            kind: step.kind,
            priority_score: self.prioritizer.score(
                step,
                issue_type,
                &self.sub_issues,
                &self.caller.profile,
                dependencies_met,
            ),
        }
    }

    fn mark_escalated(&mut self) -> Transition {
        self.escalated = true;
        self.current = None;
        tracing::info!(
            reasons = ?self.escalation.reason_names(),
            priority = %self.escalation.priority(),
            "Escalating to human agent"
        );
        self.escalate_transition()
    }

    fn escalate_transition(&self) -> Transition {
        Transition::Escalate {
            reasons: self.escalation.reasons(),
            priority: self.escalation.priority(),
        }
    }
}

/// Criteria adjustments for a caller's skill and patience
pub fn criteria_for(profile: &CustomerTechnicalProfile) -> CriteriaUpdate {
    let mut update = CriteriaUpdate::default();
    if profile.technical_level >= 4 {
        update.max_failed_steps = Some(3);
        update.max_total_steps = Some(7);
    } else if profile.technical_level <= 1 {
        update.max_failed_steps = Some(1);
        update.max_total_steps = Some(3);
    }
    if profile.patience_level >= 4 {
        update.max_troubleshooting_minutes = Some(15);
    } else if profile.patience_level <= 1 {
        update.max_troubleshooting_minutes = Some(5);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IssueClassifier;

    fn engine() -> TroubleshootingEngine {
        let catalog = Arc::new(FlowCatalog::builtin().unwrap());
        TroubleshootingEngine::new(catalog, EscalationCriteria::default())
    }

    fn classify(text: &str) -> Classification {
        IssueClassifier::new().classify(text, &[])
    }

    fn assert_disjoint(e: &TroubleshootingEngine) {
        assert!(e.successful().is_disjoint(e.failed()));
        let union: HashSet<String> = e.successful().union(e.failed()).cloned().collect();
        assert_eq!(&union, e.attempted());
    }

    #[test]
    fn test_infer_outcome() {
        assert_eq!(infer_outcome("yes it worked"), StepOutcome::Success);
        assert_eq!(infer_outcome("it is still not working"), StepOutcome::Failure);
        assert_eq!(infer_outcome("hmm, I see a green light"), StepOutcome::Unknown);
        // Success wins when both kinds appear
        assert_eq!(infer_outcome("yes, still the same"), StepOutcome::Success);
        assert_eq!(infer_outcome("ഇപ്പോൾ ശരിയായി"), StepOutcome::Success);
        assert_eq!(infer_outcome("ഇപ്പോഴും ശരിയായില്ല"), StepOutcome::Failure);
        assert_eq!(infer_outcome("yesterday"), StepOutcome::Unknown);
    }

    #[test]
    fn test_start_enters_root() {
        let mut e = engine();
        let step = e.start(&classify("no internet since morning")).unwrap();
        assert_eq!(step.step_id, "check_lights");
        assert_eq!(step.kind, StepKind::Question);
        assert_eq!(e.issue_type(), Some("internet_down"));
    }

    #[test]
    fn test_edge_then_default_then_resolution() {
        let mut e = engine();
        e.start(&classify("no internet since morning"));

        // No edge phrase, default edge to restart_modem
        let t = e.process_response("only the power light is green");
        let Transition::Continue(step) = t else { panic!("expected next step, got {:?}", t) };
        assert_eq!(step.step_id, "restart_modem");

        let t = e.process_response("yes it worked, thank you");
        assert_eq!(t, Transition::Resolved { step_id: "restart_modem".into() });
        assert!(e.is_resolved());
        assert!(e.current_step().is_none());
        assert_disjoint(&e);
    }

    #[test]
    fn test_conditional_edge() {
        let mut e = engine();
        e.start(&classify("no internet"));
        let Transition::Continue(step) = e.process_response("I think the cable is loose") else {
            panic!("expected next step")
        };
        assert_eq!(step.step_id, "check_cables");
    }

    #[test]
    fn test_unknown_outcome_does_not_resolve() {
        let mut e = engine();
        e.start(&classify("no internet"));
        e.process_response("lights are green");
        let t = e.process_response("hmm okay");
        // Unknown counts as success for bookkeeping but only an explicit
        // success resolves
        assert!(matches!(t, Transition::Continue(_) | Transition::Escalate { .. }));
        assert!(e.successful().contains("restart_modem"));
        assert_eq!(e.history()[1].outcome, StepOutcome::Unknown);
    }

    #[test]
    fn test_failures_escalate_with_multiple_failures() {
        let mut e = engine();
        e.start(&classify("no internet"));
        assert!(matches!(e.process_response("still nothing"), Transition::Continue(_)));
        let t = e.process_response("still not working");
        let Transition::Escalate { reasons, priority } = t else {
            panic!("expected escalation, got {:?}", t)
        };
        assert!(reasons.contains(&EscalationReason::MultipleFailures));
        assert_eq!(priority, EscalationPriority::Medium);

        // Terminal: nothing further is recorded
        let again = e.process_response("yes it works now");
        assert!(matches!(again, Transition::Escalate { .. }));
        assert_eq!(e.history().len(), 2);
        assert_disjoint(&e);
    }

    #[test]
    fn test_red_light_fast_path() {
        let mut e = engine();
        let step = e.start(&classify("the modem shows a red light")).unwrap();
        assert_eq!(step.step_id, "fiber_cut_detected");

        let Transition::Escalate { reasons, priority } = e.process_response("okay I restarted it")
        else {
            panic!("expected escalation")
        };
        assert_eq!(reasons[0], EscalationReason::HardwareIssue);
        assert_eq!(priority, EscalationPriority::Medium);
    }

    #[test]
    fn test_handoff_step_escalates() {
        let mut e = engine();
        e.start(&classify("my bill amount is wrong"));
        assert_eq!(e.issue_type(), Some("billing_issues"));
        let Transition::Escalate { reasons, .. } = e.process_response("there is an extra charge")
        else {
            panic!("expected escalation")
        };
        assert_eq!(reasons, vec![EscalationReason::AccountIssue]);
    }

    #[test]
    fn test_ranked_fallback_skips_routed_only_and_blocked() {
        let mut e = engine();
        e.start(&classify("wifi password not accepted"));
        assert_eq!(e.issue_type(), Some("wifi_issues"));

        // wifi_symptom -> check_wifi_password via edge
        let Transition::Continue(step) = e.process_response("it asks for the password") else {
            panic!("expected next step")
        };
        assert_eq!(step.step_id, "check_wifi_password");

        // Failure, no default edge: ranked among restart_modem and
        // reset_network_settings (its dependency is now attempted)
        let t = e.process_response("no change");
        let Transition::Continue(step) = t else { panic!("expected next step, got {:?}", t) };
        assert!(["restart_modem", "reset_network_settings"].contains(&step.step_id.as_str()));
        assert_disjoint(&e);
    }

    #[test]
    fn test_request_human() {
        let mut e = engine();
        e.start(&classify("no internet"));
        let Transition::Escalate { reasons, .. } = e.request_human() else {
            panic!("expected escalation")
        };
        assert_eq!(reasons, vec![EscalationReason::CustomerRequest]);
        assert!(e.is_escalated());
        assert!(e.summary().escalation.is_some());
    }

    #[test]
    fn test_not_started() {
        let mut e = engine();
        assert_eq!(e.process_response("hello"), Transition::NotStarted);
    }

    #[test]
    fn test_profile_adjusts_criteria() {
        let mut e = engine();
        let mut customer = CustomerProfile::new("Anu", "9876543210");
        customer.technical_level = Some(1);
        customer.patience_level = Some(5);
        e.update_customer_profile(&customer);
        let c = e.escalation().criteria();
        assert_eq!(c.max_failed_steps, 1);
        assert_eq!(c.max_total_steps, 3);
        assert_eq!(c.max_troubleshooting_minutes, 15);

        customer.technical_level = Some(3);
        customer.patience_level = Some(3);
        e.update_customer_profile(&customer);
        assert_eq!(e.escalation().criteria(), &EscalationCriteria::default());
    }

    #[test]
    fn test_summary_and_ticket_description() {
        let mut e = engine();
        e.start(&classify("no internet"));
        e.process_response("lights look normal");
        e.process_response("still not working");
        e.process_response("still the same problem");

        let summary = e.summary();
        assert!(summary.escalated);
        assert_eq!(summary.steps_attempted, 3);
        assert_eq!(summary.steps[0].step_id, "check_lights");

        let description = e.ticket_description(Some("9876543210"), None, "No internet");
        assert!(description.contains("Steps Attempted: 3"));
        assert!(description.contains("1. check_lights\n2. restart_modem\n3. check_cables"));
    }
}
