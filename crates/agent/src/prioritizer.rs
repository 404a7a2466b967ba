//! Diagnostic step ranking
//!
//! Score = weighted sum of historical success probability (adjusted for the
//! issue and sub-issues at hand), inverse complexity, technical-level match,
//! patience-adjusted time score and a dependency term. Success rates are
//! learned per session with an exponential moving average.

use std::collections::{HashMap, HashSet};

use call_agent_config::StepDefinition;
use call_agent_core::CustomerTechnicalProfile;

/// Weight of each scoring factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityWeights {
    pub success_probability: f64,
    pub complexity: f64,
    pub technical_match: f64,
    pub estimated_time: f64,
    pub dependencies: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            success_probability: 0.35,
            complexity: 0.20,
            technical_match: 0.15,
            estimated_time: 0.15,
            dependencies: 0.15,
        }
    }
}

/// Historical success rate per action
pub const SUCCESS_RATES: &[(&str, f64)] = &[
    ("restart_modem", 0.75),
    ("check_cables", 0.60),
    ("power_cycle", 0.70),
    ("check_wifi_password", 0.85),
    ("reset_network_settings", 0.65),
    ("restart_stb", 0.80),
    ("check_hdmi", 0.70),
    ("rescan_channels", 0.60),
    ("check_tv_input", 0.90),
];

pub const DEFAULT_SUCCESS_RATE: f64 = 0.5;

/// Complexity 1 (trivial) to 5 (expert) per action
pub const COMPLEXITY: &[(&str, u8)] = &[
    ("restart_modem", 1),
    ("power_cycle", 1),
    ("check_tv_input", 1),
    ("check_cables", 2),
    ("check_wifi_password", 2),
    ("restart_stb", 2),
    ("reset_network_settings", 3),
    ("rescan_channels", 3),
    ("configure_dns", 4),
    ("update_firmware", 4),
];

pub const DEFAULT_COMPLEXITY: u8 = 2;

/// (issue type, action, bonus): only the first matching row applies
pub const ISSUE_ADJUSTMENTS: &[(&str, &str, f64)] = &[
    ("internet_down", "restart_modem", 0.10),
    ("wifi_issues", "check_wifi_password", 0.15),
];

/// (sub-issue, actions, bonus): only the first matching row applies
pub const SUB_ISSUE_ADJUSTMENTS: &[(&str, &[&str], f64)] = &[
    ("modem_issue", &["restart_modem", "power_cycle"], 0.15),
    ("cable_issue", &["check_cables"], 0.20),
];

pub const LEARNING_RATE: f64 = 0.1;

/// Seconds of caller effort per complexity point
const SECONDS_PER_COMPLEXITY: f64 = 60.0;
/// Step duration at which the time score reaches zero
const TIME_BASELINE_SECS: f64 = 300.0;

/// Ranks candidate steps for one session
#[derive(Debug, Clone)]
pub struct StepPrioritizer {
    weights: PriorityWeights,
    success_rates: HashMap<String, f64>,
}

impl Default for StepPrioritizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepPrioritizer {
    pub fn new() -> Self {
        Self::with_weights(PriorityWeights::default())
    }

    pub fn with_weights(weights: PriorityWeights) -> Self {
        Self {
            weights,
            success_rates: SUCCESS_RATES
                .iter()
                .map(|&(action, rate)| (action.to_string(), rate))
                .collect(),
        }
    }

    /// Current learned success rate for an action
    pub fn success_rate(&self, action: &str) -> f64 {
        self.success_rates
            .get(action)
            .copied()
            .unwrap_or(DEFAULT_SUCCESS_RATE)
    }

    /// Success probability of `action` in the current context, in `[0, 1]`
    pub fn success_probability(&self, action: &str, issue_type: &str, sub_issues: &[String]) -> f64 {
        let mut rate = self.success_rate(action);

        if let Some(&(_, _, bonus)) = ISSUE_ADJUSTMENTS
            .iter()
            .find(|(issue, a, _)| *issue == issue_type && *a == action)
        {
            rate += bonus;
        }

        if let Some(&(_, _, bonus)) = SUB_ISSUE_ADJUSTMENTS
            .iter()
            .find(|(sub, actions, _)| sub_issues.iter().any(|s| s == sub) && actions.contains(&action))
        {
            rate += bonus;
        }

        rate.clamp(0.0, 1.0)
    }

    /// Priority of one step; `dependencies_met` feeds the binary term
    pub fn score(
        &self,
        step: &StepDefinition,
        issue_type: &str,
        sub_issues: &[String],
        profile: &CustomerTechnicalProfile,
        dependencies_met: bool,
    ) -> f64 {
        let action = step.action_key();
        let complexity = f64::from(complexity_of(step));
        let w = &self.weights;

        let success = self.success_probability(action, issue_type, sub_issues);
        let technical = technical_match(complexity, profile);
        let time = time_score(complexity, profile);
        let dependency = if dependencies_met { 1.0 } else { 0.0 };

        success * w.success_probability
            + (1.0 - complexity / 5.0) * w.complexity
            + technical * w.technical_match
            + time * w.estimated_time
            + dependency * w.dependencies
    }

    /// Rank `candidates`, highest first
    ///
    /// Completed steps and steps with unmet dependencies are left out.
    /// Equal scores keep candidate order.
    pub fn prioritize(
        &self,
        candidates: &[&StepDefinition],
        issue_type: &str,
        sub_issues: &[String],
        profile: &CustomerTechnicalProfile,
        completed: &HashSet<String>,
    ) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = candidates
            .iter()
            .filter(|step| !completed.contains(&step.id))
            .filter(|step| step.depends_on.iter().all(|d| completed.contains(d)))
            .map(|step| {
                (
                    step.id.clone(),
                    self.score(step, issue_type, sub_issues, profile, true),
                )
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (step_id, score) in ranked.iter().take(3) {
            tracing::debug!(issue_type, step_id = %step_id, score = format!("{:.3}", score), "Ranked step");
        }
        ranked
    }

    /// Fold one observed outcome into the action's success rate
    pub fn update_success_rate(&mut self, action: &str, success: bool) {
        let entry = self
            .success_rates
            .entry(action.to_string())
            .or_insert(DEFAULT_SUCCESS_RATE);
        let previous = *entry;
        let outcome = if success { 1.0 } else { 0.0 };
        *entry = (1.0 - LEARNING_RATE) * previous + LEARNING_RATE * outcome;

        tracing::debug!(
            action,
            previous = format!("{:.3}", previous),
            updated = format!("{:.3}", *entry),
            "Success rate updated"
        );
    }
}

/// Declared complexity, else the table value, else the default
pub fn complexity_of(step: &StepDefinition) -> u8 {
    step.complexity.unwrap_or_else(|| {
        COMPLEXITY
            .iter()
            .find(|(action, _)| *action == step.action_key())
            .map(|&(_, c)| c)
            .unwrap_or(DEFAULT_COMPLEXITY)
    })
}

fn technical_match(complexity: f64, profile: &CustomerTechnicalProfile) -> f64 {
    let difference = (complexity - f64::from(profile.technical_level)).abs();
    (1.0 - difference * 0.25).max(0.0)
}

fn time_score(complexity: f64, profile: &CustomerTechnicalProfile) -> f64 {
    let estimated_secs = SECONDS_PER_COMPLEXITY * complexity;
    let base = 1.0 - (estimated_secs / TIME_BASELINE_SECS).min(1.0);
    base * f64::from(profile.patience_level) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_agent_config::StepKind;

    fn action(id: &str) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            kind: StepKind::Action,
            prompt: format!("Please {}", id),
            action: None,
            complexity: None,
            depends_on: vec![],
            edges: vec![],
            default: None,
            resolves_on_success: false,
            routed_only: false,
            handoff_reason: None,
        }
    }

    #[test]
    fn test_context_adjustments() {
        let p = StepPrioritizer::new();
        let none: Vec<String> = vec![];
        assert!((p.success_probability("restart_modem", "slow_internet", &none) - 0.75).abs() < 1e-9);
        assert!((p.success_probability("restart_modem", "internet_down", &none) - 0.85).abs() < 1e-9);

        let modem = vec!["modem_issue".to_string()];
        assert!((p.success_probability("restart_modem", "internet_down", &modem) - 1.0).abs() < 1e-9);
        assert!((p.success_probability("power_cycle", "internet_down", &modem) - 0.85).abs() < 1e-9);

        let cable = vec!["cable_issue".to_string()];
        assert!((p.success_probability("check_cables", "internet_down", &cable) - 0.8).abs() < 1e-9);
        assert_eq!(p.success_probability("unknown_step", "tv_issues", &none), 0.5);
    }

    #[test]
    fn test_score_formula() {
        let p = StepPrioritizer::new();
        let profile = CustomerTechnicalProfile::default();
        // restart_modem, complexity 1, technical level 2, patience 3
        let score = p.score(&action("restart_modem"), "slow_internet", &[], &profile, true);
        let expected = 0.75 * 0.35 + 0.8 * 0.20 + 0.75 * 0.15 + 0.8 * 0.15 + 0.15;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_prioritize_excludes_completed_and_blocked() {
        let p = StepPrioritizer::new();
        let restart = action("restart_modem");
        let cables = action("check_cables");
        let mut power = action("power_cycle");
        power.depends_on = vec!["restart_modem".into()];

        let candidates = vec![&cables, &power, &restart];
        let profile = CustomerTechnicalProfile::default();

        let ranked = p.prioritize(&candidates, "internet_down", &[], &profile, &HashSet::new());
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["restart_modem", "check_cables"]);

        let completed: HashSet<String> = ["restart_modem".to_string()].into();
        let ranked = p.prioritize(&candidates, "internet_down", &[], &profile, &completed);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["power_cycle", "check_cables"]);
    }

    #[test]
    fn test_ema_update() {
        let mut p = StepPrioritizer::new();
        p.update_success_rate("restart_modem", false);
        assert!((p.success_rate("restart_modem") - 0.675).abs() < 1e-9);
        p.update_success_rate("new_action", true);
        assert!((p.success_rate("new_action") - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_declared_complexity_and_action_key() {
        let mut step = action("try_other_socket");
        step.action = Some("check_power".into());
        assert_eq!(complexity_of(&step), DEFAULT_COMPLEXITY);
        step.action = Some("rescan_channels".into());
        assert_eq!(complexity_of(&step), 3);
        step.complexity = Some(5);
        assert_eq!(complexity_of(&step), 5);
    }

    #[test]
    fn test_patience_scales_time_score() {
        let p = StepPrioritizer::new();
        let step = action("check_cables");
        let patient = CustomerTechnicalProfile {
            patience_level: 5,
            ..Default::default()
        };
        let impatient = CustomerTechnicalProfile {
            patience_level: 1,
            ..Default::default()
        };
        assert!(
            p.score(&step, "internet_down", &[], &patient, true)
                > p.score(&step, "internet_down", &[], &impatient, true)
        );
    }
}
