//! Issue classification
//!
//! Weighted keyword voting over the caller's utterance (plus the last few
//! utterances of history), preceded by a small table of override rules for
//! unambiguous high-urgency signatures. All tables are plain data so weights
//! can be tuned and tested in isolation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use call_agent_config::FALLBACK_ISSUE_TYPE;
use call_agent_core::ConversationEntry;

use crate::lexicon::PhraseSet;

/// Utterances of history folded into classification
pub const HISTORY_UTTERANCES: usize = 3;

/// Confidence attached to override matches
pub const OVERRIDE_CONFIDENCE: f64 = 0.99;

/// Confidence when no keyword matched
pub const BASELINE_CONFIDENCE: f64 = 0.5;

/// Issue categories: (issue type, vote weight, keywords), in tie-break order
pub const ISSUE_CATEGORIES: &[(&str, f64, &[&str])] = &[
    (
        "internet_down",
        1.0,
        &[
            "നെറ്റ് കിട്ടുന്നില്ല",
            "ഇന്റർനെറ്റ് ഇല്ല",
            "കണക്ഷൻ പോയി",
            "internet not working",
            "no connection",
            "no internet",
            "ഇന്റർനെറ്റ് പ്രവർത്തിക്കുന്നില്ല",
            "നെറ്റ് പോയി",
            "കണക്റ്റിവിറ്റി ഇല്ല",
            "offline",
            "disconnected",
            "red light",
            "ചുവന്ന ലൈറ്റ്",
            "റെഡ് ലൈറ്റ്",
            "los",
            "loss",
            "los light",
            "fiber cut",
            "ഫൈബർ കട്ട്",
            "fiber break",
            "ഫൈബർ ബ്രേക്ക്",
            "signal lost",
            "സിഗ്നൽ ഇല്ല",
        ],
    ),
    (
        "slow_internet",
        0.9,
        &[
            "വേഗത കുറവ്",
            "സ്ലോ",
            "പതുക്കെ",
            "slow",
            "buffering",
            "lagging",
            "speed",
            "മന്ദഗതി",
            "താമസം",
            "delay",
            "loading takes time",
            "ലോഡിംഗ് സമയമെടുക്കുന്നു",
            "വേഗത കുറഞ്ഞു",
        ],
    ),
    (
        "wifi_issues",
        0.8,
        &[
            "വൈഫൈ",
            "wifi",
            "wireless",
            "password",
            "പാസ്‌വേഡ്",
            "signal",
            "range",
            "സിഗ്നൽ",
            "റേഞ്ച്",
            "router",
            "റൗട്ടർ",
            "devices not connecting",
            "ഉപകരണങ്ങൾ കണക്റ്റ് ചെയ്യുന്നില്ല",
            "ssid",
            "network name",
            "നെറ്റ്‌വർക്ക് പേര്",
        ],
    ),
    (
        "tv_issues",
        0.7,
        &[
            "ടിവി",
            "ചാനൽ",
            "tv",
            "channel",
            "സെറ്റ് ടോപ് ബോക്സ്",
            "set top box",
            "screen",
            "display",
            "സ്ക്രീൻ",
            "ഡിസ്പ്ലേ",
            "remote",
            "റിമോട്ട്",
            "no signal",
            "സിഗ്നൽ ഇല്ല",
            "channels missing",
            "ചാനലുകൾ കാണുന്നില്ല",
        ],
    ),
    (
        "billing_issues",
        0.6,
        &[
            "ബിൽ",
            "bill",
            "payment",
            "പേയ്മെന്റ്",
            "recharge",
            "റീചാർജ്",
            "overcharged",
            "അധിക ചാർജ്",
            "due date",
            "തീയതി",
            "amount",
            "തുക",
            "plan",
            "പ്ലാൻ",
            "subscription",
            "സബ്സ്ക്രിപ്ഷൻ",
        ],
    ),
];

/// Sub-issues each category can carry
pub const SUB_ISSUES: &[(&str, &[&str])] = &[
    (
        "internet_down",
        &[
            "modem_issue",
            "cable_issue",
            "account_suspended",
            "area_outage",
            "fiber_cut",
        ],
    ),
    (
        "slow_internet",
        &[
            "peak_hours",
            "device_issue",
            "wifi_interference",
            "plan_limitation",
        ],
    ),
    (
        "wifi_issues",
        &[
            "password_forgotten",
            "range_issue",
            "device_compatibility",
            "router_configuration",
        ],
    ),
    (
        "tv_issues",
        &[
            "stb_issue",
            "channel_subscription",
            "signal_issue",
            "remote_issue",
        ],
    ),
    (
        "billing_issues",
        &[
            "payment_not_reflected",
            "wrong_amount",
            "plan_change",
            "discount_missing",
        ],
    ),
];

/// Phrases that reveal a sub-issue; sub-issues without indicators are never
/// detected lexically
pub const SUB_ISSUE_INDICATORS: &[(&str, &[&str])] = &[
    (
        "modem_issue",
        &[
            "light",
            "blinking",
            "ലൈറ്റ്",
            "മിന്നുന്നു",
            "power",
            "പവർ",
            "restart",
            "റീസ്റ്റാർട്ട്",
        ],
    ),
    (
        "cable_issue",
        &[
            "cable",
            "കേബിൾ",
            "wire",
            "വയർ",
            "cut",
            "മുറിച്ചു",
            "damaged",
            "കേടായി",
            "loose",
            "അയഞ്ഞു",
        ],
    ),
    (
        "fiber_cut",
        &[
            "red light",
            "ചുവന്ന ലൈറ്റ്",
            "റെഡ് ലൈറ്റ്",
            "los",
            "loss",
            "los light",
            "fiber cut",
            "ഫൈബർ കട്ട്",
            "fiber break",
            "ഫൈബർ ബ്രേക്ക്",
            "signal lost",
            "സിഗ്നൽ ഇല്ല",
        ],
    ),
    (
        "area_outage",
        &[
            "area",
            "പ്രദേശം",
            "neighborhood",
            "അയൽപക്കം",
            "everyone",
            "എല്ലാവർക്കും",
            "outage",
            "തകരാർ",
        ],
    ),
    (
        "peak_hours",
        &[
            "evening",
            "വൈകുന്നേരം",
            "night",
            "രാത്രി",
            "busy",
            "തിരക്ക്",
            "specific time",
            "പ്രത്യേക സമയം",
        ],
    ),
    (
        "wifi_interference",
        &[
            "walls",
            "ചുമരുകൾ",
            "distance",
            "ദൂരം",
            "devices",
            "ഉപകരണങ്ങൾ",
            "microwave",
            "മൈക്രോവേവ്",
        ],
    ),
];

/// Technical vocabulary surfaced as `has_<term>` flags
pub const TECHNICAL_TERMS: &[&str] = &[
    "modem",
    "router",
    "fiber",
    "ethernet",
    "wireless",
    "ip address",
    "dns",
    "gateway",
    "bandwidth",
    "signal",
    "മോഡം",
    "റൗട്ടർ",
    "ഫൈബർ",
    "എതർനെറ്റ്",
    "വയർലെസ്",
];

/// A short-circuit rule: any phrase match fixes the classification
#[derive(Debug, Clone, Copy)]
pub struct OverrideRule {
    pub name: &'static str,
    pub phrases: &'static [&'static str],
    pub issue_type: &'static str,
    pub sub_issue: &'static str,
    pub flags: &'static [&'static str],
    /// Flow step entered directly instead of the flow's root
    pub entry_step: Option<&'static str>,
}

/// Evaluated in order; the first matching rule wins
pub const OVERRIDE_RULES: &[OverrideRule] = &[
    OverrideRule {
        name: "no_power",
        phrases: &[
            "no light",
            "no power",
            "ലൈറ്റ് ഇല്ല",
            "ലൈറ്റ് വരുന്നില്ല",
            "പവർ ഇല്ല",
            "ഓൺ ആകുന്നില്ല",
            "not turning on",
            "won't turn on",
            "dead",
            "adapter",
            "അഡാപ്റ്റർ",
        ],
        issue_type: "hardware_issue",
        sub_issue: "adapter_issue",
        flags: &[
            "is_power_issue",
            "needs_technician",
            "adapter_problem",
            "technician_needs_adapter",
        ],
        entry_step: None,
    },
    OverrideRule {
        name: "red_light",
        phrases: &[
            "red light",
            "ചുവന്ന ലൈറ്റ്",
            "റെഡ് ലൈറ്റ്",
            "los",
            "loss",
            "los light",
            "red",
            "ചുവന്ന",
            "ചുവപ്പ്",
        ],
        issue_type: "internet_down",
        sub_issue: "fiber_cut",
        flags: &[
            "is_red_light",
            "needs_technician",
            "urgent",
            "restart_first",
            "skip_further_troubleshooting",
        ],
        entry_step: Some("fiber_cut_detected"),
    },
];

/// Metadata flag that sends the session straight to escalation after the
/// override's entry step
pub const SKIP_FURTHER_TROUBLESHOOTING: &str = "skip_further_troubleshooting";

static SPEED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(mbps|kbps|gbps)").unwrap());

static ERROR_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)error\s+code\s*:?\s*([a-z0-9\-]+)").unwrap());

/// A connection speed the caller mentioned ("I only get 2 mbps")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionedSpeed {
    pub value: u64,
    pub unit: String,
}

/// Everything the classifier noticed besides the winning category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetadata {
    /// `has_<term>` technical flags and override flags
    pub flags: BTreeSet<String>,
    pub mentioned_speed: Option<MentionedSpeed>,
    pub error_code: Option<String>,
    /// Weighted vote per category (empty when an override fired)
    pub scores: BTreeMap<String, f64>,
    pub override_rule: Option<String>,
    pub entry_step: Option<String>,
}

impl ClassificationMetadata {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// Result of [`IssueClassifier::classify`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub issue_type: String,
    /// In `[0.5, 1.0]`
    pub confidence: f64,
    pub sub_issues: Vec<String>,
    pub metadata: ClassificationMetadata,
}

impl Classification {
    /// Whether diagnosis should stop after the entry step
    pub fn skips_troubleshooting(&self) -> bool {
        self.metadata.has_flag(SKIP_FURTHER_TROUBLESHOOTING)
    }
}

struct CompiledCategory {
    issue_type: &'static str,
    weight: f64,
    keywords: PhraseSet,
}

struct CompiledOverride {
    rule: OverrideRule,
    phrases: PhraseSet,
}

/// Weighted keyword classifier with override rules
pub struct IssueClassifier {
    categories: Vec<CompiledCategory>,
    overrides: Vec<CompiledOverride>,
    sub_issue_indicators: BTreeMap<&'static str, PhraseSet>,
    technical_terms: Vec<(&'static str, PhraseSet)>,
}

impl Default for IssueClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueClassifier {
    pub fn new() -> Self {
        let categories = ISSUE_CATEGORIES
            .iter()
            .map(|&(issue_type, weight, keywords)| CompiledCategory {
                issue_type,
                weight,
                keywords: PhraseSet::new(keywords.iter().copied()),
            })
            .collect();

        let overrides = OVERRIDE_RULES
            .iter()
            .map(|rule| CompiledOverride {
                rule: *rule,
                phrases: PhraseSet::new(rule.phrases.iter().copied()),
            })
            .collect();

        let sub_issue_indicators = SUB_ISSUE_INDICATORS
            .iter()
            .map(|&(sub, phrases)| (sub, PhraseSet::new(phrases.iter().copied())))
            .collect();

        let technical_terms = TECHNICAL_TERMS
            .iter()
            .map(|&term| (term, PhraseSet::new([term])))
            .collect();

        Self {
            categories,
            overrides,
            sub_issue_indicators,
            technical_terms,
        }
    }

    /// Classify `text` in the light of the caller's recent utterances
    pub fn classify(&self, text: &str, recent_history: &[ConversationEntry]) -> Classification {
        let analyzed = analysis_text(text, recent_history);

        if let Some(classification) = self.apply_overrides(&analyzed) {
            return classification;
        }

        let scores = self.score(&analyzed);

        let mut best: Option<(&str, f64)> = None;
        for category in &self.categories {
            let score = scores.get(category.issue_type).copied().unwrap_or(0.0);
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((category.issue_type, score));
            }
        }

        let total: f64 = scores.values().sum();
        let (issue_type, confidence) = match best {
            Some((issue, score)) if total > 0.0 => (issue, 0.5 + 0.5 * (score / total)),
            _ => (FALLBACK_ISSUE_TYPE, BASELINE_CONFIDENCE),
        };

        let sub_issues = self.detect_sub_issues(&analyzed, issue_type);
        let mut metadata = self.technical_context(&analyzed);
        metadata.scores = scores;

        tracing::info!(
            issue_type,
            confidence = format!("{:.2}", confidence),
            sub_issues = ?sub_issues,
            "Issue classified"
        );

        Classification {
            issue_type: issue_type.to_string(),
            confidence,
            sub_issues,
            metadata,
        }
    }

    /// Weighted vote per category
    pub fn score(&self, text: &str) -> BTreeMap<String, f64> {
        self.categories
            .iter()
            .map(|c| {
                let matches = c.keywords.count(text) as f64;
                (c.issue_type.to_string(), matches * c.weight)
            })
            .collect()
    }

    /// Sub-issues of `issue_type` whose indicators appear in `text`
    pub fn detect_sub_issues(&self, text: &str, issue_type: &str) -> Vec<String> {
        let Some((_, candidates)) = SUB_ISSUES.iter().find(|(issue, _)| *issue == issue_type)
        else {
            return Vec::new();
        };

        candidates
            .iter()
            .filter(|sub| {
                self.sub_issue_indicators
                    .get(*sub)
                    .map(|set| set.is_match(text))
                    .unwrap_or(false)
            })
            .map(|sub| sub.to_string())
            .collect()
    }

    fn apply_overrides(&self, text: &str) -> Option<Classification> {
        let matched = self.overrides.iter().find(|o| o.phrases.is_match(text))?;
        let rule = matched.rule;

        tracing::info!(
            rule = rule.name,
            issue_type = rule.issue_type,
            sub_issue = rule.sub_issue,
            "Override rule matched"
        );

        let mut metadata = self.technical_context(text);
        metadata
            .flags
            .extend(rule.flags.iter().map(|f| f.to_string()));
        metadata.override_rule = Some(rule.name.to_string());
        metadata.entry_step = rule.entry_step.map(str::to_string);

        Some(Classification {
            issue_type: rule.issue_type.to_string(),
            confidence: OVERRIDE_CONFIDENCE,
            sub_issues: vec![rule.sub_issue.to_string()],
            metadata,
        })
    }

    fn technical_context(&self, text: &str) -> ClassificationMetadata {
        let mut metadata = ClassificationMetadata::default();

        for (term, set) in &self.technical_terms {
            if set.is_match(text) {
                metadata
                    .flags
                    .insert(format!("has_{}", term.replace(' ', "_")));
            }
        }

        if let Some(caps) = SPEED_PATTERN.captures(text) {
            if let Ok(value) = caps[1].parse() {
                metadata.mentioned_speed = Some(MentionedSpeed {
                    value,
                    unit: caps[2].to_lowercase(),
                });
            }
        }

        if let Some(caps) = ERROR_CODE_PATTERN.captures(text) {
            metadata.error_code = Some(caps[1].to_lowercase());
        }

        metadata
    }
}

/// Current utterance followed by the last few user utterances, lowercased
fn analysis_text(text: &str, recent_history: &[ConversationEntry]) -> String {
    let mut analyzed = text.to_lowercase();
    let start = recent_history.len().saturating_sub(HISTORY_UTTERANCES);
    for entry in &recent_history[start..] {
        if !entry.user.trim().is_empty() {
            analyzed.push(' ');
            analyzed.push_str(&entry.user.to_lowercase());
        }
    }
    analyzed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        IssueClassifier::new().classify(text, &[])
    }

    #[test]
    fn test_no_keywords_defaults_to_baseline() {
        let c = classify("hello, good morning");
        assert_eq!(c.issue_type, "internet_down");
        assert_eq!(c.confidence, 0.5);
        assert!(c.sub_issues.is_empty());
        assert!(c.metadata.override_rule.is_none());
    }

    #[test]
    fn test_slow_internet_wins() {
        let c = classify("the internet is very slow and keeps buffering in the evening");
        assert_eq!(c.issue_type, "slow_internet");
        assert!(c.confidence > 0.5 && c.confidence <= 1.0);
        assert_eq!(c.sub_issues, vec!["peak_hours"]);
        assert_eq!(c.metadata.scores["slow_internet"], 1.8);
    }

    #[test]
    fn test_confidence_share_of_total() {
        // slow (0.9) against wifi (0.8)
        let c = classify("wifi is slow");
        assert_eq!(c.issue_type, "slow_internet");
        let expected = 0.5 + 0.5 * (0.9 / 1.7);
        assert!((c.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn test_no_power_override_comes_first() {
        let c = classify("the modem is dead, there is no light and also a red cable");
        assert_eq!(c.issue_type, "hardware_issue");
        assert_eq!(c.confidence, OVERRIDE_CONFIDENCE);
        assert_eq!(c.sub_issues, vec!["adapter_issue"]);
        assert!(c.metadata.has_flag("needs_technician"));
        assert!(c.metadata.has_flag("has_modem"));
        assert!(!c.skips_troubleshooting());
    }

    #[test]
    fn test_red_light_override() {
        let c = classify("there is a red light blinking on the box");
        assert_eq!(c.issue_type, "internet_down");
        assert_eq!(c.sub_issues, vec!["fiber_cut"]);
        assert!(c.skips_troubleshooting());
        assert_eq!(c.metadata.entry_step.as_deref(), Some("fiber_cut_detected"));
        assert!(c.metadata.scores.is_empty());
    }

    #[test]
    fn test_malayalam_red_light() {
        let c = classify("മോഡത്തിൽ ചുവന്ന ലൈറ്റ് കാണുന്നു");
        assert_eq!(c.metadata.override_rule.as_deref(), Some("red_light"));
    }

    #[test]
    fn test_override_ignores_embedded_words() {
        // "tired" and "closed" must not trip the red/los rule
        let c = classify("I am tired, the shop closed and internet not working");
        assert!(c.metadata.override_rule.is_none());
        assert_eq!(c.issue_type, "internet_down");
    }

    #[test]
    fn test_history_contributes() {
        let history = vec![
            ConversationEntry::new("my tv shows nothing"),
            ConversationEntry::new("channels missing since morning"),
        ];
        let c = IssueClassifier::new().classify("please help", &history);
        assert_eq!(c.issue_type, "tv_issues");
    }

    #[test]
    fn test_only_last_three_history_entries() {
        let mut history = vec![ConversationEntry::new("the bill amount is wrong")];
        for _ in 0..3 {
            history.push(ConversationEntry::new("okay"));
        }
        let c = IssueClassifier::new().classify("hmm", &history);
        assert_eq!(c.confidence, BASELINE_CONFIDENCE);
    }

    #[test]
    fn test_metadata_extraction() {
        let c = classify("speed is only 2 Mbps on the router, error code: E-104");
        assert_eq!(
            c.metadata.mentioned_speed,
            Some(MentionedSpeed {
                value: 2,
                unit: "mbps".into()
            })
        );
        assert_eq!(c.metadata.error_code.as_deref(), Some("e-104"));
        assert!(c.metadata.has_flag("has_router"));
    }

    #[test]
    fn test_tie_breaks_in_table_order() {
        let classifier = IssueClassifier::new();
        let scores = classifier.score("plan");
        assert_eq!(scores["billing_issues"], 0.6);
        assert_eq!(classifier.detect_sub_issues("cable is loose", "internet_down"), vec!["cable_issue"]);
        assert!(classifier.detect_sub_issues("anything", "unknown").is_empty());
    }
}
