//! Troubleshooting decision trees
//!
//! Flows are loaded once at startup into an immutable [`FlowCatalog`].
//! Sessions hold a cursor (step id) into a shared `Arc<TroubleshootingFlow>`
//! and never mutate the tree.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::ConfigError;

/// Built-in catalog compiled into the binary
const BUILTIN_FLOWS: &str = include_str!("../../../config/flows.yaml");

/// Issue type used when a classification has no flow of its own
pub const FALLBACK_ISSUE_TYPE: &str = "internet_down";

/// What a step asks of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Gathers information; routed by its edges
    Question,
    /// A remedial action the caller performs
    Action,
    /// Hands the call to a human when reached
    Handoff,
}

/// Conditional route: taken when the caller's answer contains `when`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEdge {
    pub when: String,
    pub next: String,
}

/// One node of a decision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub kind: StepKind,
    pub prompt: String,

    /// Key into the prioritizer's success/complexity tables (defaults to `id`)
    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub complexity: Option<u8>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Ordered conditional edges; first match wins
    #[serde(default)]
    pub edges: Vec<StepEdge>,

    #[serde(default)]
    pub default: Option<String>,

    /// A success outcome on this step ends diagnosis as resolved
    #[serde(default)]
    pub resolves_on_success: bool,

    /// Only reachable through an explicit edge or override, never by ranking
    #[serde(default)]
    pub routed_only: bool,

    /// Escalation reason recorded when a handoff step is reached
    #[serde(default)]
    pub handoff_reason: Option<String>,
}

impl StepDefinition {
    pub fn action_key(&self) -> &str {
        self.action.as_deref().unwrap_or(&self.id)
    }

    /// Whether the step may be proposed by ranking
    pub fn is_rankable(&self) -> bool {
        self.kind == StepKind::Action && !self.routed_only
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FlowDefinition {
    issue_type: String,
    root_step: String,
    #[serde(default)]
    escalation_triggers: Vec<String>,
    #[serde(default)]
    sub_issues: Vec<String>,
    steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct FlowFile {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    flows: Vec<FlowDefinition>,
}

/// Decision tree for one issue type
#[derive(Debug, Clone)]
pub struct TroubleshootingFlow {
    issue_type: String,
    root_step: String,
    escalation_triggers: Vec<String>,
    sub_issues: Vec<String>,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
}

impl TroubleshootingFlow {
    fn from_definition(def: FlowDefinition) -> Result<Self, ConfigError> {
        let field = |suffix: &str| format!("flows.{}.{}", def.issue_type, suffix);

        let mut index = HashMap::with_capacity(def.steps.len());
        for (i, step) in def.steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(ConfigError::InvalidValue {
                    field: field("steps"),
                    message: format!("Duplicate step id '{}'", step.id),
                });
            }
        }

        if !index.contains_key(&def.root_step) {
            return Err(ConfigError::InvalidValue {
                field: field("root_step"),
                message: format!("Unknown root step '{}'", def.root_step),
            });
        }

        for step in &def.steps {
            let targets = step
                .edges
                .iter()
                .map(|e| &e.next)
                .chain(step.default.iter())
                .chain(step.depends_on.iter());
            for target in targets {
                if !index.contains_key(target) {
                    return Err(ConfigError::InvalidValue {
                        field: field(&format!("steps.{}", step.id)),
                        message: format!("References unknown step '{}'", target),
                    });
                }
            }
        }

        Ok(Self {
            issue_type: def.issue_type,
            root_step: def.root_step,
            escalation_triggers: def.escalation_triggers,
            sub_issues: def.sub_issues,
            steps: def.steps,
            index,
        })
    }

    pub fn issue_type(&self) -> &str {
        &self.issue_type
    }

    pub fn root_step(&self) -> &StepDefinition {
        // Validated at load time
        &self.steps[self.index[&self.root_step]]
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn escalation_triggers(&self) -> &[String] {
        &self.escalation_triggers
    }

    /// Sub-issues this flow knows how to handle
    pub fn sub_issues(&self) -> &[String] {
        &self.sub_issues
    }
}

/// Immutable issue type → flow table
#[derive(Debug, Clone, Default)]
pub struct FlowCatalog {
    flows: HashMap<String, Arc<TroubleshootingFlow>>,
}

impl FlowCatalog {
    /// Parse a catalog from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: FlowFile =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut flows = HashMap::new();
        let mut seen = HashSet::new();
        for def in file.flows {
            if !seen.insert(def.issue_type.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: "flows".to_string(),
                    message: format!("Duplicate flow for issue type '{}'", def.issue_type),
                });
            }
            let flow = TroubleshootingFlow::from_definition(def)?;
            flows.insert(flow.issue_type.clone(), Arc::new(flow));
        }

        if flows.is_empty() {
            return Err(ConfigError::MissingField("flows".to_string()));
        }

        Ok(Self { flows })
    }

    /// Load from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_yaml_str(&content)
    }

    /// The catalog compiled into the binary
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(BUILTIN_FLOWS)
    }

    /// Load the configured file, falling back to the built-in catalog when it
    /// is missing
    pub fn load_or_builtin(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if Path::new(p).exists() => {
                tracing::info!(path = %p, "Loading troubleshooting flows");
                Self::load(p)
            }
            Some(p) => {
                tracing::warn!(path = %p, "Flow file not found, using built-in flows");
                Self::builtin()
            }
            None => Self::builtin(),
        }
    }

    pub fn get(&self, issue_type: &str) -> Option<Arc<TroubleshootingFlow>> {
        self.flows.get(issue_type).cloned()
    }

    /// Flow for the issue type, or the fallback flow when none is defined
    pub fn get_or_fallback(&self, issue_type: &str) -> Option<Arc<TroubleshootingFlow>> {
        self.get(issue_type).or_else(|| {
            tracing::warn!(issue_type, "No flow for issue type, using fallback");
            self.get(FALLBACK_ISSUE_TYPE)
                .or_else(|| self.flows.values().next().cloned())
        })
    }

    pub fn issue_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.flows.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
flows:
  - issue_type: internet_down
    root_step: ask
    steps:
      - id: ask
        kind: question
        prompt: "Which lights are on?"
        edges:
          - when: red
            next: fix
        default: fix
      - id: fix
        kind: action
        action: restart_modem
        prompt: "Restart the modem."
        resolves_on_success: true
"#;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = FlowCatalog::builtin().unwrap();
        for issue in [
            "internet_down",
            "slow_internet",
            "wifi_issues",
            "tv_issues",
            "billing_issues",
            "hardware_issue",
        ] {
            assert!(catalog.get(issue).is_some(), "missing flow {}", issue);
        }
        let internet = catalog.get("internet_down").unwrap();
        assert!(internet.step("fiber_cut_detected").is_some());
    }

    #[test]
    fn test_parse_small_flow() {
        let catalog = FlowCatalog::from_yaml_str(SMALL).unwrap();
        let flow = catalog.get("internet_down").unwrap();
        assert_eq!(flow.root_step().id, "ask");
        let fix = flow.step("fix").unwrap();
        assert_eq!(fix.action_key(), "restart_modem");
        assert!(fix.is_rankable());
        assert!(!flow.root_step().is_rankable());
    }

    #[test]
    fn test_unknown_edge_target_rejected() {
        let yaml = SMALL.replace("next: fix", "next: missing");
        let err = FlowCatalog::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_fallback_flow() {
        let catalog = FlowCatalog::from_yaml_str(SMALL).unwrap();
        let flow = catalog.get_or_fallback("unknown_issue").unwrap();
        assert_eq!(flow.issue_type(), "internet_down");
    }

    #[test]
    fn test_load_or_builtin_missing_file() {
        let catalog = FlowCatalog::load_or_builtin(Some("/nonexistent/flows.yaml")).unwrap();
        assert!(catalog.len() >= 6);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.yaml");
        std::fs::write(&path, SMALL).unwrap();
        let catalog = FlowCatalog::load(&path).unwrap();
        assert_eq!(catalog.issue_types(), vec!["internet_down"]);
    }
}
