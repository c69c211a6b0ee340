//! Phase and landmark definitions
//!
//! The workflow is static configuration: an ordered list of phases, each
//! owning its landmarks, plus the non-linear transitions that are allowed on
//! top of the linear ordering. It is loaded once at startup (embedded default
//! or a YAML file named in `casetrack/config.toml`) and never mutated.

use crate::error::{WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_WORKFLOW: &str = include_str!("../../templates/workflow.yaml");

/// Whether an incomplete landmark stops the case from leaving its phase
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BlockerKind {
    /// Must be resolved (or force-overridden) before advancing
    #[default]
    Hard,
    /// Informational only
    Soft,
}

impl BlockerKind {
    pub fn is_hard(&self) -> bool {
        matches!(self, BlockerKind::Hard)
    }
}

/// Who is responsible for moving a landmark forward
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    #[default]
    Internal,
    External,
}

impl Owner {
    pub fn label(&self) -> &'static str {
        match self {
            Owner::Internal => "internal",
            Owner::External => "external",
        }
    }
}

/// A named checkpoint inside a phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LandmarkDefinition {
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    /// What has to happen for this landmark to be done
    #[serde(default)]
    pub description: String,

    /// Whether the fact source can confirm this landmark
    #[serde(default)]
    pub auto_verify: bool,

    /// Query returning a single boolean row; `$case_id` is bound at run time
    #[serde(default)]
    pub verify_query: Option<String>,

    #[serde(default)]
    pub blocker: BlockerKind,

    #[serde(default)]
    pub owner: Owner,

    /// Party being waited on, e.g. "client" or "insurance adjuster"
    #[serde(default)]
    pub waiting_on: Option<String>,

    /// Automation tool that can perform this landmark
    #[serde(default)]
    pub tool: Option<String>,

    #[serde(default)]
    pub manual_fallback: Option<String>,

    /// Named sub-steps tracked as booleans on the landmark status
    #[serde(default)]
    pub sub_steps: Vec<String>,
}

impl LandmarkDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Auto-verifiable and carrying a query to run
    pub fn verification_query(&self) -> Option<&str> {
        if !self.auto_verify {
            return None;
        }
        self.verify_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// Purpose text used for blockers and next actions
    pub fn purpose(&self) -> &str {
        if self.description.trim().is_empty() {
            self.display_name()
        } else {
            self.description.trim()
        }
    }

    /// Manual fallback, generated from the purpose when not configured
    pub fn fallback_text(&self) -> String {
        match &self.manual_fallback {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => match (&self.owner, &self.waiting_on) {
                (Owner::External, Some(party)) => {
                    format!("Follow up with {} and record: {}", party, self.purpose())
                }
                _ => format!("Complete manually and mark '{}' complete: {}", self.id, self.purpose()),
            },
        }
    }
}

/// An ordered stage of the case lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseDefinition {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub landmarks: Vec<LandmarkDefinition>,
}

impl PhaseDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn landmark(&self, id: &str) -> Option<&LandmarkDefinition> {
        self.landmarks.iter().find(|l| l.id == id)
    }
}

/// An allowed jump outside the linear phase ordering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Full workflow: phase ordering, landmarks and extra transitions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    #[serde(default = "default_version")]
    pub version: String,

    pub phases: Vec<PhaseDefinition>,

    #[serde(default)]
    pub transitions: Vec<TransitionRule>,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    /// The workflow shipped with the binary
    pub fn builtin() -> WorkflowResult<Self> {
        Self::from_yaml(DEFAULT_WORKFLOW)
    }

    pub fn from_yaml(content: &str) -> WorkflowResult<Self> {
        let workflow: WorkflowDefinition = serde_yaml::from_str(content)
            .map_err(|e| WorkflowError::InvalidWorkflow(e.to_string()))?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Load from a YAML file
    pub fn load(path: &Path) -> WorkflowResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Structural checks: ordering must be unambiguous and ids unique
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.phases.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(
                "workflow defines no phases".to_string(),
            ));
        }

        let mut phase_ids = HashSet::new();
        let mut landmark_ids = HashSet::new();
        for phase in &self.phases {
            if phase.id.trim().is_empty() {
                return Err(WorkflowError::InvalidWorkflow("phase with empty id".to_string()));
            }
            if !phase_ids.insert(phase.id.as_str()) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "duplicate phase id '{}'",
                    phase.id
                )));
            }
            for landmark in &phase.landmarks {
                if !landmark_ids.insert(landmark.id.as_str()) {
                    return Err(WorkflowError::InvalidWorkflow(format!(
                        "duplicate landmark id '{}'",
                        landmark.id
                    )));
                }
                if landmark.auto_verify && landmark.verification_query().is_none() {
                    tracing::warn!(
                        landmark = %landmark.id,
                        "landmark is auto_verify but has no verify_query; it will never verify"
                    );
                }
            }
        }

        for rule in &self.transitions {
            for id in [&rule.from, &rule.to] {
                if !phase_ids.contains(id.as_str()) {
                    return Err(WorkflowError::InvalidWorkflow(format!(
                        "transition references unknown phase '{}'",
                        id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn first_phase(&self) -> &PhaseDefinition {
        // validate() guarantees at least one phase
        &self.phases[0]
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phase_index(&self, id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.id == id)
    }

    pub fn next_phase(&self, id: &str) -> Option<&PhaseDefinition> {
        self.phase_index(id).and_then(|i| self.phases.get(i + 1))
    }

    /// Find a landmark in any phase, with the phase that owns it
    pub fn landmark(&self, id: &str) -> Option<(&PhaseDefinition, &LandmarkDefinition)> {
        self.phases
            .iter()
            .find_map(|p| p.landmark(id).map(|l| (p, l)))
    }

    /// Explicit non-linear rule for `from -> to`, if any
    pub fn transition_rule(&self, from: &str, to: &str) -> Option<&TransitionRule> {
        self.transitions.iter().find(|r| r.from == from && r.to == to)
    }

    /// Linear successor or explicitly allowed jump
    pub fn is_transition_allowed(&self, from: &str, to: &str) -> bool {
        self.next_phase(from).is_some_and(|p| p.id == to) || self.transition_rule(from, to).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
phases:
  - id: setup
    landmarks:
      - id: retainer_signed
        description: Signed retainer on file
      - id: claim_opened
        auto_verify: true
        verify_query: "RETURN true AS verified"
        blocker: soft
  - id: active_work
  - id: closed
transitions:
  - from: closed
    to: setup
"#;

    #[test]
    fn test_builtin_workflow_is_valid() {
        let workflow = WorkflowDefinition::builtin().unwrap();
        assert_eq!(workflow.first_phase().id, "setup");
        assert_eq!(workflow.phases.last().unwrap().id, "closed");
        assert!(workflow.phases.len() >= 8);
    }

    #[test]
    fn test_defaults_applied() {
        let workflow = WorkflowDefinition::from_yaml(SMALL).unwrap();
        let setup = workflow.phase("setup").unwrap();
        let retainer = setup.landmark("retainer_signed").unwrap();
        assert_eq!(retainer.blocker, BlockerKind::Hard);
        assert_eq!(retainer.owner, Owner::Internal);
        assert!(retainer.verification_query().is_none());

        let claim = setup.landmark("claim_opened").unwrap();
        assert_eq!(claim.blocker, BlockerKind::Soft);
        assert_eq!(claim.verification_query(), Some("RETURN true AS verified"));
    }

    #[test]
    fn test_transition_rules() {
        let workflow = WorkflowDefinition::from_yaml(SMALL).unwrap();
        assert!(workflow.is_transition_allowed("setup", "active_work"));
        assert!(workflow.is_transition_allowed("closed", "setup"));
        assert!(!workflow.is_transition_allowed("setup", "closed"));
        assert!(!workflow.is_transition_allowed("active_work", "setup"));
        assert!(workflow.next_phase("closed").is_none());
    }

    #[test]
    fn test_rejects_duplicate_landmarks() {
        let yaml = r#"
phases:
  - id: a
    landmarks: [{ id: x }]
  - id: b
    landmarks: [{ id: x }]
"#;
        let err = WorkflowDefinition::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate landmark id 'x'"));
    }

    #[test]
    fn test_rejects_unknown_transition_phase() {
        let yaml = r#"
phases:
  - id: a
transitions:
  - { from: a, to: nowhere }
"#;
        assert!(WorkflowDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_empty_workflow() {
        assert!(WorkflowDefinition::from_yaml("phases: []").is_err());
    }

    #[test]
    fn test_fallback_text() {
        let workflow = WorkflowDefinition::from_yaml(SMALL).unwrap();
        let (phase, landmark) = workflow.landmark("retainer_signed").unwrap();
        assert_eq!(phase.id, "setup");
        assert!(landmark.fallback_text().contains("Signed retainer on file"));
    }
}
