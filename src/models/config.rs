//! Project configuration (`casetrack/config.toml`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH: &str = "casetrack/config.toml";

/// Verification limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Per-query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum verification queries in flight for one case
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl VerificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Budget for a whole pass over `landmarks` queries
    pub fn overall_timeout(&self, landmarks: usize) -> Duration {
        let waves = landmarks.div_ceil(self.concurrency()).max(1) as u32;
        // One extra wave of slack for scheduling
        self.timeout() * (waves + 1)
    }
}

/// Which fact source backs verification
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FactSourceKind {
    /// No fact source; nothing ever auto-verifies
    #[default]
    None,
    /// JSON fixture file read into memory
    Fixture,
    /// HTTP query endpoint (feature `http-facts`)
    Http,
}

/// Mutation templates mirrored to the fact source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationTemplates {
    /// Bound with `$case_id`, `$landmark_id`, `$status`
    #[serde(default)]
    pub set_landmark_status: Option<String>,

    /// Bound with `$case_id`, `$phase`, `$previous_phase`
    #[serde(default)]
    pub set_phase: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactSourceConfig {
    #[serde(default)]
    pub kind: FactSourceKind,

    /// Fixture path, relative to the project root
    #[serde(default)]
    pub fixture: Option<PathBuf>,

    /// Query endpoint for `kind = "http"`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub templates: MutationTemplates,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Tool ids reachable from this deployment
    #[serde(default)]
    pub available_tools: Vec<String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasetrackConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Where case state documents live, relative to the project root
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Workflow YAML; the built-in lifecycle is used when unset
    #[serde(default)]
    pub workflow_file: Option<PathBuf>,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub fact_source: FactSourceConfig,

    #[serde(default)]
    pub automation: AutomationConfig,
}

fn default_project_name() -> String {
    "Case Workflow".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("casetrack/cases")
}

impl Default for CasetrackConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            state_dir: default_state_dir(),
            workflow_file: None,
            verification: VerificationConfig::default(),
            fact_source: FactSourceConfig::default(),
            automation: AutomationConfig::default(),
        }
    }
}

impl CasetrackConfig {
    /// Load config from casetrack/config.toml
    pub fn load(project_root: &Path) -> anyhow::Result<Self> {
        let config_path = project_root.join(CONFIG_PATH);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: CasetrackConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to casetrack/config.toml
    pub fn save(&self, project_root: &Path) -> anyhow::Result<()> {
        let config_path = project_root.join(CONFIG_PATH);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn state_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.state_dir)
    }

    pub fn workflow_path(&self, project_root: &Path) -> Option<PathBuf> {
        self.workflow_file.as_ref().map(|p| project_root.join(p))
    }
}
