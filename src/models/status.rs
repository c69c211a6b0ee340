//! Derived, never-persisted status types
//!
//! Everything here is plain data (strings, numbers, booleans and lists of
//! simple records) so a [`StatusReport`] can be handed across a process
//! boundary as JSON.

use super::workflow::{BlockerKind, Owner};
use serde::{Deserialize, Serialize};

/// Something that stands between the case and its next phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blocker {
    /// Landmark id
    pub id: String,
    pub description: String,
    pub owner: Owner,
    /// Party being waited on, when owned externally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_on: Option<String>,
    pub kind: BlockerKind,
}

impl Blocker {
    pub fn is_hard(&self) -> bool {
        self.kind.is_hard()
    }
}

/// What should happen next for an incomplete landmark
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextAction {
    pub description: String,
    pub owner: Owner,
    /// Phase the action belongs to
    pub workflow: String,
    /// Landmark the action completes
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Declared tool that is reachable right now
    pub can_automate: bool,
    pub tool_available: bool,
    pub manual_fallback: String,
}

/// Kind of automatic repair applied during a status pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Current phase missing or not configured; reset to the first phase
    PhaseReset,
    /// Landmark had no status entry; seeded as not_started
    LandmarkSeeded,
    /// Fact source confirmed the landmark; marked complete
    AutoVerified,
    /// A malformed field was defaulted while decoding the document
    FieldRepaired,
}

/// One automatic repair, reported so callers can audit it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Correction {
    pub kind: CorrectionKind,
    /// Field, phase or landmark the repair touched
    pub subject: String,
    pub detail: String,
}

impl Correction {
    pub fn new(kind: CorrectionKind, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

/// Snapshot of where a case stands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub case_id: String,
    /// Client display name (falls back to the case id)
    pub client_name: String,
    pub phase: String,
    pub phase_name: String,
    /// Next phase in the linear ordering, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_phase: Option<String>,
    /// Completed landmarks of the current phase, 0..=100
    pub progress_percent: u8,
    pub landmarks_total: usize,
    /// Landmark ids that are complete or not applicable
    pub completed: Vec<String>,
    pub blockers: Vec<Blocker>,
    pub next_actions: Vec<NextAction>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
}

impl StatusReport {
    pub fn hard_blockers(&self) -> impl Iterator<Item = &Blocker> {
        self.blockers.iter().filter(|b| b.is_hard())
    }

    pub fn can_advance(&self) -> bool {
        self.hard_blockers().next().is_none()
    }

    pub fn has_corrections(&self) -> bool {
        !self.corrections.is_empty()
    }
}

/// Percentage of `completed` over `total`, 100 for an empty phase
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = completed.min(total) * 100 / total;
    pct as u8
}
