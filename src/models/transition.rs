//! Phase transition audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a committed phase advance, kept in the case's audit log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionRecord {
    /// Unique identifier (UUID v4)
    pub id: String,

    pub case_id: String,

    pub from_phase: String,

    pub to_phase: String,

    /// Whether `force` was passed
    #[serde(default)]
    pub forced: bool,

    /// Hard blockers that were overridden by `force`
    #[serde(default)]
    pub overridden_blockers: Vec<String>,

    /// Soft blockers still open at transition time
    #[serde(default)]
    pub open_soft_blockers: Vec<String>,

    /// Why a non-linear transition was allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(
        case_id: impl Into<String>,
        from_phase: impl Into<String>,
        to_phase: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            case_id: case_id.into(),
            from_phase: from_phase.into(),
            to_phase: to_phase.into(),
            forced: false,
            overridden_blockers: Vec::new(),
            open_soft_blockers: Vec::new(),
            rule: None,
            at,
        }
    }

    /// True when hard blockers were skipped
    pub fn was_overridden(&self) -> bool {
        self.forced && !self.overridden_blockers.is_empty()
    }
}
