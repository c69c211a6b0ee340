//! Error taxonomy for the workflow engine
//!
//! Application entry points (CLI) work with `anyhow::Result`; the engine
//! itself returns [`WorkflowError`] so callers can match on the cases they
//! know how to recover from (missing state, blocked transitions).

use crate::models::Blocker;

/// Result type for engine operations
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("No state found for case '{case_id}'. Run 'casetrack init {case_id}' first.")]
    NotFound { case_id: String },

    #[error("Case '{0}' already has a state document")]
    AlreadyExists(String),

    #[error(
        "Cannot advance '{case_id}' from {from} to {to}: {} hard blocker(s) unresolved ({})",
        .blockers.len(),
        blocker_ids(.blockers)
    )]
    BlockedTransition {
        case_id: String,
        from: String,
        to: String,
        blockers: Vec<Blocker>,
    },

    #[error("Transition from {from} to {to} is not allowed: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown landmark: {0}")]
    UnknownLandmark(String),

    #[error("Invalid case id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidCaseId(String),

    #[error("Malformed state for case '{case_id}': {reason}")]
    MalformedState { case_id: String, reason: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl WorkflowError {
    /// True when the caller can recover by initialising the case
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowError::NotFound { .. })
    }
}

fn blocker_ids(blockers: &[Blocker]) -> String {
    blockers
        .iter()
        .map(|b| b.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
