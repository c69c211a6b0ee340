pub mod case_state;
pub mod config;
pub mod status;
pub mod transition;
pub mod workflow;

pub use case_state::{
    CaseMetadata, CaseState, LandmarkState, LandmarkStatus, PhaseHistoryEntry, SCHEMA_VERSION,
};
pub use config::{
    AutomationConfig, CasetrackConfig, FactSourceConfig, FactSourceKind, MutationTemplates,
    VerificationConfig,
};
pub use status::{Blocker, Correction, CorrectionKind, NextAction, StatusReport};
pub use transition::TransitionRecord;
pub use workflow::{
    BlockerKind, LandmarkDefinition, Owner, PhaseDefinition, TransitionRule, WorkflowDefinition,
};
