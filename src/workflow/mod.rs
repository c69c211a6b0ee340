//! Case lifecycle state machine
//!
//! - `status`: synchronise stored state and derive the status report
//! - `transition`: phase advancement rules and commit
//! - `format`: text rendering of a report
//! - `engine`: per-case orchestration over the state store

pub mod engine;
pub mod format;
pub mod status;
pub mod transition;

pub use engine::{CaseInit, LandmarkUpdate, WorkflowEngine};
pub use format::format_report;
pub use status::StatusComputer;
pub use transition::PhaseTransitionController;
