// Casetrack - Case Lifecycle Workflow Engine
// Tracks phases, landmarks and blockers for legal matters and works out what to do next

pub mod automation;
pub mod cli;
pub mod error;
pub mod facts;
pub mod models;
pub mod state;
pub mod verify;
pub mod workflow;

pub use anyhow::{Context, Result};
pub use colored::Colorize;

// Re-export commonly used types
pub use error::{WorkflowError, WorkflowResult};
pub use models::{CaseState, LandmarkState, StatusReport, TransitionRecord, WorkflowDefinition};
pub use state::StateStore;
pub use workflow::{format_report, WorkflowEngine};
