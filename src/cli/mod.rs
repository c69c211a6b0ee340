//! Command implementations for the `casetrack` binary

pub mod advance;
pub mod init;
pub mod landmark;
pub mod list;
pub mod phases;
pub mod status;
pub mod verify;

use crate::models::CasetrackConfig;
use crate::workflow::WorkflowEngine;
use crate::Result;
use std::path::{Path, PathBuf};

/// Project root: `--root` when given, otherwise the current directory
pub fn project_root(root: Option<&Path>) -> Result<PathBuf> {
    match root {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}

/// Build the engine from `casetrack/config.toml` under the project root
pub fn load_engine(project_root: &Path) -> Result<WorkflowEngine> {
    let config = CasetrackConfig::load(project_root)?;
    WorkflowEngine::from_config(&config, project_root)
}
