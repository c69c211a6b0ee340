//! Automation tool reachability
//!
//! Landmarks may name a tool that can do the work. A tool only counts as
//! available when the deployment lists it; the engine never probes tools.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    available: BTreeSet<String>,
}

impl ToolCatalog {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: tools
                .into_iter()
                .map(Into::into)
                .map(|t: String| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_available(&self, tool: &str) -> bool {
        self.available.contains(tool)
    }

    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.available.iter().map(String::as_str)
    }
}
