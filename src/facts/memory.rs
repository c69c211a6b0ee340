//! In-memory fact source
//!
//! Rows are keyed by query text (whitespace-normalised) and case id. Used for
//! offline fixtures and tests; failures and latency can be injected per query.

use super::{FactSource, FactSourceError, QueryParams, Row};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// One fixture entry
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureEntry {
    pub query: String,
    pub case_id: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Deserialize)]
struct Fixture {
    #[serde(default)]
    entries: Vec<FixtureEntry>,
}

/// Collapse whitespace so block-scalar YAML queries match fixture keys
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Default)]
pub struct MemoryFactSource {
    rows: RwLock<HashMap<(String, String), Vec<Row>>>,
    failures: RwLock<HashSet<String>>,
    latency: RwLock<HashMap<String, Duration>>,
    executed: Mutex<Vec<(String, QueryParams)>>,
}

impl MemoryFactSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "entries": [{ "query", "case_id", "rows" }] }`
    pub fn load_fixture(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read fact fixture {}: {}", path.display(), e))?;
        let fixture: Fixture = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse fact fixture {}: {}", path.display(), e))?;

        let source = Self::new();
        for entry in fixture.entries {
            source.set_rows(&entry.query, &entry.case_id, entry.rows);
        }
        Ok(source)
    }

    /// Builder form of [`set_rows`](Self::set_rows)
    pub fn with_rows(self, query: &str, case_id: &str, rows: Vec<Row>) -> Self {
        self.set_rows(query, case_id, rows);
        self
    }

    /// Shorthand: one row `{ "verified": <value> }`
    pub fn with_verified(self, query: &str, case_id: &str, verified: bool) -> Self {
        self.set_verified(query, case_id, verified);
        self
    }

    pub fn set_rows(&self, query: &str, case_id: &str, rows: Vec<Row>) {
        let mut map = self.rows.write().unwrap_or_else(|e| e.into_inner());
        map.insert((normalize_query(query), case_id.to_string()), rows);
    }

    pub fn set_verified(&self, query: &str, case_id: &str, verified: bool) {
        let mut row = Row::new();
        row.insert("verified".to_string(), Value::Bool(verified));
        self.set_rows(query, case_id, vec![row]);
    }

    /// Make every call of `query` fail
    pub fn fail_query(&self, query: &str) {
        let mut failures = self.failures.write().unwrap_or_else(|e| e.into_inner());
        failures.insert(normalize_query(query));
    }

    /// Delay every call of `query`
    pub fn delay_query(&self, query: &str, delay: Duration) {
        let mut latency = self.latency.write().unwrap_or_else(|e| e.into_inner());
        latency.insert(normalize_query(query), delay);
    }

    /// Mutations received through [`FactSource::execute`]
    pub fn executed(&self) -> Vec<(String, QueryParams)> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check(&self, key: &str) -> Result<Option<Duration>, FactSourceError> {
        let failures = self.failures.read().unwrap_or_else(|e| e.into_inner());
        if failures.contains(key) {
            return Err(FactSourceError::Query(format!("injected failure for '{}'", key)));
        }
        let latency = self.latency.read().unwrap_or_else(|e| e.into_inner());
        Ok(latency.get(key).copied())
    }
}

#[async_trait]
impl FactSource for MemoryFactSource {
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Vec<Row>, FactSourceError> {
        let key = normalize_query(query);
        if let Some(delay) = self.check(&key)? {
            tokio::time::sleep(delay).await;
        }

        let case_id = params
            .get("case_id")
            .and_then(Value::as_str)
            .ok_or_else(|| FactSourceError::Query("missing case_id parameter".to_string()))?;

        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .get(&(key, case_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn execute(&self, statement: &str, params: &QueryParams) -> Result<(), FactSourceError> {
        let key = normalize_query(statement);
        if let Some(delay) = self.check(&key)? {
            tokio::time::sleep(delay).await;
        }
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key, params.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
