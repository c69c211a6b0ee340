//! Fact source query interface
//!
//! The engine never talks to the graph store directly. It hands a declarative
//! query plus a parameter map (always carrying `case_id`) to a [`FactSource`]
//! and reads back rows. Mutations go through the same interface using
//! templates from configuration.

pub mod memory;

#[cfg(feature = "http-facts")]
pub mod http;

use crate::models::{CasetrackConfig, FactSourceKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryFactSource;

/// One result row: column name to value
pub type Row = serde_json::Map<String, Value>;

/// Named query parameters
pub type QueryParams = BTreeMap<String, Value>;

/// Why a query produced no usable answer
#[derive(Debug, Clone, thiserror::Error)]
pub enum FactSourceError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("fact source unavailable: {0}")]
    Unavailable(String),
}

/// Read/write access to the external system of record
#[async_trait]
pub trait FactSource: Send + Sync {
    /// Run a read query and return its rows
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Vec<Row>, FactSourceError>;

    /// Run a mutation; rows, if any, are discarded
    async fn execute(&self, statement: &str, params: &QueryParams) -> Result<(), FactSourceError> {
        self.query(statement, params).await.map(|_| ())
    }

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Fact source used when none is configured; answers every query with no rows
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFactSource;

#[async_trait]
impl FactSource for NullFactSource {
    async fn query(&self, _query: &str, _params: &QueryParams) -> Result<Vec<Row>, FactSourceError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Parameter map with the case identifier bound
pub fn case_params(case_id: &str) -> QueryParams {
    let mut params = QueryParams::new();
    params.insert("case_id".to_string(), Value::String(case_id.to_string()));
    params
}

/// Build the configured fact source
pub fn from_config(config: &CasetrackConfig, project_root: &Path) -> anyhow::Result<Arc<dyn FactSource>> {
    let source: Arc<dyn FactSource> = match config.fact_source.kind {
        FactSourceKind::None => Arc::new(NullFactSource),
        FactSourceKind::Fixture => {
            let Some(fixture) = &config.fact_source.fixture else {
                anyhow::bail!("fact_source.kind = \"fixture\" requires fact_source.fixture");
            };
            Arc::new(MemoryFactSource::load_fixture(&project_root.join(fixture))?)
        }
        FactSourceKind::Http => {
            let Some(url) = &config.fact_source.url else {
                anyhow::bail!("fact_source.kind = \"http\" requires fact_source.url");
            };
            http_source(url, config.verification.timeout())?
        }
    };
    Ok(source)
}

#[cfg(feature = "http-facts")]
fn http_source(url: &str, timeout: Duration) -> anyhow::Result<Arc<dyn FactSource>> {
    Ok(Arc::new(http::HttpFactSource::new(url, timeout)?))
}

#[cfg(not(feature = "http-facts"))]
fn http_source(url: &str, _timeout: Duration) -> anyhow::Result<Arc<dyn FactSource>> {
    anyhow::bail!(
        "fact source '{}' needs the http-facts feature (rebuild with --features http-facts)",
        url
    )
}
