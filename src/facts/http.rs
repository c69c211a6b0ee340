//! HTTP fact source
//!
//! POSTs `{ "query": ..., "params": {...} }` to a query endpoint and accepts
//! either `{ "rows": [...] }` or a bare array of row objects in reply.

use super::{FactSource, FactSourceError, QueryParams, Row};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub struct HttpFactSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpFactSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

/// Pull rows out of a response body
fn parse_rows(body: Value) -> Result<Vec<Row>, FactSourceError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("rows") {
            Some(Value::Array(items)) => items,
            _ => {
                let message = map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("missing 'rows' array");
                return Err(FactSourceError::Response(message.to_string()));
            }
        },
        other => {
            return Err(FactSourceError::Response(format!(
                "expected object or array, got {}",
                other
            )))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            other => Err(FactSourceError::Response(format!("row is not an object: {}", other))),
        })
        .collect()
}

#[async_trait]
impl FactSource for HttpFactSource {
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Vec<Row>, FactSourceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "params": params }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FactSourceError::Timeout(self.timeout)
                } else if e.is_connect() {
                    FactSourceError::Unavailable(e.to_string())
                } else {
                    FactSourceError::Query(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FactSourceError::Query(format!("HTTP {}: {}", status, text)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FactSourceError::Response(e.to_string()))?;
        parse_rows(body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows_shapes() {
        let rows = parse_rows(json!({ "rows": [{ "verified": true }] })).unwrap();
        assert_eq!(rows[0]["verified"], true);

        let rows = parse_rows(json!([{ "verified": false }])).unwrap();
        assert_eq!(rows[0]["verified"], false);

        assert!(parse_rows(json!({ "error": "syntax error" })).is_err());
        assert!(parse_rows(json!([1, 2])).is_err());
        assert!(parse_rows(json!("ok")).is_err());
    }
}
