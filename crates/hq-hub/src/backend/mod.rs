//! # Search Backend
//!
//! The external document index, reached through two narrow seams:
//! [`SearchBackend`] for inventory queries and [`DocumentIndex`] for audit
//! writes. [`elastic::ElasticClient`] implements both over HTTP.

pub mod elastic;

use hq_core::HostDocument;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, timeout, or the backend said it is unavailable.
    #[error("backend unreachable: {0}")]
    Unavailable(String),
    /// The backend answered, but with an error or a body we cannot use.
    #[error("backend query failed: {0}")]
    Query(String),
}

#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a search request body against `index` and return the raw envelope.
    async fn search(&self, index: &str, body: &Value) -> Result<Value, BackendError>;
}

#[async_trait::async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Store `document` in `index`, returning the id the backend assigned.
    async fn index(&self, index: &str, document: &Value) -> Result<String, BackendError>;
}

/// Pull the `_source` of every hit out of a search envelope.
///
/// Other envelope fields (`hits.total`, `took`, …) are ignored.
pub fn extract_sources(response: &Value) -> Result<Vec<HostDocument>, BackendError> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Query("response has no hits.hits array".into()))?;

    hits.iter()
        .map(|hit| {
            let source = hit
                .get("_source")
                .ok_or_else(|| BackendError::Query("hit without _source".into()))?;
            serde_json::from_value(source.clone())
                .map_err(|e| BackendError::Query(format!("unexpected document shape: {}", e)))
        })
        .collect()
}
