//! # Search Executor
//!
//! Runs structured queries against the inventory index behind a bounded LRU
//! cache of extracted documents.

use super::SearchError;
use crate::backend::{extract_sources, SearchBackend};
use hq_core::{HostDocument, StructuredQuery};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SearchExecutor {
    backend: Arc<dyn SearchBackend>,
    index: String,
    cache: Mutex<LruCache<String, Vec<HostDocument>>>,
}

impl SearchExecutor {
    /// A capacity of 0 is treated as 1.
    pub fn new(backend: Arc<dyn SearchBackend>, index: impl Into<String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            index: index.into(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn search(&self, query: &StructuredQuery) -> Result<Vec<HostDocument>, SearchError> {
        let key = query.cache_key();

        if let Some(hit) = self.cache.lock().await.get(&key) {
            tracing::debug!("Cache hit for {}", key);
            return Ok(hit.clone());
        }

        // The lock is not held across the backend call; concurrent misses on
        // one key both query and the last insert wins.
        let documents = self.fetch(query).await?;
        self.cache.lock().await.put(key, documents.clone());
        Ok(documents)
    }

    async fn fetch(&self, query: &StructuredQuery) -> Result<Vec<HostDocument>, SearchError> {
        let body = query.to_search_body();
        let result = match self.backend.search(&self.index, &body).await {
            Ok(response) => extract_sources(&response),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            tracing::error!("Search on index {} failed for {}: {}", self.index, query, e);
            SearchError::from(e)
        })
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}
