//! Query-Result Cache
//!
//! Memoizes complete query responses per endpoint URI under a content hash
//! of `(connection, template, parameters)`. Concurrent requests for the same
//! key share one in-flight evaluation.

use super::SweepSummary;
use crate::error::CraftsResult;
use crate::gateway::SparqlResults;
use crate::model::Connection;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

struct QueryEntry {
    cell: Arc<OnceCell<Arc<SparqlResults>>>,
    cached_at: DateTime<Utc>,
}

/// Shared result cache
#[derive(Default)]
pub struct QueryCache {
    endpoints: Mutex<HashMap<String, HashMap<String, QueryEntry>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable content hash of a query request
    pub fn key(conn: &Connection, template: &str, params: &JsonValue) -> String {
        let material = json!([conn, template, params]).to_string();
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    /// Return the cached result for `key`, evaluating `init` on a miss
    ///
    /// A failed evaluation removes the key again.
    pub async fn get_or_try_insert<F, Fut>(&self, uri: &str, key: &str, init: F) -> CraftsResult<Arc<SparqlResults>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CraftsResult<SparqlResults>>,
    {
        let cell = {
            let mut endpoints = self.endpoints.lock();
            endpoints
                .entry(uri.to_string())
                .or_default()
                .entry(key.to_string())
                .or_insert_with(|| QueryEntry {
                    cell: Arc::new(OnceCell::new()),
                    cached_at: Utc::now(),
                })
                .cell
                .clone()
        };

        let result = cell
            .get_or_try_init(|| async move { init().await.map(Arc::new) })
            .await
            .cloned();
        if result.is_err() {
            self.forget_failed(uri, key, &cell);
        }
        result
    }

    fn forget_failed(&self, uri: &str, key: &str, cell: &Arc<OnceCell<Arc<SparqlResults>>>) {
        let mut endpoints = self.endpoints.lock();
        let Some(entries) = endpoints.get_mut(uri) else {
            return;
        };
        // a retry may already own a fresh cell under this key
        if entries
            .get(key)
            .is_some_and(|e| Arc::ptr_eq(&e.cell, cell) && !e.cell.initialized())
        {
            entries.remove(key);
        }
        if entries.is_empty() {
            endpoints.remove(uri);
        }
    }

    pub fn contains(&self, uri: &str, key: &str) -> bool {
        let endpoints = self.endpoints.lock();
        endpoints
            .get(uri)
            .and_then(|m| m.get(key))
            .map(|e| e.cell.initialized())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached result
    pub fn clear_all(&self) {
        self.endpoints.lock().clear();
    }

    /// Drop the cached results of one endpoint URI
    pub fn clear_endpoint(&self, uri: &str) {
        self.endpoints.lock().remove(uri);
    }

    /// Remove results cached before `threshold`
    pub fn sweep(&self, threshold: DateTime<Utc>) -> SweepSummary {
        let mut endpoints = self.endpoints.lock();
        let mut summary = SweepSummary::default();
        for entries in endpoints.values_mut() {
            summary.inspected += entries.len();
            let before = entries.len();
            entries.retain(|_, e| e.cached_at >= threshold);
            summary.cleaned += before - entries.len();
        }
        endpoints.retain(|_, entries| !entries.is_empty());
        summary
    }
}
