//! API registry
//!
//! Owns one [`ResourceEngine`] per registered API. An engine's resource cache
//! lives exactly as long as its registration; the query-result cache is
//! shared by all APIs.

use crate::cache::{QueryCache, SweepSummary};
use crate::engine::ResourceEngine;
use crate::error::{CraftsError, CraftsResult};
use crate::gateway::QueryGateway;
use crate::model::ApiConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of a registry-wide TTL sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Resource cache summary per API
    pub resources: BTreeMap<String, SweepSummary>,
    pub queries: SweepSummary,
}

impl SweepReport {
    pub fn resource_totals(&self) -> SweepSummary {
        let mut total = SweepSummary::default();
        for summary in self.resources.values() {
            total.merge(*summary);
        }
        total
    }
}

/// Registered APIs
pub struct ApiRegistry {
    apis: RwLock<HashMap<String, Arc<ResourceEngine>>>,
    gateway: Arc<QueryGateway>,
    queries: Arc<QueryCache>,
}

impl ApiRegistry {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self {
            apis: RwLock::new(HashMap::new()),
            gateway,
            queries: Arc::new(QueryCache::new()),
        }
    }

    /// Validate and register an API
    pub fn create_api(&self, config: ApiConfig) -> CraftsResult<Arc<ResourceEngine>> {
        let id = config.api_id.clone();
        if self.apis.read().contains_key(&id) {
            return Err(CraftsError::InvalidConfig(format!("API \"{}\" already exists", id)));
        }
        let engine = Arc::new(ResourceEngine::new(config, self.gateway.clone(), self.queries.clone())?);

        let mut apis = self.apis.write();
        if apis.contains_key(&id) {
            return Err(CraftsError::InvalidConfig(format!("API \"{}\" already exists", id)));
        }
        apis.insert(id.clone(), engine.clone());
        info!("Created API: {}", id);
        Ok(engine)
    }

    /// Unregister an API, dropping its resource cache
    pub fn delete_api(&self, id: &str) -> CraftsResult<()> {
        let removed = self.apis.write().remove(id);
        match removed {
            Some(_) => {
                info!("Deleted API: {}", id);
                Ok(())
            }
            None => Err(CraftsError::ApiNotFound(id.to_string())),
        }
    }

    pub fn get(&self, id: &str) -> CraftsResult<Arc<ResourceEngine>> {
        self.apis
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CraftsError::ApiNotFound(id.to_string()))
    }

    /// Registered API ids, sorted
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.apis.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn query_cache(&self) -> &Arc<QueryCache> {
        &self.queries
    }

    /// Register every `*.json` API configuration in `dir`
    pub fn load_dir(&self, dir: &Path) -> CraftsResult<usize> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CraftsError::InvalidConfig(format!("cannot read {}: {}", dir.display(), e)))?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| CraftsError::InvalidConfig(format!("cannot read {}: {}", path.display(), e)))?;
            let config = ApiConfig::from_json(&text)
                .map_err(|e| CraftsError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            self.create_api(config)?;
            debug!("Loaded API configuration {}", path.display());
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Remove cache entries created before `threshold`
    pub fn sweep_expired(&self, threshold: DateTime<Utc>) -> SweepReport {
        let engines: Vec<(String, Arc<ResourceEngine>)> = self
            .apis
            .read()
            .iter()
            .map(|(id, engine)| (id.clone(), engine.clone()))
            .collect();

        let mut report = SweepReport::default();
        for (id, engine) in engines {
            report.resources.insert(id, engine.sweep(threshold));
        }
        report.queries = self.queries.sweep(threshold);
        report
    }

    /// Periodically sweep entries older than `retention`
    ///
    /// The task stops once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, retention: chrono::Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let report = registry.sweep_expired(Utc::now() - retention);
                let resources = report.resource_totals();
                if resources.cleaned > 0 || report.queries.cleaned > 0 {
                    info!(
                        inspected = resources.inspected,
                        cleaned = resources.cleaned,
                        queries_inspected = report.queries.inspected,
                        queries_cleaned = report.queries.cleaned,
                        "cache sweep"
                    );
                } else {
                    debug!(inspected = resources.inspected, "cache sweep, nothing expired");
                }
            }
            warn!("cache sweeper stopped");
        })
    }
}
