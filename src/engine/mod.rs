//! Resource mapping engine
//!
//! One [`ResourceEngine`] serves one API: it owns the API's resource cache,
//! resolves reads through the extraction engine and turns writes into
//! per-endpoint triple sets.

pub mod extract;
pub mod patch;
pub mod render;
pub mod triples;
pub mod write;

use crate::cache::{QueryCache, ResourceCache, SweepSummary};
use crate::error::{CraftsError, CraftsResult};
use crate::gateway::{QueryContext, QueryGateway, SparqlResults};
use crate::model::value::check_iri;
use crate::model::{ApiConfig, Connection, Endpoint, ModelElement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

pub use patch::{PatchOp, PatchOperation};
pub use write::{WriteFailure, WriteReport};

/// Compact-identifier expansion for multi-resource reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub label: String,
    pub namespace: String,
}

/// Read request for a set of resources of one kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub element: String,
    pub iris: Vec<String>,
    #[serde(default)]
    pub include_writeonly: bool,
    #[serde(default)]
    pub prefix: Option<Prefix>,
}

impl FetchRequest {
    pub fn new(element: impl Into<String>, iris: Vec<String>) -> Self {
        Self {
            element: element.into(),
            iris,
            include_writeonly: false,
            prefix: None,
        }
    }

    pub fn single(element: impl Into<String>, iri: impl Into<String>) -> Self {
        Self::new(element, vec![iri.into()])
    }

    pub fn with_writeonly(mut self) -> Self {
        self.include_writeonly = true;
        self
    }

    pub fn with_prefix(mut self, label: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.prefix = Some(Prefix {
            label: label.into(),
            namespace: namespace.into(),
        });
        self
    }

    /// Expanded, validated and de-duplicated identifiers
    fn resolved_iris(&self) -> CraftsResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.iris.len());
        for iri in &self.iris {
            let iri = match &self.prefix {
                Some(p) => match iri.strip_prefix(&format!("{}:", p.label)) {
                    Some(local) => format!("{}{}", p.namespace, local),
                    None => iri.clone(),
                },
                None => iri.clone(),
            };
            check_iri(&iri)?;
            if seen.insert(iri.clone()) {
                out.push(iri);
            }
        }
        Ok(out)
    }
}

/// Representations plus cache-efficiency counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub data: Vec<JsonValue>,
    pub queries_issued: usize,
    pub queries_if_uncached: usize,
}

/// Per-API engine service
pub struct ResourceEngine {
    config: ApiConfig,
    gateway: Arc<QueryGateway>,
    resources: ResourceCache,
    queries: Arc<QueryCache>,
}

impl ResourceEngine {
    /// Build an engine for a validated configuration
    pub fn new(config: ApiConfig, gateway: Arc<QueryGateway>, queries: Arc<QueryCache>) -> CraftsResult<Self> {
        config.validate()?;
        info!(api = %config.api_id, elements = config.model.len(), "engine ready");
        Ok(Self {
            config,
            gateway,
            resources: ResourceCache::new(),
            queries,
        })
    }

    pub fn api_id(&self) -> &str {
        &self.config.api_id
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.resources
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.queries
    }

    pub fn context(&self) -> QueryContext {
        QueryContext::new(self.config.api_id.clone())
    }

    pub(crate) fn element(&self, id: &str) -> CraftsResult<&ModelElement> {
        self.config
            .element(id)
            .ok_or_else(|| CraftsError::mismatch(format!("Check your model, incorrect data type => {}", id)))
    }

    pub(crate) fn endpoint(&self, id: &str) -> CraftsResult<&Endpoint> {
        self.config
            .endpoint(id)
            .ok_or_else(|| CraftsError::Internal(format!("unresolved endpoint \"{}\"", id)))
    }

    /// Resolve and render a set of resources
    pub async fn fetch(&self, ctx: &QueryContext, request: &FetchRequest) -> CraftsResult<FetchResponse> {
        let element = self.element(&request.element)?;
        let iris = request.resolved_iris()?;

        let queries_issued = self
            .extract(ctx, element, iris.clone(), request.include_writeonly, 0)
            .await?;
        let queries_if_uncached = self.estimate(element, &iris, request.include_writeonly, 0)?;

        let mut data = Vec::with_capacity(iris.len());
        for iri in &iris {
            if let Some(repr) = self.render(iri, element, request.include_writeonly)? {
                data.push(repr);
            }
        }

        Ok(FetchResponse {
            data,
            queries_issued,
            queries_if_uncached,
        })
    }

    /// Run a query through the result cache
    pub async fn answer_query(
        &self,
        ctx: &QueryContext,
        conn: &Connection,
        template: &str,
        params: &JsonValue,
    ) -> CraftsResult<Arc<SparqlResults>> {
        let key = QueryCache::key(conn, template, params);
        self.queries
            .get_or_try_insert(&conn.uri, &key, || self.gateway.execute(ctx, conn, template, params))
            .await
    }

    /// Run one of the API's query templates with raw request parameters
    pub async fn run_query(
        &self,
        ctx: &QueryContext,
        template_id: &str,
        raw: &HashMap<String, String>,
    ) -> CraftsResult<Arc<SparqlResults>> {
        let template = self
            .config
            .template(template_id)
            .ok_or_else(|| CraftsError::mismatch(format!("Unknown query template \"{}\"", template_id)))?;

        let mut params = Map::new();
        for param in &template.parameters {
            match raw.get(&param.label) {
                Some(value) => {
                    params.insert(param.label.clone(), param.kind.coerce(&param.label, value)?);
                }
                None if param.optional => {}
                None => {
                    return Err(CraftsError::mismatch(format!(
                        "Missing parameter \"{}\" of query template \"{}\"",
                        param.label, template_id
                    )))
                }
            }
        }

        let conn = self.endpoint(&template.endpoint)?.connection();
        self.answer_query(ctx, &conn, &template.template, &JsonValue::Object(params))
            .await
    }

    /// Drop resource entries created before `threshold`
    pub fn sweep(&self, threshold: DateTime<Utc>) -> SweepSummary {
        self.resources.sweep(threshold)
    }
}
