//! Query Gateway
//!
//! Renders query templates, compacts namespaces and dispatches the resulting
//! text to an endpoint through a [`SparqlTransport`].

pub mod compact;
pub mod digest;
pub mod http;
pub mod results;

use crate::error::{CraftsError, CraftsResult};
use crate::model::value::iri_term;
use crate::model::Connection;
use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub use http::HttpTransport;
pub use results::{Binding, BindingKind, QuerySolution, SparqlResults};

const TYPES_TEMPLATE: &str = "SELECT DISTINCT ?iri ?type WHERE { ?iri a{{#if inferred}}/<http://www.w3.org/2000/01/rdf-schema#subClassOf>*{{/if}} ?type . {{#each restrictions}}{{{this}}}\n{{/each}}FILTER (?iri IN ( {{{firis}}} )) }";

const PROPVALUES_TEMPLATE: &str = "SELECT DISTINCT ?iri ?value WHERE { {{#if inv}}?value <{{{propiri}}}> ?iri .{{else}}?iri <{{{propiri}}}> ?value .{{/if}} {{#each restrictions}}{{{this}}}\n{{/each}}FILTER (?iri IN ( {{{firis}}} )) }";

/// Correlates the log lines of one REST request
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub request_id: Uuid,
    pub api_id: String,
}

impl QueryContext {
    pub fn new(api_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            api_id: api_id.into(),
        }
    }
}

/// SPARQL protocol client
#[async_trait]
pub trait SparqlTransport: Send + Sync {
    /// Run a query and return its JSON results
    async fn select(&self, conn: &Connection, query: &str) -> CraftsResult<SparqlResults>;

    /// Run an update
    async fn update(&self, conn: &Connection, update: &str) -> CraftsResult<()>;
}

#[derive(Serialize)]
struct TypesParams<'a> {
    inferred: bool,
    restrictions: &'a [String],
    firis: String,
}

#[derive(Serialize)]
struct PropValuesParams<'a> {
    inv: bool,
    propiri: &'a str,
    restrictions: &'a [String],
    firis: String,
}

/// Template rendering and dispatch to endpoints
pub struct QueryGateway {
    transport: Arc<dyn SparqlTransport>,
    registry: Handlebars<'static>,
    compact: bool,
}

impl QueryGateway {
    pub fn new(transport: Arc<dyn SparqlTransport>) -> CraftsResult<Self> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string("types", TYPES_TEMPLATE)
            .map_err(|e| CraftsError::Template(e.to_string()))?;
        registry
            .register_template_string("propvalues", PROPVALUES_TEMPLATE)
            .map_err(|e| CraftsError::Template(e.to_string()))?;

        Ok(Self {
            transport,
            registry,
            compact: true,
        })
    }

    /// Enable or disable namespace compaction
    pub fn with_compaction(mut self, enabled: bool) -> Self {
        self.compact = enabled;
        self
    }

    /// Render an operator template with parameters
    pub fn render(&self, template: &str, params: &JsonValue) -> CraftsResult<String> {
        self.registry
            .render_template(template, params)
            .map_err(|e| CraftsError::Template(e.to_string()))
    }

    /// Query for class memberships of a batch of resources
    pub fn types_query(&self, inferred: bool, restrictions: &[String], iris: &[String]) -> CraftsResult<String> {
        let params = TypesParams {
            inferred,
            restrictions,
            firis: filter_list(iris)?,
        };
        self.registry
            .render("types", &params)
            .map_err(|e| CraftsError::Template(e.to_string()))
    }

    /// Query for values of one predicate on a batch of resources
    pub fn propvalues_query(
        &self,
        predicate: &str,
        inverse: bool,
        restrictions: &[String],
        iris: &[String],
    ) -> CraftsResult<String> {
        let params = PropValuesParams {
            inv: inverse,
            propiri: predicate,
            restrictions,
            firis: filter_list(iris)?,
        };
        self.registry
            .render("propvalues", &params)
            .map_err(|e| CraftsError::Template(e.to_string()))
    }

    /// Render a template and run it as a query
    pub async fn execute(
        &self,
        ctx: &QueryContext,
        conn: &Connection,
        template: &str,
        params: &JsonValue,
    ) -> CraftsResult<SparqlResults> {
        let query = self.render(template, params)?;
        self.select(ctx, conn, &query).await
    }

    pub async fn select(&self, ctx: &QueryContext, conn: &Connection, query: &str) -> CraftsResult<SparqlResults> {
        let text = self.prepare(query);
        debug!(
            request_id = %ctx.request_id,
            api = %ctx.api_id,
            endpoint = %conn.id,
            "{}",
            text
        );
        self.transport.select(conn, &text).await
    }

    pub async fn update(&self, ctx: &QueryContext, conn: &Connection, update: &str) -> CraftsResult<()> {
        let text = self.prepare(update);
        debug!(
            request_id = %ctx.request_id,
            api = %ctx.api_id,
            endpoint = %conn.id,
            "{}",
            text
        );
        self.transport.update(conn, &text).await
    }

    fn prepare(&self, text: &str) -> String {
        if self.compact {
            compact::compact(text)
        } else {
            text.to_string()
        }
    }
}

/// `<a>, <b>, ...` for a `FILTER (?iri IN (...))` clause
fn filter_list(iris: &[String]) -> CraftsResult<String> {
    let terms = iris.iter().map(|iri| iri_term(iri)).collect::<CraftsResult<Vec<_>>>()?;
    Ok(terms.join(", "))
}
