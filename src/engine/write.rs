//! Write protocols: replace, remove and patch
//!
//! Every write re-reads the full prior state of the resource (write-only
//! labels included), computes per-endpoint delete and insert sets, executes
//! deletes before inserts, and then evicts the resource together with every
//! cached resource that may hold a stale relation to it. The query-result
//! cache is cleared wholesale.
//!
//! Writes are not atomic. Statements already sent to one endpoint are not
//! rolled back when a later request fails, and a patch stops at the first
//! failing operation with the earlier operations already applied. Failures
//! report what was executed so callers can tell the partial effect.

use super::patch::{self, PatchOperation};
use super::triples::{update_request, Representation, TripleSet};
use super::ResourceEngine;
use crate::error::{CraftsError, CraftsResult};
use crate::gateway::QueryContext;
use crate::model::value::check_iri;
use crate::model::{ModelElement, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{info, warn};

/// Counters of an executed write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReport {
    pub deleted_triples: usize,
    pub inserted_triples: usize,
    /// Reads of the prior state plus update requests
    pub queries_issued: usize,
}

/// A failed write together with what it had already executed
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct WriteFailure {
    pub error: CraftsError,
    pub report: WriteReport,
}

impl From<CraftsError> for WriteFailure {
    fn from(error: CraftsError) -> Self {
        Self {
            error,
            report: WriteReport::default(),
        }
    }
}

trait WithReport<T> {
    fn with_report(self, report: WriteReport) -> Result<T, WriteFailure>;
}

impl<T> WithReport<T> for CraftsResult<T> {
    fn with_report(self, report: WriteReport) -> Result<T, WriteFailure> {
        self.map_err(|error| WriteFailure { error, report })
    }
}

type Invalidations = HashSet<(String, String)>;

impl ResourceEngine {
    /// Replace the stored description of a resource with `body`
    pub async fn replace(
        &self,
        ctx: &QueryContext,
        element_id: &str,
        iri: &str,
        body: &JsonValue,
    ) -> Result<WriteReport, WriteFailure> {
        let element = self.element(element_id)?;
        check_iri(iri)?;
        let repr = Representation::parse(&self.config, element, iri, body)?;

        let mut report = WriteReport::default();
        let old = self.prior_state(ctx, element, iri, &mut report).await?;

        let mut deletes = TripleSet::new();
        self.stored_triples(element, iri, &old, &mut deletes).with_report(report)?;
        let inserts = repr.insert_triples(&self.config).with_report(report)?;

        let mut targets = Invalidations::new();
        self.collect_invalidations(element, iri, old.iter().map(|(l, v)| (l.as_str(), v.as_slice())), &mut targets);
        self.collect_representation(&repr, &mut targets);

        let result = self.execute(ctx, &deletes, &inserts, &mut report).await;
        self.settle_write(ctx, "replace", iri, &targets, &report);
        result.with_report(report)?;
        Ok(report)
    }

    /// Delete every stored statement of a resource
    pub async fn remove(&self, ctx: &QueryContext, element_id: &str, iri: &str) -> Result<WriteReport, WriteFailure> {
        let element = self.element(element_id)?;
        check_iri(iri)?;

        let mut report = WriteReport::default();
        let old = self.prior_state(ctx, element, iri, &mut report).await?;

        let mut deletes = TripleSet::new();
        self.stored_triples(element, iri, &old, &mut deletes).with_report(report)?;

        let mut targets = Invalidations::new();
        self.collect_invalidations(element, iri, old.iter().map(|(l, v)| (l.as_str(), v.as_slice())), &mut targets);

        let result = self.execute(ctx, &deletes, &TripleSet::new(), &mut report).await;
        self.settle_write(ctx, "remove", iri, &targets, &report);
        result.with_report(report)?;
        Ok(report)
    }

    /// Apply an ordered list of patch operations
    pub async fn patch(
        &self,
        ctx: &QueryContext,
        element_id: &str,
        iri: &str,
        ops: &[PatchOperation],
    ) -> Result<WriteReport, WriteFailure> {
        let element = self.element(element_id)?;
        check_iri(iri)?;
        let parsed = patch::parse_operations(&self.config, element, ops)?;

        let mut report = WriteReport::default();
        let mut state = self.prior_state(ctx, element, iri, &mut report).await?;
        state.retain(|_, values| !values.is_empty());

        let mut targets = Invalidations::new();
        self.collect_invalidations(element, iri, state.iter().map(|(l, v)| (l.as_str(), v.as_slice())), &mut targets);

        let mut failure = None;
        for op in &parsed {
            let step = async {
                let effect = patch::apply(&mut state, op)?;

                let mut deletes = TripleSet::new();
                deletes.add_values(iri, op.prop, &effect.removed)?;
                let mut inserts = TripleSet::new();
                inserts.add_values(iri, op.prop, &effect.added)?;
                for inline in &op.embedded {
                    inserts.extend(inline.insert_triples(&self.config)?);
                    self.collect_representation(inline, &mut targets);
                }
                self.collect_invalidations(element, iri, [(op.prop.label(), effect.added.as_slice())], &mut targets);

                self.execute(ctx, &deletes, &inserts, &mut report).await
            };
            if let Err(e) = step.await {
                warn!(request_id = %ctx.request_id, api = %ctx.api_id, op = op.index, error = %e, "patch stopped");
                failure = Some(e);
                break;
            }
        }

        self.settle_write(ctx, "patch", iri, &targets, &report);
        match failure {
            Some(error) => Err(WriteFailure { error, report }),
            None => Ok(report),
        }
    }

    /// Evict the cached entry and re-read everything, write-only labels included
    async fn prior_state(
        &self,
        ctx: &QueryContext,
        element: &ModelElement,
        iri: &str,
        report: &mut WriteReport,
    ) -> Result<HashMap<String, Vec<Value>>, WriteFailure> {
        self.resources.evict(&element.id, iri);
        let issued = self
            .extract(ctx, element, vec![iri.to_string()], true, 0)
            .await
            .with_report(*report)?;
        report.queries_issued += issued;
        Ok(self.resources.get(&element.id, iri).unwrap_or_default())
    }

    /// Statements backing the cached state, for endpoints that accept updates
    fn stored_triples(
        &self,
        element: &ModelElement,
        iri: &str,
        state: &HashMap<String, Vec<Value>>,
        out: &mut TripleSet,
    ) -> CraftsResult<()> {
        for prop in element.properties() {
            let updatable = self.endpoint(prop.endpoint())?.is_updatable();
            if !updatable {
                continue;
            }
            if let Some(values) = state.get(prop.label()) {
                out.add_values(iri, prop, values)?;
            }
        }
        Ok(())
    }

    /// The resource, every cached resource pointing at it, and the targets
    /// of the given relation values
    fn collect_invalidations<'v>(
        &self,
        element: &ModelElement,
        iri: &str,
        values: impl IntoIterator<Item = (&'v str, &'v [Value])>,
        out: &mut Invalidations,
    ) {
        out.insert((element.id.clone(), iri.to_string()));

        for referrer in &self.config.model {
            let labels: Vec<&str> = referrer.relations_to(&element.id).map(|p| p.label()).collect();
            if labels.is_empty() {
                continue;
            }
            for id in self.resources.referencing(&referrer.id, &labels, iri) {
                out.insert((referrer.id.clone(), id));
            }
        }

        for (label, vals) in values {
            let Some(target) = element.property(label).and_then(|p| p.target_id()) else {
                continue;
            };
            for value in vals.iter().filter_map(Value::as_iri) {
                out.insert((target.to_string(), value.to_string()));
            }
        }
    }

    fn collect_representation(&self, repr: &Representation, out: &mut Invalidations) {
        let Some(element) = self.config.element(&repr.element) else {
            return;
        };
        self.collect_invalidations(
            element,
            &repr.iri,
            repr.values.iter().map(|(l, v)| (l.as_str(), v.as_slice())),
            out,
        );
        for inline in &repr.embedded {
            self.collect_representation(inline, out);
        }
    }

    /// Send deletes, then inserts, one request per endpoint
    async fn execute(
        &self,
        ctx: &QueryContext,
        deletes: &TripleSet,
        inserts: &TripleSet,
        report: &mut WriteReport,
    ) -> CraftsResult<()> {
        for (insert, set) in [(false, deletes), (true, inserts)] {
            for (endpoint_id, triples) in set.groups() {
                let endpoint = self.endpoint(endpoint_id)?;
                let conn = endpoint
                    .update_connection()
                    .ok_or_else(|| CraftsError::Internal(format!("endpoint \"{}\" is not updatable", endpoint_id)))?;
                let text = update_request(insert, triples, conn.graph.as_deref())?;
                self.gateway.update(ctx, &conn, &text).await?;

                report.queries_issued += 1;
                if insert {
                    report.inserted_triples += triples.len();
                } else {
                    report.deleted_triples += triples.len();
                }
            }
        }
        Ok(())
    }

    /// Cache consistency after a write attempt
    fn settle_write(&self, ctx: &QueryContext, kind: &str, iri: &str, targets: &Invalidations, report: &WriteReport) {
        let evicted = self.resources.evict_all(targets);
        self.queries.clear_all();
        info!(
            request_id = %ctx.request_id,
            api = %ctx.api_id,
            iri,
            kind,
            deleted = report.deleted_triples,
            inserted = report.inserted_triples,
            queries = report.queries_issued,
            evicted,
            "write settled"
        );
    }
}
