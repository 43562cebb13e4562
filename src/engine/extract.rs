//! Extraction Engine
//!
//! Fills cache gaps for a model element and a set of resources. Every label
//! group (each type declaration, all attributes together, each relation) runs
//! as its own task; within a task, resources are queried in pages of
//! [`PAGE_SIZE`], one page at a time. Embedded targets are resolved
//! recursively before the call returns.

use super::ResourceEngine;
use crate::cache::LabelLease;
use crate::error::{CraftsError, CraftsResult};
use crate::gateway::QueryContext;
use crate::model::{ModelElement, Property, Value};
use futures::future::{join_all, BoxFuture};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Resources per query
pub const PAGE_SIZE: usize = 100;

/// Nesting bound for embedded resolution
pub const MAX_EMBED_DEPTH: usize = 32;

fn included(prop: &Property<'_>, include_writeonly: bool) -> bool {
    include_writeonly || !prop.writeonly()
}

impl ResourceEngine {
    /// Resolve `iris` for `element`, returning the number of queries issued
    pub(crate) fn extract<'a>(
        &'a self,
        ctx: &'a QueryContext,
        element: &'a ModelElement,
        iris: Vec<String>,
        include_writeonly: bool,
        depth: usize,
    ) -> BoxFuture<'a, CraftsResult<usize>> {
        Box::pin(async move {
            if depth > MAX_EMBED_DEPTH {
                return Err(CraftsError::Internal(format!(
                    "embedding depth exceeded at \"{}\"",
                    element.id
                )));
            }
            if iris.is_empty() {
                return Ok(0);
            }

            let labels: Vec<&str> = element
                .properties()
                .filter(|p| included(p, include_writeonly))
                .map(|p| p.label())
                .collect();

            let mut issued = 0;
            loop {
                let claim = self.resources.claim(&element.id, &iris, &labels);
                issued += self.resolve_leases(ctx, element, claim.leases).await?;
                if claim.waits.is_empty() {
                    break;
                }
                // owners either publish or release; a released label is
                // claimed again on the next pass
                for mut done in claim.waits {
                    let _ = done.changed().await;
                }
            }

            let nested = element
                .properties()
                .filter(|p| included(p, include_writeonly))
                .filter_map(|p| p.embedded_target().map(|t| (p, t)))
                .map(|(prop, target)| {
                    let targets = self.related_iris(element, prop.label(), &iris);
                    async move {
                        let target = self.element(target)?;
                        self.extract(ctx, target, targets, false, depth + 1).await
                    }
                })
                .collect::<Vec<_>>();
            for result in join_all(nested).await {
                issued += result?;
            }

            Ok(issued)
        })
    }

    /// Run one task per label group and wait for all of them
    async fn resolve_leases<'a>(
        &'a self,
        ctx: &'a QueryContext,
        element: &'a ModelElement,
        leases: Vec<LabelLease<'a>>,
    ) -> CraftsResult<usize> {
        let mut tasks: Vec<BoxFuture<'a, CraftsResult<usize>>> = Vec::new();
        let mut attributes = Vec::new();
        for lease in leases {
            let prop = element.property(lease.label()).ok_or_else(|| {
                CraftsError::Internal(format!("label \"{}\" vanished from \"{}\"", lease.label(), element.id))
            })?;
            match prop {
                Property::Data(_) => attributes.push((prop, lease)),
                _ => tasks.push(Box::pin(self.resolve_label(ctx, prop, lease))),
            }
        }
        if !attributes.is_empty() {
            tasks.push(Box::pin(async move {
                let mut issued = 0;
                for (prop, lease) in attributes {
                    issued += self.resolve_label(ctx, prop, lease).await?;
                }
                Ok::<_, CraftsError>(issued)
            }));
        }

        let mut issued = 0;
        let mut failure = None;
        for result in join_all(tasks).await {
            match result {
                Ok(n) => issued += n,
                Err(e) => {
                    warn!(request_id = %ctx.request_id, api = %ctx.api_id, error = %e, "label resolution failed");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(issued),
        }
    }

    /// Query one label page by page, then publish the staged values
    async fn resolve_label(&self, ctx: &QueryContext, prop: Property<'_>, lease: LabelLease<'_>) -> CraftsResult<usize> {
        let conn = self.endpoint(prop.endpoint())?.connection();
        let var = match prop {
            Property::Type(_) => "type",
            _ => "value",
        };

        let mut staged: HashMap<String, Vec<Value>> = HashMap::new();
        let mut issued = 0;
        for page in lease.iris().chunks(PAGE_SIZE) {
            let query = match prop {
                Property::Type(t) => self.gateway.types_query(t.inferred, &t.restrictions, page)?,
                _ => self
                    .gateway
                    .propvalues_query(prop.predicate(), prop.inverse(), prop.restrictions(), page)?,
            };
            let results = self.gateway.select(ctx, &conn, &query).await?;
            issued += 1;

            for solution in results.solutions() {
                let (Some(iri), Some(binding)) = (solution.get("iri"), solution.get(var)) else {
                    continue;
                };
                let value = if prop.is_literal() {
                    Value::literal_from_binding(binding)
                } else {
                    Value::relation_from_binding(binding)
                };
                if let Some(value) = value {
                    let values = staged.entry(iri.value.clone()).or_default();
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
        }

        lease.fulfil(staged);
        Ok(issued)
    }

    /// Distinct relation targets of `label` across `iris`, in first-seen order
    fn related_iris(&self, element: &ModelElement, label: &str, iris: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for iri in iris {
            for value in self.resources.values(&element.id, iri, label).unwrap_or_default() {
                if let Value::Iri(target) = value {
                    if seen.insert(target.clone()) {
                        out.push(target);
                    }
                }
            }
        }
        out
    }

    /// Queries a fully uncached resolution of `iris` would issue
    pub(crate) fn estimate(
        &self,
        element: &ModelElement,
        iris: &[String],
        include_writeonly: bool,
        depth: usize,
    ) -> CraftsResult<usize> {
        if depth > MAX_EMBED_DEPTH {
            return Err(CraftsError::Internal(format!(
                "embedding depth exceeded at \"{}\"",
                element.id
            )));
        }
        let pages = iris.len().div_ceil(PAGE_SIZE);
        let mut total = 0;
        for prop in element.properties().filter(|p| included(p, include_writeonly)) {
            total += pages;
            if let Some(target) = prop.embedded_target() {
                let targets = self.related_iris(element, prop.label(), iris);
                total += self.estimate(self.element(target)?, &targets, false, depth + 1)?;
            }
        }
        Ok(total)
    }
}
