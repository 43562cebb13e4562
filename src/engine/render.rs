//! Representation Formatter

use super::extract::MAX_EMBED_DEPTH;
use super::ResourceEngine;
use crate::error::{CraftsError, CraftsResult};
use crate::model::{ModelElement, Value, IRI_KEY};
use serde_json::{json, Map, Value as JsonValue};

/// A single value renders bare, several as an array
pub fn collapse(mut values: Vec<JsonValue>) -> JsonValue {
    match values.len() {
        1 => values.pop().unwrap_or(JsonValue::Null),
        _ => JsonValue::Array(values),
    }
}

impl ResourceEngine {
    /// Render a cached resource; `None` when it is not cached
    pub fn render(&self, iri: &str, element: &ModelElement, include_writeonly: bool) -> CraftsResult<Option<JsonValue>> {
        self.render_at(iri, element, include_writeonly, 0)
    }

    fn render_at(
        &self,
        iri: &str,
        element: &ModelElement,
        include_writeonly: bool,
        depth: usize,
    ) -> CraftsResult<Option<JsonValue>> {
        if depth > MAX_EMBED_DEPTH {
            return Err(CraftsError::Internal(format!(
                "embedding depth exceeded rendering \"{}\"",
                element.id
            )));
        }
        let Some(entry) = self.resources.get(&element.id, iri) else {
            return Ok(None);
        };

        let mut obj = Map::new();
        obj.insert(IRI_KEY.to_string(), JsonValue::String(iri.to_string()));

        for prop in element.properties() {
            if prop.writeonly() && !include_writeonly {
                continue;
            }
            let values = match entry.get(prop.label()) {
                Some(values) if !values.is_empty() => values,
                _ => continue,
            };

            let rendered = match prop.embedded_target() {
                None => values.iter().map(Value::to_json).collect(),
                Some(target) => {
                    let target = self.element(target)?;
                    let mut nested = Vec::with_capacity(values.len());
                    for id in values.iter().filter_map(Value::as_iri) {
                        let repr = self.render_at(id, target, false, depth + 1)?;
                        nested.push(repr.unwrap_or_else(|| json!({ "iri": id })));
                    }
                    nested
                }
            };
            obj.insert(prop.label().to_string(), collapse(rendered));
        }

        Ok(Some(JsonValue::Object(obj)))
    }
}
