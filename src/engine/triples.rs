//! Triple construction and per-endpoint grouping
//!
//! Request bodies are parsed into typed [`Representation`]s once; both the
//! insert set (from a body) and the delete set (from cached values) are then
//! built from typed [`Value`]s by the same code.

use crate::error::{CraftsError, CraftsResult};
use crate::model::value::{check_iri, iri_term};
use crate::model::{ApiConfig, LiteralValue, ModelElement, Property, Value, IRI_KEY};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::extract::MAX_EMBED_DEPTH;

/// One statement, each position already a SPARQL term
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    /// Statement asserting `value` for `prop` on `iri`; inverse relations
    /// swap subject and object
    pub fn build(iri: &str, prop: Property<'_>, value: &Value) -> CraftsResult<Self> {
        let subject = iri_term(iri)?;
        let predicate = iri_term(prop.predicate())?;
        let object = match value {
            Value::Iri(target) => iri_term(target)?,
            Value::Literal(lit) => lit.to_term()?,
        };
        if prop.inverse() && matches!(value, Value::Iri(_)) {
            Ok(Self {
                subject: object,
                predicate,
                object: subject,
            })
        } else {
            Ok(Self {
                subject,
                predicate,
                object,
            })
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Triples grouped by endpoint id, sorted and de-duplicated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripleSet {
    groups: BTreeMap<String, BTreeSet<Triple>>,
}

impl TripleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, endpoint: &str, triple: Triple) {
        self.groups.entry(endpoint.to_string()).or_default().insert(triple);
    }

    pub fn extend(&mut self, other: TripleSet) {
        for (endpoint, triples) in other.groups {
            self.groups.entry(endpoint).or_default().extend(triples);
        }
    }

    /// Add the statements for `values` of `prop` on `iri`
    pub fn add_values(&mut self, iri: &str, prop: Property<'_>, values: &[Value]) -> CraftsResult<()> {
        for value in values {
            self.insert(prop.endpoint(), Triple::build(iri, prop, value)?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-empty groups in endpoint order
    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeSet<Triple>)> {
        self.groups
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(e, t)| (e.as_str(), t))
    }
}

/// `INSERT DATA` / `DELETE DATA` request for one endpoint
pub fn update_request(insert: bool, triples: &BTreeSet<Triple>, graph: Option<&str>) -> CraftsResult<String> {
    let mut body = String::new();
    let mut prev: Option<&Triple> = None;
    for triple in triples {
        match prev {
            None => body.push_str(&format!(" {} {} {}", triple.subject, triple.predicate, triple.object)),
            Some(p) if p.subject != triple.subject => {
                body.push_str(&format!(" .\n {} {} {}", triple.subject, triple.predicate, triple.object))
            }
            Some(p) if p.predicate == triple.predicate => body.push_str(&format!(" ,\n    {}", triple.object)),
            Some(_) => body.push_str(&format!(" ;\n  {} {}", triple.predicate, triple.object)),
        }
        prev = Some(triple);
    }
    body.push_str(" .");

    let op = if insert { "INSERT DATA" } else { "DELETE DATA" };
    Ok(match graph {
        Some(g) => format!("{} {{\n GRAPH {} {{\n{}\n }}\n}}", op, iri_term(g)?, body),
        None => format!("{} {{\n{}\n}}", op, body),
    })
}

/// A validated request body for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub iri: String,
    pub element: String,
    /// Labels in body order with their typed values
    pub values: Vec<(String, Vec<Value>)>,
    /// Embedded resources described inline
    pub embedded: Vec<Representation>,
}

impl Representation {
    /// Parse and validate a body addressed to `iri`
    ///
    /// The body's own `iri`, when present, must match.
    pub fn parse(config: &ApiConfig, element: &ModelElement, iri: &str, body: &JsonValue) -> CraftsResult<Self> {
        Self::parse_at(config, element, Some(iri), body, 0)
    }

    fn parse_at(
        config: &ApiConfig,
        element: &ModelElement,
        expected: Option<&str>,
        body: &JsonValue,
        depth: usize,
    ) -> CraftsResult<Self> {
        if depth > MAX_EMBED_DEPTH {
            return Err(CraftsError::Internal("embedded body nested too deeply".to_string()));
        }
        let obj = body
            .as_object()
            .ok_or_else(|| CraftsError::mismatch(format!("The representation of a \"{}\" must be an object", element.id)))?;

        let iri = match (obj.get(IRI_KEY), expected) {
            (Some(JsonValue::String(given)), Some(exp)) if given != exp => {
                return Err(CraftsError::mismatch(format!(
                    "The iri \"{}\" of the representation does not match the requested resource \"{}\"",
                    given, exp
                )))
            }
            (Some(JsonValue::String(given)), _) => given.clone(),
            (Some(_), _) => return Err(CraftsError::mismatch("The iri of the representation must be a string")),
            (None, Some(exp)) => exp.to_string(),
            (None, None) => {
                return Err(CraftsError::mismatch(format!(
                    "Embedded \"{}\" representation without iri",
                    element.id
                )))
            }
        };
        check_iri(&iri)?;

        let mut values = Vec::new();
        let mut embedded = Vec::new();
        for (label, raw) in obj {
            if label == IRI_KEY {
                continue;
            }
            let prop = element.property(label).ok_or_else(|| {
                CraftsError::mismatch(format!("Undefined label \"{}\" in model element \"{}\"", label, element.id))
            })?;
            check_writable(config, prop)?;

            let items: Vec<&JsonValue> = match raw {
                JsonValue::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            let mut typed = Vec::with_capacity(items.len());
            for item in items {
                let (value, inline) = parse_value(config, prop, item, depth)?;
                if let Some(inline) = inline {
                    embedded.push(inline);
                }
                if !typed.contains(&value) {
                    typed.push(value);
                }
            }
            values.push((label.clone(), typed));
        }

        Ok(Self {
            iri,
            element: element.id.clone(),
            values,
            embedded,
        })
    }

    /// Values given for `label`, if the body mentions it
    pub fn get(&self, label: &str) -> Option<&[Value]> {
        self.values
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_slice())
    }

    /// Statements to insert, embedded resources included
    pub fn insert_triples(&self, config: &ApiConfig) -> CraftsResult<TripleSet> {
        let element = config
            .element(&self.element)
            .ok_or_else(|| CraftsError::Internal(format!("unknown element \"{}\"", self.element)))?;
        let mut set = TripleSet::new();
        for (label, values) in &self.values {
            if let Some(prop) = element.property(label) {
                set.add_values(&self.iri, prop, values)?;
            }
        }
        for inline in &self.embedded {
            set.extend(inline.insert_triples(config)?);
        }
        Ok(set)
    }
}

/// Reject writes through endpoints without update support
pub fn check_writable(config: &ApiConfig, prop: Property<'_>) -> CraftsResult<()> {
    let endpoint = config
        .endpoint(prop.endpoint())
        .ok_or_else(|| CraftsError::Internal(format!("unresolved endpoint \"{}\"", prop.endpoint())))?;
    if endpoint.is_updatable() {
        Ok(())
    } else {
        Err(CraftsError::WriteCapability {
            label: prop.label().to_string(),
            endpoint: endpoint.id.clone(),
        })
    }
}

/// Parse one body value for `prop`; relations may carry an embedded resource
pub fn parse_value(
    config: &ApiConfig,
    prop: Property<'_>,
    raw: &JsonValue,
    depth: usize,
) -> CraftsResult<(Value, Option<Representation>)> {
    if prop.is_literal() {
        let lit = LiteralValue::from_json(raw).ok_or_else(|| {
            CraftsError::mismatch(format!(
                "Wrong value for \"{}\": expected a string, a number or an object with a single language tag",
                prop.label()
            ))
        })?;
        return Ok((Value::Literal(lit), None));
    }

    match raw {
        JsonValue::String(iri) => {
            check_iri(iri)?;
            Ok((Value::Iri(iri.clone()), None))
        }
        JsonValue::Object(_) => {
            let target = prop.target_id().ok_or_else(|| {
                CraftsError::mismatch(format!(
                    "\"{}\" has no target model element, embedded objects are not allowed",
                    prop.label()
                ))
            })?;
            let element = config
                .element(target)
                .ok_or_else(|| CraftsError::Internal(format!("unknown element \"{}\"", target)))?;
            let inline = Representation::parse_at(config, element, None, raw, depth + 1)?;
            Ok((Value::Iri(inline.iri.clone()), Some(inline)))
        }
        _ => Err(CraftsError::mismatch(format!(
            "Wrong value for \"{}\": expected an IRI or an embedded object",
            prop.label()
        ))),
    }
}
