//! Patch operations
//!
//! Operations are checked structurally up front ([`parse_operations`]) and
//! then applied one at a time to an in-memory copy of the resource
//! ([`apply`]), each application yielding the values it removed and added.

use super::triples::{check_writable, parse_value, Representation};
use crate::error::{CraftsError, CraftsResult};
use crate::model::{ApiConfig, ModelElement, Property, Value, IRI_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One operation of a patch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

/// Where in a label's value list an operation applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Whole,
    Index(usize),
    Append,
}

/// A structurally valid operation
#[derive(Debug, Clone)]
pub struct ParsedOperation<'a> {
    pub index: usize,
    pub op: PatchOp,
    pub prop: Property<'a>,
    pub position: Position,
    pub values: Vec<Value>,
    pub embedded: Vec<Representation>,
}

/// Values an applied operation took away and put in
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchEffect {
    pub removed: Vec<Value>,
    pub added: Vec<Value>,
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn parse_position(index: usize, op: PatchOp, segment: &str) -> CraftsResult<Position> {
    if segment == "-" {
        return match op {
            PatchOp::Add => Ok(Position::Append),
            _ => Err(CraftsError::patch(index, "\"-\" can only be used to add values")),
        };
    }
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CraftsError::patch(
            index,
            format!("\"{}\" is not a valid array index", segment),
        ));
    }
    segment
        .parse::<usize>()
        .map(Position::Index)
        .map_err(|_| CraftsError::patch(index, format!("\"{}\" is not a valid array index", segment)))
}

/// Check every operation before anything is executed
pub fn parse_operations<'a>(
    config: &ApiConfig,
    element: &'a ModelElement,
    ops: &[PatchOperation],
) -> CraftsResult<Vec<ParsedOperation<'a>>> {
    let mut parsed = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        let segments: Vec<String> = match op.path.strip_prefix('/') {
            Some(rest) => rest.split('/').map(unescape).collect(),
            None => return Err(CraftsError::patch(index, format!("Wrong path \"{}\"", op.path))),
        };
        if segments.len() > 2 {
            return Err(CraftsError::patch(index, format!("Wrong path \"{}\"", op.path)));
        }

        let label = segments[0].as_str();
        if label == IRI_KEY {
            return Err(CraftsError::patch(index, "The iri of a resource cannot be patched"));
        }
        let prop = element
            .property(label)
            .ok_or_else(|| CraftsError::patch(index, format!("Undefined label \"{}\" in model element \"{}\"", label, element.id)))?;
        check_writable(config, prop)?;

        let position = match segments.get(1) {
            Some(segment) => parse_position(index, op.op, segment)?,
            None => Position::Whole,
        };

        let raw: Vec<&JsonValue> = match (op.op, &op.value) {
            (PatchOp::Remove, Some(_)) => {
                return Err(CraftsError::patch(index, "A remove operation takes no value"))
            }
            (PatchOp::Remove, None) => Vec::new(),
            (_, None) => return Err(CraftsError::patch(index, "Missing value")),
            (_, Some(JsonValue::Array(_))) if position != Position::Whole => {
                return Err(CraftsError::patch(index, "A single value is expected at an array position"))
            }
            (_, Some(JsonValue::Array(items))) => items.iter().collect(),
            (_, Some(value)) => vec![value],
        };

        let mut values = Vec::with_capacity(raw.len());
        let mut embedded = Vec::new();
        for item in raw {
            let (value, inline) = parse_value(config, prop, item, 0).map_err(|e| match e {
                CraftsError::ModelMismatch(msg) => CraftsError::patch(index, msg),
                other => other,
            })?;
            embedded.extend(inline);
            if !values.contains(&value) {
                values.push(value);
            }
        }

        parsed.push(ParsedOperation {
            index,
            op: op.op,
            prop,
            position,
            values,
            embedded,
        });
    }
    Ok(parsed)
}

/// Apply one operation to the in-memory state of a resource
///
/// Labels with no values are absent from `state`. On error the state is
/// left untouched.
pub fn apply(state: &mut HashMap<String, Vec<Value>>, op: &ParsedOperation<'_>) -> CraftsResult<PatchEffect> {
    let label = op.prop.label();
    let current = state.get(label).cloned().unwrap_or_default();
    let violation = |msg: String| Err(CraftsError::patch(op.index, msg));
    let in_bounds = |i: usize| {
        if i < current.len() {
            Ok(i)
        } else {
            Err(CraftsError::patch(
                op.index,
                format!("Index {} out of bounds of member {} ({} values)", i, label, current.len()),
            ))
        }
    };
    let single = || {
        op.values
            .first()
            .cloned()
            .ok_or_else(|| CraftsError::patch(op.index, "Missing value"))
    };

    if current.is_empty() && !(op.op == PatchOp::Add && op.position == Position::Whole) {
        return violation(format!("Undefined member {} in the target resource", label));
    }

    let mut next = current.clone();
    match (op.op, op.position) {
        (PatchOp::Add, Position::Whole) => {
            if !current.is_empty() {
                return violation(format!(
                    "The member {} already exists, use an index or \"-\" to add values",
                    label
                ));
            }
            next = op.values.clone();
        }
        (PatchOp::Add, Position::Append) => next.push(single()?),
        (PatchOp::Add, Position::Index(i)) => next.insert(in_bounds(i)?, single()?),
        (PatchOp::Remove, Position::Whole) => next.clear(),
        (PatchOp::Remove, Position::Index(i)) => {
            next.remove(in_bounds(i)?);
        }
        (PatchOp::Replace, Position::Whole) => next = op.values.clone(),
        (PatchOp::Replace, Position::Index(i)) => next[in_bounds(i)?] = single()?,
        (_, Position::Append) => {
            return violation("\"-\" can only be used to add values".to_string());
        }
    }

    let mut deduped: Vec<Value> = Vec::with_capacity(next.len());
    for value in next {
        if !deduped.contains(&value) {
            deduped.push(value);
        }
    }

    let effect = PatchEffect {
        removed: current.iter().filter(|v| !deduped.contains(v)).cloned().collect(),
        added: deduped.iter().filter(|v| !current.contains(v)).cloned().collect(),
    };
    if deduped.is_empty() {
        state.remove(label);
    } else {
        state.insert(label.to_string(), deduped);
    }
    Ok(effect)
}
