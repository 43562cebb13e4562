//! Tagged values held in the resource cache
//!
//! Literal typing is decided once, when a binding is ingested from a store or
//! a body value is parsed, and consumed uniformly afterwards by the formatter
//! and the triple builder.

use crate::error::{CraftsError, CraftsResult};
use crate::gateway::results::{Binding, BindingKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use oxrdf::vocab::xsd;
use oxrdf::{Literal, NamedNode};
use serde_json::{Map, Number, Value as JsonValue};

/// Sentinel language tag used for literals without a language
pub const NO_LANG: &str = "nolang";

/// XSD datatypes the stores report for numeric literals
const NUMERIC_DATATYPES: &[&str] = &[
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#decimal",
    "http://www.w3.org/2001/XMLSchema#double",
    "http://www.w3.org/2001/XMLSchema#float",
    "http://www.w3.org/2001/XMLSchema#int",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#short",
    "http://www.w3.org/2001/XMLSchema#byte",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
    "http://www.w3.org/2001/XMLSchema#nonPositiveInteger",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#negativeInteger",
    "http://www.w3.org/2001/XMLSchema#unsignedLong",
    "http://www.w3.org/2001/XMLSchema#unsignedInt",
    "http://www.w3.org/2001/XMLSchema#unsignedShort",
    "http://www.w3.org/2001/XMLSchema#unsignedByte",
];

/// Lexical form and datatype of a literal exactly as a store returned it
#[derive(Debug, Clone)]
pub struct StoredForm {
    pub lexical: String,
    /// `None` for untyped legacy "typed-literal" bindings
    pub datatype: Option<String>,
}

/// A literal attribute value
///
/// Values ingested from a store remember their stored form so that a delete
/// names the very term the store holds. Values parsed from a request body
/// derive their datatype from the JSON shape. Equality is RDF term equality.
#[derive(Debug, Clone)]
pub enum LiteralValue {
    /// String without language tag, rendered as `{"nolang": value}`
    Plain(String),
    /// Language-tagged string, rendered as `{lang: value}`
    Tagged { lang: String, value: String },
    /// Numeric literal, rendered as a JSON number
    Numeric { number: Number, stored: Option<StoredForm> },
    /// Date or date-time literal, rendered as a bare string
    Date { value: String, datatype: Option<String> },
    /// Literal of any other datatype, rendered like a plain string
    Typed { lexical: String, datatype: String },
}

/// A cached value: either a resource identifier or a literal
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Iri(String),
    Literal(LiteralValue),
}

impl Value {
    /// The resource identifier, if this is a relation value
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Value::Iri(iri) => Some(iri),
            Value::Literal(_) => None,
        }
    }

    /// Output form used by the representation formatter
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Iri(iri) => JsonValue::String(iri.clone()),
            Value::Literal(lit) => lit.to_json(),
        }
    }

    /// Ingest a relation binding; only IRIs are kept
    pub fn relation_from_binding(binding: &Binding) -> Option<Value> {
        match binding.kind {
            BindingKind::Uri => Some(Value::Iri(binding.value.clone())),
            _ => None,
        }
    }

    /// Ingest an attribute binding; IRIs and blank nodes are dropped
    pub fn literal_from_binding(binding: &Binding) -> Option<Value> {
        LiteralValue::from_binding(binding).map(Value::Literal)
    }
}

impl LiteralValue {
    /// Classify a literal binding from a SPARQL JSON result
    pub fn from_binding(binding: &Binding) -> Option<LiteralValue> {
        match binding.kind {
            BindingKind::Literal | BindingKind::TypedLiteral => {}
            BindingKind::Uri | BindingKind::Bnode => return None,
        }

        if let Some(lang) = &binding.lang {
            return Some(LiteralValue::Tagged {
                lang: lang.clone(),
                value: binding.value.clone(),
            });
        }

        let lexical = &binding.value;
        let stored = |datatype: Option<&str>| StoredForm {
            lexical: lexical.clone(),
            datatype: datatype.map(str::to_string),
        };
        let literal = match binding.datatype.as_deref() {
            Some(dt) if NUMERIC_DATATYPES.contains(&dt) => match parse_number(lexical) {
                Some(number) => LiteralValue::Numeric {
                    number,
                    stored: Some(stored(Some(dt))),
                },
                None => LiteralValue::Typed {
                    lexical: lexical.clone(),
                    datatype: dt.to_string(),
                },
            },
            Some(dt) if dt == xsd::DATE_TIME.as_str() || dt == xsd::DATE.as_str() => LiteralValue::Date {
                value: lexical.clone(),
                datatype: Some(dt.to_string()),
            },
            Some(dt) if dt == xsd::STRING.as_str() => LiteralValue::Plain(lexical.clone()),
            Some(dt) => LiteralValue::Typed {
                lexical: lexical.clone(),
                datatype: dt.to_string(),
            },
            // legacy result serializers report numbers as untyped "typed-literal"
            None if binding.kind == BindingKind::TypedLiteral => match parse_number(lexical) {
                Some(number) => LiteralValue::Numeric {
                    number,
                    stored: Some(stored(None)),
                },
                None => LiteralValue::Plain(lexical.clone()),
            },
            None => LiteralValue::Plain(lexical.clone()),
        };
        Some(literal)
    }

    /// Parse a literal from a request body value
    pub fn from_json(value: &JsonValue) -> Option<LiteralValue> {
        match value {
            JsonValue::String(s) if looks_like_date(s) => Some(LiteralValue::Date {
                value: s.clone(),
                datatype: None,
            }),
            JsonValue::String(s) => Some(LiteralValue::Plain(s.clone())),
            JsonValue::Number(n) => Some(LiteralValue::Numeric {
                number: n.clone(),
                stored: None,
            }),
            JsonValue::Object(map) if map.len() == 1 => {
                let (lang, text) = map.iter().next()?;
                let text = text.as_str()?;
                if lang == NO_LANG {
                    Some(LiteralValue::Plain(text.to_string()))
                } else {
                    Some(LiteralValue::Tagged {
                        lang: lang.clone(),
                        value: text.to_string(),
                    })
                }
            }
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            LiteralValue::Plain(value) => {
                let mut map = Map::new();
                map.insert(NO_LANG.to_string(), JsonValue::String(value.clone()));
                JsonValue::Object(map)
            }
            LiteralValue::Tagged { lang, value } => {
                let mut map = Map::new();
                map.insert(lang.clone(), JsonValue::String(value.clone()));
                JsonValue::Object(map)
            }
            LiteralValue::Numeric { number, .. } => JsonValue::Number(number.clone()),
            LiteralValue::Date { value, .. } => JsonValue::String(value.clone()),
            LiteralValue::Typed { lexical, .. } => {
                let mut map = Map::new();
                map.insert(NO_LANG.to_string(), JsonValue::String(lexical.clone()));
                JsonValue::Object(map)
            }
        }
    }

    /// SPARQL term for this literal, escaped by oxrdf
    pub fn to_term(&self) -> CraftsResult<String> {
        Ok(self.to_literal()?.to_string())
    }

    fn to_literal(&self) -> CraftsResult<Literal> {
        let literal = match self {
            LiteralValue::Plain(value) => Literal::new_simple_literal(value.as_str()),
            LiteralValue::Tagged { lang, value } => {
                Literal::new_language_tagged_literal(value.as_str(), lang.as_str())
                    .map_err(|e| CraftsError::mismatch(format!("Invalid language tag \"{}\": {}", lang, e)))?
            }
            LiteralValue::Numeric {
                stored: Some(StoredForm { lexical, datatype }),
                ..
            } => match datatype {
                Some(dt) => Literal::new_typed_literal(lexical.as_str(), datatype_node(dt)?),
                None => Literal::new_simple_literal(lexical.as_str()),
            },
            LiteralValue::Numeric { number, stored: None } => {
                let datatype = if number.is_f64() { xsd::DOUBLE } else { xsd::INTEGER };
                Literal::new_typed_literal(number.to_string(), NamedNode::from(datatype))
            }
            LiteralValue::Date {
                value,
                datatype: Some(dt),
            } => Literal::new_typed_literal(value.as_str(), datatype_node(dt)?),
            LiteralValue::Date { value, datatype: None } => {
                let datatype = if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
                    xsd::DATE
                } else {
                    xsd::DATE_TIME
                };
                Literal::new_typed_literal(value.as_str(), NamedNode::from(datatype))
            }
            LiteralValue::Typed { lexical, datatype } => {
                Literal::new_typed_literal(lexical.as_str(), datatype_node(datatype)?)
            }
        };
        Ok(literal)
    }
}

impl PartialEq for LiteralValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_literal(), other.to_literal()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.to_json() == other.to_json(),
        }
    }
}

fn datatype_node(datatype: &str) -> CraftsResult<NamedNode> {
    NamedNode::new(datatype)
        .map_err(|e| CraftsError::Internal(format!("Stored datatype \"{}\" is not an IRI: {}", datatype, e)))
}

fn parse_number(lexical: &str) -> Option<Number> {
    if let Ok(i) = lexical.parse::<i64>() {
        return Some(Number::from(i));
    }
    lexical.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Whether a body string should be written as a date literal
pub fn looks_like_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Render a resource identifier as a SPARQL term, validating it
pub fn iri_term(iri: &str) -> CraftsResult<String> {
    NamedNode::new(iri)
        .map(|node| node.to_string())
        .map_err(|e| CraftsError::mismatch(format!("\"{}\" is not a well-formed IRI: {}", iri, e)))
}

/// Validate a resource identifier
pub fn check_iri(iri: &str) -> CraftsResult<()> {
    iri_term(iri).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn literal(value: &str, lang: Option<&str>, datatype: Option<&str>, kind: BindingKind) -> Binding {
        Binding {
            kind,
            value: value.to_string(),
            lang: lang.map(str::to_string),
            datatype: datatype.map(str::to_string),
        }
    }

    #[test]
    fn test_numeric_literals_become_numbers() {
        let b = literal("42", None, Some("http://www.w3.org/2001/XMLSchema#integer"), BindingKind::Literal);
        assert_eq!(LiteralValue::from_binding(&b).unwrap().to_json(), json!(42));

        let legacy = literal("2.5", None, None, BindingKind::TypedLiteral);
        assert_eq!(LiteralValue::from_binding(&legacy).unwrap().to_json(), json!(2.5));
    }

    #[test]
    fn test_stored_literals_keep_their_term() {
        let decimal = literal("2.50", None, Some("http://www.w3.org/2001/XMLSchema#decimal"), BindingKind::Literal);
        let value = LiteralValue::from_binding(&decimal).unwrap();
        assert_eq!(value.to_json(), json!(2.5));
        assert_eq!(
            value.to_term().unwrap(),
            "\"2.50\"^^<http://www.w3.org/2001/XMLSchema#decimal>"
        );

        let boolean = literal("true", None, Some("http://www.w3.org/2001/XMLSchema#boolean"), BindingKind::Literal);
        let value = LiteralValue::from_binding(&boolean).unwrap();
        assert_eq!(value.to_json(), json!({"nolang": "true"}));
        assert_eq!(
            value.to_term().unwrap(),
            "\"true\"^^<http://www.w3.org/2001/XMLSchema#boolean>"
        );

        let legacy = literal("7", None, None, BindingKind::TypedLiteral);
        assert_eq!(LiteralValue::from_binding(&legacy).unwrap().to_term().unwrap(), "\"7\"");
    }

    #[test]
    fn test_equality_follows_rdf_terms() {
        let integer = literal("412", None, Some("http://www.w3.org/2001/XMLSchema#integer"), BindingKind::Literal);
        let int = literal("412", None, Some("http://www.w3.org/2001/XMLSchema#int"), BindingKind::Literal);
        let body = LiteralValue::from_json(&json!(412)).unwrap();

        assert_eq!(LiteralValue::from_binding(&integer).unwrap(), body);
        assert_ne!(LiteralValue::from_binding(&int).unwrap(), body);
    }

    #[test]
    fn test_plain_and_tagged_literals_are_wrapped() {
        let plain = literal("Foo", None, None, BindingKind::Literal);
        assert_eq!(LiteralValue::from_binding(&plain).unwrap().to_json(), json!({"nolang": "Foo"}));

        let tagged = literal("Hola", Some("es"), None, BindingKind::Literal);
        assert_eq!(LiteralValue::from_binding(&tagged).unwrap().to_json(), json!({"es": "Hola"}));
    }

    #[test]
    fn test_non_literals_are_not_attributes() {
        let uri = literal("http://x/1", None, None, BindingKind::Uri);
        assert!(Value::literal_from_binding(&uri).is_none());
        assert_eq!(Value::relation_from_binding(&uri), Some(Value::Iri("http://x/1".to_string())));
    }

    #[test]
    fn test_body_values_to_terms() {
        let plain = LiteralValue::from_json(&json!("Foo")).unwrap();
        assert_eq!(plain.to_term().unwrap(), "\"Foo\"");

        let tagged = LiteralValue::from_json(&json!({"en": "Hello"})).unwrap();
        assert_eq!(tagged.to_term().unwrap(), "\"Hello\"@en");

        let sentinel = LiteralValue::from_json(&json!({"nolang": "Bar"})).unwrap();
        assert_eq!(sentinel, LiteralValue::Plain("Bar".to_string()));

        let date = LiteralValue::from_json(&json!("2021-03-05")).unwrap();
        assert_eq!(
            date.to_term().unwrap(),
            "\"2021-03-05\"^^<http://www.w3.org/2001/XMLSchema#date>"
        );

        let number = LiteralValue::from_json(&json!(7)).unwrap();
        assert_eq!(
            number.to_term().unwrap(),
            "\"7\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let plain = LiteralValue::Plain("say \"hi\"".to_string());
        assert_eq!(plain.to_term().unwrap(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_rejected_body_shapes() {
        assert!(LiteralValue::from_json(&json!(true)).is_none());
        assert!(LiteralValue::from_json(&json!({"en": "a", "es": "b"})).is_none());
        assert!(LiteralValue::from_json(&json!({"en": {"nested": 1}})).is_none());
        assert!(LiteralValue::from_json(&json!(null)).is_none());
    }

    #[test]
    fn test_iri_validation() {
        assert!(check_iri("http://x/1").is_ok());
        assert!(check_iri("not an iri").is_err());
    }
}
