//! SPARQL 1.1 query results, JSON format

use crate::error::{CraftsError, CraftsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Content type requested from stores
pub const RESULTS_JSON: &str = "application/sparql-results+json";

/// Kind of an RDF term in a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
    Uri,
    Literal,
    /// Emitted by some older serializers instead of `literal` + `datatype`
    TypedLiteral,
    Bnode,
}

/// One bound RDF term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: BindingKind,
    pub value: String,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl Binding {
    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            kind: BindingKind::Uri,
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }
}

/// Query solution (variable bindings)
pub type QuerySolution = HashMap<String, Binding>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Head {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solutions {
    #[serde(default)]
    pub bindings: Vec<QuerySolution>,
}

/// SPARQL query results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub head: Head,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Solutions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
}

impl SparqlResults {
    /// Create empty bindings result
    pub fn empty() -> Self {
        Self {
            head: Head::default(),
            results: Some(Solutions::default()),
            boolean: None,
        }
    }

    pub fn from_bindings(vars: Vec<String>, bindings: Vec<QuerySolution>) -> Self {
        Self {
            head: Head { vars },
            results: Some(Solutions { bindings }),
            boolean: None,
        }
    }

    /// Parse a store response body
    pub fn parse(endpoint: &str, body: &[u8]) -> CraftsResult<Self> {
        serde_json::from_slice(body).map_err(|e| CraftsError::MalformedResponse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    pub fn solutions(&self) -> &[QuerySolution] {
        self.results.as_ref().map(|r| r.bindings.as_slice()).unwrap_or(&[])
    }
}
