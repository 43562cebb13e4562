//! API configuration: endpoints, model elements and query templates
//!
//! An [`ApiConfig`] is the JSON document an operator registers for one API.
//! [`ApiConfig::validate`] establishes the guarantees the engine relies on:
//! every endpoint and target reference resolves, labels are unique per
//! element, and the embedding graph is acyclic.

pub mod value;

use crate::error::{CraftsError, CraftsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

pub use value::{LiteralValue, Value, NO_LANG};

/// Reserved key carrying the resource identifier in representations
pub const IRI_KEY: &str = "iri";

/// Predicate used for type declarations
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Complete configuration of one API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub api_id: String,
    pub endpoints: Vec<Endpoint>,
    pub model: Vec<ModelElement>,
    #[serde(default)]
    pub query_templates: Vec<QueryTemplate>,
}

/// HTTP method used to reach an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Credentials presented to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthInfo {
    Basic { user: String, password: String },
    Digest { user: String, password: String },
}

/// A backing store reachable over the SPARQL protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    #[serde(rename = "queryURI", alias = "sparqlURI")]
    pub query_uri: String,
    #[serde(rename = "graphURI", default, skip_serializing_if = "Option::is_none")]
    pub graph_uri: Option<String>,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<AuthInfo>,
    #[serde(alias = "sparqlUpdate", default, skip_serializing_if = "Option::is_none")]
    pub update_endpoint: Option<UpdateEndpoint>,
}

/// Update capability of an endpoint; omitted fields are inherited
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEndpoint {
    #[serde(rename = "queryURI", alias = "sparqlURI", default, skip_serializing_if = "Option::is_none")]
    pub query_uri: Option<String>,
    #[serde(rename = "graphURI", default, skip_serializing_if = "Option::is_none")]
    pub graph_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<AuthInfo>,
    /// Protocol parameter carrying the update text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_param: Option<String>,
}

/// Resolved connection details handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub id: String,
    pub uri: String,
    pub graph: Option<String>,
    pub method: HttpMethod,
    #[serde(skip)]
    pub auth: Option<AuthInfo>,
    pub param: String,
}

impl Endpoint {
    pub fn connection(&self) -> Connection {
        Connection {
            id: self.id.clone(),
            uri: self.query_uri.clone(),
            graph: self.graph_uri.clone(),
            method: self.http_method,
            auth: self.auth_info.clone(),
            param: "query".to_string(),
        }
    }

    /// Update connection, inheriting unset fields from the query side
    pub fn update_connection(&self) -> Option<Connection> {
        let upd = self.update_endpoint.as_ref()?;
        Some(Connection {
            id: format!("{}_update", self.id),
            uri: upd.query_uri.clone().unwrap_or_else(|| self.query_uri.clone()),
            graph: upd.graph_uri.clone().or_else(|| self.graph_uri.clone()),
            method: upd.http_method.unwrap_or(self.http_method),
            auth: upd.auth_info.clone().or_else(|| self.auth_info.clone()),
            param: upd.update_param.clone().unwrap_or_else(|| "query".to_string()),
        })
    }

    pub fn is_updatable(&self) -> bool {
        self.update_endpoint.is_some()
    }
}

/// One resource kind exposed by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelElement {
    pub id: String,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub dprops: Vec<DataProp>,
    #[serde(default)]
    pub oprops: Vec<ObjectProp>,
}

/// Class memberships of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDecl {
    pub label: String,
    pub endpoint: String,
    #[serde(default)]
    pub inferred: bool,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub embed: bool,
    #[serde(default)]
    pub writeonly: bool,
}

/// Literal-valued attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProp {
    pub label: String,
    pub endpoint: String,
    pub iri: String,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub writeonly: bool,
}

/// Relation to another resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectProp {
    pub label: String,
    pub endpoint: String,
    pub iri: String,
    #[serde(default, alias = "inv")]
    pub inverse: bool,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub embed: bool,
    #[serde(default)]
    pub writeonly: bool,
}

/// A labelled member of a model element
#[derive(Debug, Clone, Copy)]
pub enum Property<'a> {
    Type(&'a TypeDecl),
    Data(&'a DataProp),
    Object(&'a ObjectProp),
}

impl<'a> Property<'a> {
    pub fn label(&self) -> &'a str {
        match self {
            Property::Type(t) => &t.label,
            Property::Data(d) => &d.label,
            Property::Object(o) => &o.label,
        }
    }

    pub fn endpoint(&self) -> &'a str {
        match self {
            Property::Type(t) => &t.endpoint,
            Property::Data(d) => &d.endpoint,
            Property::Object(o) => &o.endpoint,
        }
    }

    pub fn writeonly(&self) -> bool {
        match self {
            Property::Type(t) => t.writeonly,
            Property::Data(d) => d.writeonly,
            Property::Object(o) => o.writeonly,
        }
    }

    pub fn restrictions(&self) -> &'a [String] {
        match self {
            Property::Type(t) => &t.restrictions,
            Property::Data(d) => &d.restrictions,
            Property::Object(o) => &o.restrictions,
        }
    }

    /// Target model element of a relation
    pub fn target_id(&self) -> Option<&'a str> {
        match self {
            Property::Type(t) => t.target_id.as_deref(),
            Property::Data(_) => None,
            Property::Object(o) => o.target_id.as_deref(),
        }
    }

    pub fn embed(&self) -> bool {
        match self {
            Property::Type(t) => t.embed,
            Property::Data(_) => false,
            Property::Object(o) => o.embed,
        }
    }

    /// Embedded target, when the relation renders inline
    pub fn embedded_target(&self) -> Option<&'a str> {
        if self.embed() {
            self.target_id()
        } else {
            None
        }
    }

    pub fn predicate(&self) -> &'a str {
        match self {
            Property::Type(_) => RDF_TYPE,
            Property::Data(d) => &d.iri,
            Property::Object(o) => &o.iri,
        }
    }

    pub fn inverse(&self) -> bool {
        matches!(self, Property::Object(o) if o.inverse)
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Property::Data(_))
    }
}

impl ModelElement {
    /// All members: types first, then attributes, then relations
    pub fn properties(&self) -> impl Iterator<Item = Property<'_>> {
        self.types
            .iter()
            .map(Property::Type)
            .chain(self.dprops.iter().map(Property::Data))
            .chain(self.oprops.iter().map(Property::Object))
    }

    pub fn property(&self, label: &str) -> Option<Property<'_>> {
        self.properties().find(|p| p.label() == label)
    }

    /// Relations (types and object properties) pointing at `target`
    pub fn relations_to<'a>(&'a self, target: &'a str) -> impl Iterator<Item = Property<'a>> + 'a {
        self.properties()
            .filter(move |p| !p.is_literal() && p.target_id() == Some(target))
    }
}

/// Declared type of a query template parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Iri,
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    /// Coerce a raw request value to this type
    pub fn coerce(&self, label: &str, raw: &str) -> CraftsResult<JsonValue> {
        let bad = || CraftsError::mismatch(format!("Parameter \"{}\" is not a valid {:?}: \"{}\"", label, self, raw));
        match self {
            ParamType::Iri => {
                value::check_iri(raw).map_err(|_| bad())?;
                Ok(JsonValue::String(raw.to_string()))
            }
            ParamType::String => Ok(JsonValue::String(raw.to_string())),
            ParamType::Integer => raw.parse::<i64>().map(JsonValue::from).map_err(|_| bad()),
            ParamType::Number => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(bad),
            ParamType::Boolean => raw.parse::<bool>().map(JsonValue::Bool).map_err(|_| bad()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParam {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub optional: bool,
}

/// Operator-defined parametrized query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTemplate {
    pub id: String,
    pub endpoint: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<TemplateParam>,
    #[serde(default)]
    pub variables: Vec<String>,
}

impl ApiConfig {
    pub fn from_json(text: &str) -> CraftsResult<Self> {
        serde_json::from_str(text).map_err(|e| CraftsError::InvalidConfig(e.to_string()))
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn element(&self, id: &str) -> Option<&ModelElement> {
        self.model.iter().find(|m| m.id == id)
    }

    pub fn template(&self, id: &str) -> Option<&QueryTemplate> {
        self.query_templates.iter().find(|t| t.id == id)
    }

    /// Load-time checks the engine depends on
    pub fn validate(&self) -> CraftsResult<()> {
        let invalid = |msg: String| Err(CraftsError::InvalidConfig(msg));

        if self.api_id.is_empty() {
            return invalid("The configuration has no apiId".to_string());
        }
        if self.endpoints.is_empty() {
            return invalid("The configuration has NO endpoint".to_string());
        }

        let mut seen = HashSet::new();
        for (i, ep) in self.endpoints.iter().enumerate() {
            if !seen.insert(ep.id.as_str()) {
                return invalid(format!("Duplicate id in endpoints[{}]", i));
            }
            value::check_iri(&ep.query_uri)
                .map_err(|_| CraftsError::InvalidConfig(format!("Wrong queryURI in endpoints[{}]", i)))?;
        }

        let mut seen = HashSet::new();
        for (i, mel) in self.model.iter().enumerate() {
            if !seen.insert(mel.id.as_str()) {
                return invalid(format!("Duplicate id in model[{}]", i));
            }

            let mut labels = HashSet::new();
            for prop in mel.properties() {
                let label = prop.label();
                if label == IRI_KEY {
                    return invalid(format!(
                        "Wrong label name in model[{}]. \"iri\" is forbidden for a label name",
                        i
                    ));
                }
                if !labels.insert(label) {
                    return invalid(format!("Duplicate label \"{}\" in model[{}]", label, i));
                }
                if self.endpoint(prop.endpoint()).is_none() {
                    return invalid(format!("Wrong endpoint in model[{}].{}", i, label));
                }
                if let Some(target) = prop.target_id() {
                    if self.element(target).is_none() {
                        return invalid(format!("Wrong targetId in model[{}].{}", i, label));
                    }
                }
                if prop.embed() && prop.target_id().is_none() {
                    return invalid(format!("Missing targetId in model[{}].{}", i, label));
                }
                value::check_iri(prop.predicate())
                    .map_err(|_| CraftsError::InvalidConfig(format!("Wrong iri in model[{}].{}", i, label)))?;
            }
        }
        self.check_cycles()?;

        let mut seen = HashSet::new();
        for (i, qt) in self.query_templates.iter().enumerate() {
            if !seen.insert(qt.id.as_str()) {
                return invalid(format!("Duplicate id in queryTemplates[{}]", i));
            }
            if self.endpoint(&qt.endpoint).is_none() {
                return invalid(format!("Wrong endpoint in queryTemplates[{}].endpoint", i));
            }
        }

        Ok(())
    }

    /// Depth-first search over embedded relations
    fn check_cycles(&self) -> CraftsResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            config: &'a ApiConfig,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> CraftsResult<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(CraftsError::InvalidConfig(format!(
                        "Cycle in the model! Check embedded relations reaching \"{}\"",
                        id
                    )))
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(mel) = config.element(id) {
                for target in mel.properties().filter_map(|p| p.embedded_target()) {
                    visit(config, target, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for mel in &self.model {
            visit(self, &mel.id, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonValue {
        json!({
            "apiId": "library",
            "endpoints": [
                {
                    "id": "ep1",
                    "sparqlURI": "http://localhost:8890/sparql",
                    "graphURI": "http://example.org/graph",
                    "authInfo": {"type": "digest", "user": "dba", "password": "secret"},
                    "sparqlUpdate": {"httpMethod": "POST"}
                },
                {"id": "ep2", "queryURI": "http://localhost:3030/ds/query"}
            ],
            "model": [
                {
                    "id": "Book",
                    "types": [{"label": "type", "endpoint": "ep1"}],
                    "dprops": [{"label": "title", "endpoint": "ep1", "iri": "http://schema.org/name"}],
                    "oprops": [{"label": "author", "endpoint": "ep2", "iri": "http://schema.org/author",
                                "targetId": "Person", "embed": true}]
                },
                {
                    "id": "Person",
                    "types": [],
                    "dprops": [{"label": "name", "endpoint": "ep2", "iri": "http://xmlns.com/foaf/0.1/name"}],
                    "oprops": [{"label": "wrote", "endpoint": "ep2", "iri": "http://schema.org/author",
                                "inv": true, "targetId": "Book"}]
                }
            ],
            "queryTemplates": [
                {"id": "byTitle", "endpoint": "ep1", "template": "SELECT ?b WHERE { ?b ?p \"{{{title}}}\" }",
                 "parameters": [{"label": "title", "type": "string"}], "variables": ["b"]}
            ]
        })
    }

    fn parse(value: JsonValue) -> ApiConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_and_validate() {
        let config = parse(sample());
        config.validate().unwrap();

        let person = config.element("Person").unwrap();
        let wrote = person.property("wrote").unwrap();
        assert!(wrote.inverse());
        assert_eq!(wrote.embedded_target(), None);
        assert_eq!(config.element("Book").unwrap().property("type").unwrap().predicate(), RDF_TYPE);
    }

    #[test]
    fn test_update_connection_inherits() {
        let config = parse(sample());
        let ep1 = config.endpoint("ep1").unwrap();
        let upd = ep1.update_connection().unwrap();
        assert_eq!(upd.id, "ep1_update");
        assert_eq!(upd.uri, "http://localhost:8890/sparql");
        assert_eq!(upd.graph.as_deref(), Some("http://example.org/graph"));
        assert_eq!(upd.method, HttpMethod::Post);
        assert!(matches!(upd.auth, Some(AuthInfo::Digest { .. })));
        assert_eq!(upd.param, "query");

        assert!(config.endpoint("ep2").unwrap().update_connection().is_none());
    }

    #[test]
    fn test_reserved_and_duplicate_labels() {
        let mut value = sample();
        value["model"][0]["dprops"][0]["label"] = json!("iri");
        assert!(parse(value).validate().is_err());

        let mut value = sample();
        value["model"][0]["dprops"][0]["label"] = json!("author");
        let err = parse(value).validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate label"));
    }

    #[test]
    fn test_dangling_references() {
        let mut value = sample();
        value["model"][0]["dprops"][0]["endpoint"] = json!("nope");
        assert!(parse(value).validate().is_err());

        let mut value = sample();
        value["model"][0]["oprops"][0]["targetId"] = json!("Nobody");
        assert!(parse(value).validate().is_err());

        let mut value = sample();
        value["model"][1]["oprops"][0]["embed"] = json!(true);
        value["model"][1]["oprops"][0].as_object_mut().unwrap().remove("targetId");
        assert!(parse(value).validate().is_err());
    }

    #[test]
    fn test_malformed_predicates_are_rejected() {
        let mut value = sample();
        value["model"][0]["dprops"][0]["iri"] = json!("schema name");
        let err = parse(value).validate().unwrap_err();
        assert!(err.to_string().contains("Wrong iri in model[0].title"));

        let mut value = sample();
        value["model"][1]["oprops"][0]["iri"] = json!("author");
        assert!(parse(value).validate().is_err());
    }

    #[test]
    fn test_embedding_cycle_is_rejected() {
        let mut value = sample();
        value["model"][1]["oprops"][0]["embed"] = json!(true);
        let err = parse(value).validate().unwrap_err();
        assert!(err.to_string().contains("Cycle"));
    }

    #[test]
    fn test_param_coercion() {
        assert_eq!(ParamType::Integer.coerce("n", "12").unwrap(), json!(12));
        assert_eq!(ParamType::Boolean.coerce("b", "true").unwrap(), json!(true));
        assert!(ParamType::Integer.coerce("n", "twelve").is_err());
        assert!(ParamType::Iri.coerce("i", "no spaces allowed").is_err());
    }
}
