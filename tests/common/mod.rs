//! Deterministic in-memory SPARQL endpoint
//!
//! Understands the engine's fixed extraction queries (including prefix
//! compacted forms) plus `INSERT DATA` / `DELETE DATA`. Statements are kept
//! per endpoint URI; named graphs are ignored.

#![allow(dead_code)]

use async_trait::async_trait;
use crafts::gateway::{Binding, BindingKind, QuerySolution};
use crafts::model::Connection;
use crafts::{ApiConfig, ApiRegistry, CraftsError, CraftsResult, QueryGateway, ResourceEngine, SparqlResults, SparqlTransport};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

pub fn xsd(local: &str) -> String {
    format!("{}{}", XSD, local)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Iri(String),
    Literal {
        value: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn iri(iri: &str) -> Self {
        Term::Iri(iri.to_string())
    }

    pub fn plain(value: &str) -> Self {
        Term::Literal {
            value: value.to_string(),
            lang: None,
            datatype: None,
        }
    }

    pub fn tagged(value: &str, lang: &str) -> Self {
        Term::Literal {
            value: value.to_string(),
            lang: Some(lang.to_string()),
            datatype: None,
        }
    }

    pub fn integer(value: i64) -> Self {
        Term::Literal {
            value: value.to_string(),
            lang: None,
            datatype: Some(XSD_INTEGER.to_string()),
        }
    }

    pub fn typed(value: &str, datatype: &str) -> Self {
        Term::Literal {
            value: value.to_string(),
            lang: None,
            datatype: Some(datatype.to_string()),
        }
    }

    fn binding(&self) -> Binding {
        match self {
            Term::Iri(iri) => Binding {
                kind: BindingKind::Uri,
                value: iri.clone(),
                lang: None,
                datatype: None,
            },
            Term::Literal { value, lang, datatype } => Binding {
                kind: BindingKind::Literal,
                value: value.clone(),
                lang: lang.clone(),
                datatype: datatype.clone(),
            },
        }
    }
}

pub type Statement = (String, String, Term);

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Iri(String),
    Literal(Term),
    Var(String),
    Word(String),
    Punct(char),
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut prefixes: HashMap<String, String> = HashMap::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '<' {
            let end = chars[i..].iter().position(|&c| c == '>').map(|p| i + p).unwrap_or(chars.len());
            tokens.push(Token::Iri(chars[i + 1..end].iter().collect()));
            i = end + 1;
        } else if c == '"' {
            let mut value = String::new();
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    i += 1;
                    value.push(match chars[i] {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    value.push(chars[i]);
                }
                i += 1;
            }
            i += 1;
            let mut lang = None;
            let mut datatype = None;
            if i < chars.len() && chars[i] == '@' {
                let start = i + 1;
                i = start;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '-') {
                    i += 1;
                }
                lang = Some(chars[start..i].iter().collect());
            } else if i + 1 < chars.len() && chars[i] == '^' && chars[i + 1] == '^' {
                i += 2;
                if chars[i] == '<' {
                    let end = chars[i..].iter().position(|&c| c == '>').map(|p| i + p).unwrap_or(chars.len());
                    datatype = Some(chars[i + 1..end].iter().collect());
                    i = end + 1;
                } else {
                    let start = i;
                    while i < chars.len() && is_name_char(chars[i]) {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    datatype = Some(expand(&prefixes, &word));
                }
            }
            tokens.push(Token::Literal(Term::Literal { value, lang, datatype }));
        } else if c == '?' {
            let start = i + 1;
            i = start;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Var(chars[start..i].iter().collect()));
        } else if is_name_char(c) {
            let start = i;
            while i < chars.len() && is_name_char(chars[i]) {
                i += 1;
            }
            let mut word: String = chars[start..i].iter().collect();
            let mut trailing_dot = false;
            while word.ends_with('.') {
                word.pop();
                trailing_dot = true;
            }
            // PREFIX name: <ns>
            if matches!(tokens.last(), Some(Token::Word(w)) if w.eq_ignore_ascii_case("PREFIX")) {
                tokens.pop();
                let ns_start = chars[i..].iter().position(|&c| c == '<').map(|p| i + p).unwrap_or(chars.len());
                let ns_end = chars[ns_start..]
                    .iter()
                    .position(|&c| c == '>')
                    .map(|p| ns_start + p)
                    .unwrap_or(chars.len());
                let ns: String = chars[(ns_start + 1).min(ns_end)..ns_end].iter().collect();
                prefixes.insert(word.trim_end_matches(':').to_string(), ns);
                i = ns_end + 1;
                continue;
            }
            if word.contains(':') {
                tokens.push(Token::Iri(expand(&prefixes, &word)));
            } else {
                tokens.push(Token::Word(word));
            }
            if trailing_dot {
                tokens.push(Token::Punct('.'));
            }
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    tokens
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
}

fn expand(prefixes: &HashMap<String, String>, word: &str) -> String {
    match word.split_once(':') {
        Some((prefix, local)) => match prefixes.get(prefix) {
            Some(ns) => format!("{}{}", ns, local),
            None => word.to_string(),
        },
        None => word.to_string(),
    }
}

fn term_of(token: &Token) -> Option<Term> {
    match token {
        Token::Iri(iri) => Some(Term::Iri(iri.clone())),
        Token::Literal(t) => Some(t.clone()),
        _ => None,
    }
}

/// `s p o (, o)* (; p o (, o)*)* .` blocks between braces
fn parse_statements(tokens: &[Token]) -> Vec<Statement> {
    let mut out = Vec::new();
    let mut subject: Option<String> = None;
    let mut predicate: Option<String> = None;
    let mut expect = 0; // 0 subject, 1 predicate, 2 object
    for token in tokens {
        match token {
            Token::Punct('.') | Token::Punct('{') | Token::Punct('}') => {
                subject = None;
                predicate = None;
                expect = 0;
            }
            Token::Punct(';') => {
                predicate = None;
                expect = 1;
            }
            Token::Punct(',') => expect = 2,
            Token::Word(_) => {}
            other => {
                let Some(term) = term_of(other) else { continue };
                match (expect, term) {
                    (0, Term::Iri(s)) => {
                        subject = Some(s);
                        expect = 1;
                    }
                    (1, Term::Iri(p)) => {
                        predicate = Some(p);
                        expect = 2;
                    }
                    (2, o) => {
                        if let (Some(s), Some(p)) = (&subject, &predicate) {
                            out.push((s.clone(), p.clone(), o));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

enum Select {
    /// Types of the filtered resources
    Types(Vec<String>),
    /// Values of a predicate, forward or inverse
    Values {
        predicate: String,
        inverse: bool,
        iris: Vec<String>,
    },
    Other,
}

fn parse_select(tokens: &[Token]) -> Select {
    let Some(start) = tokens.iter().position(|t| matches!(t, Token::Punct('{'))) else {
        return Select::Other;
    };
    let pattern = &tokens[start + 1..];

    let filter_iris = || -> Vec<String> {
        let Some(f) = tokens.iter().position(|t| matches!(t, Token::Word(w) if w == "IN")) else {
            return Vec::new();
        };
        tokens[f + 1..]
            .iter()
            .take_while(|t| !matches!(t, Token::Punct(')')))
            .filter_map(|t| match t {
                Token::Iri(iri) => Some(iri.clone()),
                _ => None,
            })
            .collect()
    };

    match pattern {
        [Token::Var(s), Token::Word(a), ..] if s == "iri" && a == "a" => Select::Types(filter_iris()),
        [Token::Var(s), Token::Iri(p), Token::Var(o), ..] if s == "iri" && o == "value" => Select::Values {
            predicate: p.clone(),
            inverse: false,
            iris: filter_iris(),
        },
        [Token::Var(s), Token::Iri(p), Token::Var(o), ..] if s == "value" && o == "iri" => Select::Values {
            predicate: p.clone(),
            inverse: true,
            iris: filter_iris(),
        },
        _ => Select::Other,
    }
}

/// In-memory SPARQL endpoint
#[derive(Default)]
pub struct MemoryStore {
    stores: Mutex<HashMap<String, BTreeSet<Statement>>>,
    selects: AtomicUsize,
    updates: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    /// Updates numbered from this one on fail
    fail_updates_from: Mutex<Option<usize>>,
    fail_selects: Mutex<bool>,
    canned: Mutex<Vec<(String, SparqlResults)>>,
    received: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, uri: &str, subject: &str, predicate: &str, object: Term) {
        self.stores
            .lock()
            .entry(uri.to_string())
            .or_default()
            .insert((subject.to_string(), predicate.to_string(), object));
    }

    pub fn statements(&self, uri: &str) -> BTreeSet<Statement> {
        self.stores.lock().get(uri).cloned().unwrap_or_default()
    }

    pub fn objects(&self, uri: &str, subject: &str, predicate: &str) -> Vec<Term> {
        self.statements(uri)
            .into_iter()
            .filter(|(s, p, _)| s == subject && p == predicate)
            .map(|(_, _, o)| o)
            .collect()
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn fail_updates_from(&self, n: usize) {
        *self.fail_updates_from.lock() = Some(n);
    }

    pub fn fail_selects(&self, fail: bool) {
        *self.fail_selects.lock() = fail;
    }

    /// Answer any other query containing `needle` with `results`
    pub fn can(&self, needle: &str, results: SparqlResults) {
        self.canned.lock().push((needle.to_string(), results));
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Evaluate a query against the store
    pub fn answer(&self, uri: &str, query: &str) -> SparqlResults {
        let tokens = tokenize(query);
        let statements = self.statements(uri);
        let mut rows: Vec<QuerySolution> = Vec::new();
        let mut push = |iri: &str, var: &str, value: &Term| {
            let mut row = QuerySolution::new();
            row.insert("iri".to_string(), Term::iri(iri).binding());
            row.insert(var.to_string(), value.binding());
            if !rows.contains(&row) {
                rows.push(row);
            }
        };

        match parse_select(&tokens) {
            Select::Types(iris) => {
                for iri in &iris {
                    for (_, _, o) in statements.iter().filter(|(s, p, _)| s == iri && p == RDF_TYPE) {
                        push(iri, "type", o);
                    }
                }
                SparqlResults::from_bindings(vec!["iri".into(), "type".into()], rows)
            }
            Select::Values {
                predicate,
                inverse,
                iris,
            } => {
                for iri in &iris {
                    for (s, _, o) in statements.iter().filter(|(_, p, _)| *p == predicate) {
                        if inverse {
                            if *o == Term::iri(iri) {
                                push(iri, "value", &Term::iri(s));
                            }
                        } else if s == iri {
                            push(iri, "value", o);
                        }
                    }
                }
                SparqlResults::from_bindings(vec!["iri".into(), "value".into()], rows)
            }
            Select::Other => self
                .canned
                .lock()
                .iter()
                .find(|(needle, _)| query.contains(needle.as_str()))
                .map(|(_, results)| results.clone())
                .unwrap_or_else(SparqlResults::empty),
        }
    }

    /// Apply an `INSERT DATA` or `DELETE DATA` request
    pub fn apply(&self, uri: &str, update: &str) {
        let tokens = tokenize(update);
        let insert = tokens
            .iter()
            .any(|t| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case("INSERT")));
        let statements = parse_statements(&tokens);

        let mut stores = self.stores.lock();
        let store = stores.entry(uri.to_string()).or_default();
        for statement in statements {
            if insert {
                store.insert(statement);
            } else {
                store.remove(&statement);
            }
        }
    }
}

#[async_trait]
impl SparqlTransport for MemoryStore {
    async fn select(&self, conn: &Connection, query: &str) -> CraftsResult<SparqlResults> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(query.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_selects.lock() {
            return Err(CraftsError::Endpoint {
                endpoint: conn.id.clone(),
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(self.answer(&conn.uri, query))
    }

    async fn update(&self, conn: &Connection, update: &str) -> CraftsResult<()> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(update.to_string());
        let fail_from = *self.fail_updates_from.lock();
        if fail_from.map(|from| n >= from).unwrap_or(false) {
            return Err(CraftsError::Endpoint {
                endpoint: conn.id.clone(),
                status: 500,
                message: "update rejected".into(),
            });
        }
        self.apply(&conn.uri, update);
        Ok(())
    }
}

pub const STORE: &str = "http://localhost/library/sparql";
pub const READONLY_STORE: &str = "http://localhost/catalog/sparql";
pub const SCHEMA: &str = "http://schema.org/";

pub fn schema(local: &str) -> String {
    format!("{}{}", SCHEMA, local)
}

/// Books, persons and a read-only catalog
pub fn library_config() -> serde_json::Value {
    serde_json::json!({
        "apiId": "library",
        "endpoints": [
            {"id": "lib", "queryURI": STORE, "updateEndpoint": {}},
            {"id": "catalog", "queryURI": READONLY_STORE}
        ],
        "model": [
            {
                "id": "Book",
                "types": [{"label": "types", "endpoint": "lib"}],
                "dprops": [
                    {"label": "title", "endpoint": "lib", "iri": schema("name")},
                    {"label": "pages", "endpoint": "lib", "iri": schema("numberOfPages")},
                    {"label": "tags", "endpoint": "lib", "iri": schema("keywords")},
                    {"label": "isbn", "endpoint": "catalog", "iri": schema("isbn")},
                    {"label": "notes", "endpoint": "lib", "iri": schema("comment"), "writeonly": true}
                ],
                "oprops": [
                    {"label": "author", "endpoint": "lib", "iri": schema("author"), "targetId": "Person"},
                    {"label": "publisher", "endpoint": "lib", "iri": schema("publisher"), "targetId": "Organization", "embed": true}
                ]
            },
            {
                "id": "Person",
                "dprops": [{"label": "name", "endpoint": "lib", "iri": schema("name")}],
                "oprops": [
                    {"label": "works", "endpoint": "lib", "iri": schema("author"), "inverse": true, "targetId": "Book"}
                ]
            },
            {
                "id": "Organization",
                "dprops": [{"label": "name", "endpoint": "lib", "iri": schema("legalName")}]
            }
        ],
        "queryTemplates": [
            {
                "id": "booksBy",
                "endpoint": "lib",
                "template": "SELECT ?book WHERE { ?book <http://schema.org/author> <{{{author}}}> } LIMIT {{limit}}",
                "parameters": [
                    {"label": "author", "type": "iri"},
                    {"label": "limit", "type": "integer", "optional": true}
                ],
                "variables": ["book"]
            }
        ]
    })
}

pub fn library(store: &Arc<MemoryStore>) -> Arc<ResourceEngine> {
    library_with(store, library_config())
}

pub fn library_with(store: &Arc<MemoryStore>, config: serde_json::Value) -> Arc<ResourceEngine> {
    let gateway = QueryGateway::new(store.clone()).unwrap();
    let registry = ApiRegistry::new(Arc::new(gateway));
    let config: ApiConfig = serde_json::from_value(config).unwrap();
    registry.create_api(config).unwrap()
}

/// A book with one author, a publisher and two tags
pub fn seed_dune(store: &MemoryStore) {
    let book = "http://ex.org/book/dune";
    store.insert(STORE, book, RDF_TYPE, Term::iri(&schema("Book")));
    store.insert(STORE, book, &schema("name"), Term::tagged("Dune", "en"));
    store.insert(STORE, book, &schema("numberOfPages"), Term::integer(412));
    store.insert(STORE, book, &schema("keywords"), Term::tagged("desert", "en"));
    store.insert(STORE, book, &schema("keywords"), Term::tagged("spice", "en"));
    store.insert(STORE, book, &schema("author"), Term::iri("http://ex.org/person/herbert"));
    store.insert(STORE, book, &schema("publisher"), Term::iri("http://ex.org/org/chilton"));
    store.insert(STORE, book, &schema("comment"), Term::plain("internal"));
    store.insert(READONLY_STORE, book, &schema("isbn"), Term::plain("978-0441013593"));

    store.insert(STORE, "http://ex.org/person/herbert", &schema("name"), Term::plain("Frank Herbert"));
    store.insert(STORE, "http://ex.org/org/chilton", &schema("legalName"), Term::plain("Chilton Books"));
}
