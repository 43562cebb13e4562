//! Namespace compaction of outgoing query text
//!
//! Bracketed IRIs are grouped by their namespace (everything up to the last
//! `/` or `#`) and rewritten as `nX:local` prefixed names, with the matching
//! `PREFIX` declarations prepended. IRIs containing characters some stores
//! reject in prefixed names, or more than one colon, are left untouched.

use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static IRI_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^<>\s]*)>").unwrap());

static LOCAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]([A-Za-z0-9_.\-]*[A-Za-z0-9_\-])?)?$").unwrap());

/// Text preceding an IRI that declares a prefix or base, which must stay bracketed
static DECLARATION_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(PREFIX\s+[A-Za-z0-9_\-.]*:|BASE)\s*$").unwrap());

static DECLARED_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PREFIX\s+([A-Za-z0-9_\-.]*):").unwrap());

/// Minimum position of the namespace separator, counting the opening bracket
const MIN_NAMESPACE_END: usize = 8;

/// Prefix-compact a query
pub fn compact(query: &str) -> String {
    let declared: HashSet<String> = DECLARED_PREFIX
        .captures_iter(query)
        .map(|c| c[1].to_string())
        .collect();

    let mut namespaces: IndexMap<String, String> = IndexMap::new();
    let mut next = 0usize;
    let mut body = String::with_capacity(query.len());

    for (segment, quoted) in split_quoted(query) {
        if quoted {
            body.push_str(segment);
            continue;
        }
        let mut last = 0;
        for caps in IRI_REF.captures_iter(segment) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let iri = &caps[1];
            let before = &segment[..whole.start];
            let replacement = if DECLARATION_TAIL.is_match(before) {
                None
            } else {
                split_namespace(iri).map(|(ns, local)| {
                    let prefix = namespaces.entry(ns.to_string()).or_insert_with(|| loop {
                        let candidate = format!("n{}", next);
                        next += 1;
                        if !declared.contains(&candidate) {
                            break candidate;
                        }
                    });
                    format!("{}:{}", prefix, local)
                })
            };
            body.push_str(&segment[last..whole.start]);
            match replacement {
                Some(short) => body.push_str(&short),
                None => body.push_str(&segment[whole.clone()]),
            }
            last = whole.end;
        }
        body.push_str(&segment[last..]);
    }

    let mut out = String::new();
    for (ns, prefix) in &namespaces {
        out.push_str(&format!("PREFIX {}: <{}>\n", prefix, ns));
    }
    out.push_str(&body);
    out
}

/// Namespace and local part of a compactable IRI
fn split_namespace(iri: &str) -> Option<(&str, &str)> {
    if iri.contains(['&', ',', '(', ')', '"', '\'']) || iri.matches(':').count() > 1 {
        return None;
    }
    let sep = iri.rfind(['/', '#'])?;
    // +1 for the opening bracket
    if sep + 1 <= MIN_NAMESPACE_END {
        return None;
    }
    let (ns, local) = (&iri[..=sep], &iri[sep + 1..]);
    if !LOCAL_NAME.is_match(local) {
        return None;
    }
    Some((ns, local))
}

/// Split query text into alternating unquoted and quoted segments
fn split_quoted(query: &str) -> Vec<(&str, bool)> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in query.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    segments.push((&query[start..i + 1], true));
                    start = i + 1;
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                if start < i {
                    segments.push((&query[start..i], false));
                }
                start = i;
                quote = Some(c);
            }
            None => {}
        }
    }
    if start < query.len() {
        segments.push((&query[start..], quote.is_some()));
    }
    segments
}
