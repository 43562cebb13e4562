//! Resource Cache
//!
//! One table per model element, keyed by resource identifier. Each entry
//! records, per label, either the resolved values or an in-flight marker.
//! A label is claimed synchronously, before the claimant awaits anything, so
//! concurrent readers find the marker and wait on it instead of querying the
//! store a second time.

use super::SweepSummary;
use crate::model::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

enum LabelSlot {
    Ready(Vec<Value>),
    Pending { token: u64, done: watch::Receiver<bool> },
}

/// Cached state of one resource
pub struct CacheEntry {
    cached_at: DateTime<Utc>,
    labels: HashMap<String, LabelSlot>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            cached_at: Utc::now(),
            labels: HashMap::new(),
        }
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Resolved values of a label; `None` while absent or in flight
    pub fn values(&self, label: &str) -> Option<&[Value]> {
        match self.labels.get(label) {
            Some(LabelSlot::Ready(values)) => Some(values),
            _ => None,
        }
    }

    fn in_flight(&self) -> bool {
        self.labels
            .values()
            .any(|slot| matches!(slot, LabelSlot::Pending { .. }))
    }

    /// Resolved labels, cloned out of the cache
    fn snapshot(&self) -> HashMap<String, Vec<Value>> {
        self.labels
            .iter()
            .filter_map(|(label, slot)| match slot {
                LabelSlot::Ready(values) => Some((label.clone(), values.clone())),
                LabelSlot::Pending { .. } => None,
            })
            .collect()
    }
}

type Table = HashMap<String, CacheEntry>;

/// Per-API resource cache
pub struct ResourceCache {
    tables: Mutex<HashMap<String, Table>>,
    next_token: AtomicU64,
}

/// Exclusive right to resolve one label for a set of resources
///
/// Dropping a lease that was not fulfilled releases its markers, which
/// wakes the waiters so they can claim the label themselves.
pub struct LabelLease<'a> {
    cache: &'a ResourceCache,
    element: String,
    label: String,
    iris: Vec<String>,
    token: u64,
    done: watch::Sender<bool>,
}

/// Result of claiming labels for a set of resources
pub struct Claim<'a> {
    pub leases: Vec<LabelLease<'a>>,
    pub waits: Vec<watch::Receiver<bool>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Claim every `(iri, label)` pair not yet resolved or in flight
    ///
    /// Entries are created here, before any query runs.
    pub fn claim(&self, element: &str, iris: &[String], labels: &[&str]) -> Claim<'_> {
        let mut tables = self.tables.lock();
        let table = tables.entry(element.to_string()).or_default();

        let mut leases = Vec::new();
        let mut waits = Vec::new();
        for label in labels {
            let mut owned = Vec::new();
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = watch::channel(false);

            for iri in iris {
                let entry = table.entry(iri.clone()).or_insert_with(CacheEntry::new);
                match entry.labels.get(*label) {
                    Some(LabelSlot::Ready(_)) => {}
                    Some(LabelSlot::Pending { done, .. }) => waits.push(done.clone()),
                    None => {
                        entry.labels.insert(
                            label.to_string(),
                            LabelSlot::Pending {
                                token,
                                done: rx.clone(),
                            },
                        );
                        owned.push(iri.clone());
                    }
                }
            }

            if !owned.is_empty() {
                leases.push(LabelLease {
                    cache: self,
                    element: element.to_string(),
                    label: label.to_string(),
                    iris: owned,
                    token,
                    done: tx,
                });
            }
        }

        Claim { leases, waits }
    }

    /// Cloned resolved labels of an entry, `None` if the entry is absent
    pub fn get(&self, element: &str, iri: &str) -> Option<HashMap<String, Vec<Value>>> {
        let tables = self.tables.lock();
        tables.get(element)?.get(iri).map(CacheEntry::snapshot)
    }

    /// Resolved values of one label
    pub fn values(&self, element: &str, iri: &str, label: &str) -> Option<Vec<Value>> {
        let tables = self.tables.lock();
        tables
            .get(element)?
            .get(iri)?
            .values(label)
            .map(<[Value]>::to_vec)
    }

    pub fn contains(&self, element: &str, iri: &str) -> bool {
        let tables = self.tables.lock();
        tables.get(element).map(|t| t.contains_key(iri)).unwrap_or(false)
    }

    pub fn cached_at(&self, element: &str, iri: &str) -> Option<DateTime<Utc>> {
        let tables = self.tables.lock();
        tables.get(element)?.get(iri).map(CacheEntry::cached_at)
    }

    /// Identifiers of cached `element` resources whose resolved `labels`
    /// contain `iri` as a relation value
    pub fn referencing(&self, element: &str, labels: &[&str], iri: &str) -> Vec<String> {
        let tables = self.tables.lock();
        let Some(table) = tables.get(element) else {
            return Vec::new();
        };
        table
            .iter()
            .filter(|(_, entry)| {
                labels.iter().any(|label| {
                    entry
                        .values(label)
                        .map(|vals| vals.iter().any(|v| v.as_iri() == Some(iri)))
                        .unwrap_or(false)
                })
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Evict one entry, returning whether it existed
    pub fn evict(&self, element: &str, iri: &str) -> bool {
        let mut tables = self.tables.lock();
        tables
            .get_mut(element)
            .map(|t| t.remove(iri).is_some())
            .unwrap_or(false)
    }

    /// Evict a set of `(element, iri)` entries
    pub fn evict_all(&self, targets: &HashSet<(String, String)>) -> usize {
        let mut tables = self.tables.lock();
        let mut evicted = 0;
        for (element, iri) in targets {
            if let Some(table) = tables.get_mut(element) {
                if table.remove(iri).is_some() {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.tables.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries created before `threshold`; entries still being
    /// resolved are kept
    pub fn sweep(&self, threshold: DateTime<Utc>) -> SweepSummary {
        let mut tables = self.tables.lock();
        let mut summary = SweepSummary::default();
        for table in tables.values_mut() {
            summary.inspected += table.len();
            let before = table.len();
            table.retain(|_, entry| entry.cached_at >= threshold || entry.in_flight());
            summary.cleaned += before - table.len();
        }
        summary
    }

    fn settle(&self, element: &str, label: &str, token: u64, mut staged: Option<HashMap<String, Vec<Value>>>, iris: &[String]) {
        let mut tables = self.tables.lock();
        let Some(table) = tables.get_mut(element) else {
            return;
        };
        for iri in iris {
            let Some(entry) = table.get_mut(iri) else {
                // evicted while in flight
                continue;
            };
            let ours = matches!(entry.labels.get(label), Some(LabelSlot::Pending { token: t, .. }) if *t == token);
            if !ours {
                continue;
            }
            match staged.as_mut() {
                Some(staged) => {
                    let values = staged.remove(iri).unwrap_or_default();
                    entry.labels.insert(label.to_string(), LabelSlot::Ready(values));
                }
                None => {
                    entry.labels.remove(label);
                }
            }
        }
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> LabelLease<'a> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn iris(&self) -> &[String] {
        &self.iris
    }

    /// Publish resolved values; resources without staged values resolve to
    /// an empty set
    pub fn fulfil(self, staged: HashMap<String, Vec<Value>>) {
        self.cache
            .settle(&self.element, &self.label, self.token, Some(staged), &self.iris);
        self.done.send_replace(true);
    }
}

impl Drop for LabelLease<'_> {
    fn drop(&mut self) {
        if !*self.done.borrow() {
            debug!(element = %self.element, label = %self.label, "releasing unresolved label");
            self.cache
                .settle(&self.element, &self.label, self.token, None, &self.iris);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iris(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_claim_creates_entries_before_resolution() {
        let cache = ResourceCache::new();
        let claim = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        assert_eq!(claim.leases.len(), 1);
        assert!(claim.waits.is_empty());
        assert!(cache.contains("Book", "http://x/1"));
        assert_eq!(cache.values("Book", "http://x/1", "title"), None);

        let second = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        assert!(second.leases.is_empty());
        assert_eq!(second.waits.len(), 1);
    }

    #[test]
    fn test_fulfil_publishes_values() {
        let cache = ResourceCache::new();
        let mut claim = cache.claim("Book", &iris(&["http://x/1", "http://x/2"]), &["author"]);
        let lease = claim.leases.pop().unwrap();
        let mut staged = HashMap::new();
        staged.insert("http://x/1".to_string(), vec![Value::Iri("http://p/ann".to_string())]);
        lease.fulfil(staged);

        assert_eq!(
            cache.values("Book", "http://x/1", "author"),
            Some(vec![Value::Iri("http://p/ann".to_string())])
        );
        // fetched, but empty
        assert_eq!(cache.values("Book", "http://x/2", "author"), Some(vec![]));
        assert_eq!(cache.referencing("Book", &["author"], "http://p/ann"), vec!["http://x/1"]);

        let again = cache.claim("Book", &iris(&["http://x/1"]), &["author"]);
        assert!(again.leases.is_empty() && again.waits.is_empty());
    }

    #[test]
    fn test_dropped_lease_releases_label() {
        let cache = ResourceCache::new();
        let claim = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        let waiter = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        let mut done = waiter.waits.into_iter().next().unwrap();
        drop(claim);

        assert!(done.has_changed().is_err());
        let retry = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        assert_eq!(retry.leases.len(), 1);
    }

    #[test]
    fn test_eviction_while_in_flight_discards_result() {
        let cache = ResourceCache::new();
        let mut claim = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        assert!(cache.evict("Book", "http://x/1"));
        claim.leases.pop().unwrap().fulfil(HashMap::new());
        assert!(!cache.contains("Book", "http://x/1"));
    }

    #[test]
    fn test_sweep_keeps_fresh_and_in_flight_entries() {
        let cache = ResourceCache::new();
        let mut claim = cache.claim("Book", &iris(&["http://x/1"]), &["title"]);
        claim.leases.pop().unwrap().fulfil(HashMap::new());
        let _pending = cache.claim("Book", &iris(&["http://x/2"]), &["title"]);

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(cache.sweep(past), SweepSummary { inspected: 2, cleaned: 0 });

        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(cache.sweep(future), SweepSummary { inspected: 2, cleaned: 1 });
        assert!(!cache.contains("Book", "http://x/1"));
        assert!(cache.contains("Book", "http://x/2"));
    }
}
