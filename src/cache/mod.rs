//! In-memory caches: resolved resources and full query results

pub mod query;
pub mod resource;

use serde::{Deserialize, Serialize};

pub use query::QueryCache;
pub use resource::{CacheEntry, LabelLease, ResourceCache};

/// Outcome of one TTL sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub inspected: usize,
    pub cleaned: usize,
}

impl SweepSummary {
    pub fn merge(&mut self, other: SweepSummary) {
        self.inspected += other.inspected;
        self.cleaned += other.cleaned;
    }
}
