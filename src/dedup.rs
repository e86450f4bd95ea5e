//! Splits candidate work items into those still needing an API call and
//! those already resolved in a previous run.

use std::collections::HashSet;

use crate::ingestion::{WorkItem, WorkItemSet};

/// A previously stored lookup, keyed the same way as [`WorkItem::dedup_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct PastResult {
    pub key: String,
    pub travel_duration: Option<f64>,
    pub travel_distance: Option<f64>,
}

impl PastResult {
    pub fn key_only(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            travel_duration: None,
            travel_distance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    /// Items whose key has never been seen. Immutable once computed.
    pub pending: Vec<T>,
    /// Items already present in the past results.
    pub known: Vec<T>,
}

/// Order-preserving membership split of `candidates` against `past`.
pub fn dedup<T: WorkItem>(candidates: WorkItemSet<T>, past: &[PastResult]) -> Partition<T> {
    let seen: HashSet<&str> = past.iter().map(|p| p.key.as_str()).collect();
    let (known, pending): (Vec<T>, Vec<T>) = candidates
        .items
        .into_iter()
        .partition(|item| seen.contains(item.dedup_key().as_str()));
    Partition { pending, known }
}
