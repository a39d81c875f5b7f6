//! The persistent-information map: an opaque, worker-scoped dictionary
//! owned by the manager, handed to the allocator and to dispatched workers,
//! and merged back in as workers report updates.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::WorkerId;

/// One worker's opaque entries (random-number streams, optimizer state,
/// ...). Kept as a JSON value map since its contents are meaningless to the
/// coordinator and only need to round-trip across the transport and
/// through snapshots.
pub type PersisInfo = HashMap<String, serde_json::Value>;

/// The full manager-owned map, keyed by worker id. `IndexMap` preserves
/// insertion order, matching the allocator's dictionary-order iteration
/// expectations (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersisInfoMap(pub IndexMap<WorkerId, PersisInfo>);

impl PersisInfoMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn for_worker(&self, w: WorkerId) -> PersisInfo {
        self.0.get(&w).cloned().unwrap_or_default()
    }

    /// Merge a worker-reported update into the manager's copy, entry by
    /// entry (never a wholesale replace), matching
    /// `persis_info[w].update(...)` in the source system.
    pub fn merge(&mut self, w: WorkerId, update: PersisInfo) {
        let entry = self.0.entry(w).or_default();
        entry.extend(update);
    }

    pub fn ensure_worker(&mut self, w: WorkerId) {
        self.0.entry(w).or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_extends_rather_than_replaces() {
        let mut map = PersisInfoMap::new();
        let mut first = PersisInfo::new();
        first.insert("seed".to_string(), serde_json::json!(7));
        map.merge(WorkerId(1), first);

        let mut second = PersisInfo::new();
        second.insert("last_x".to_string(), serde_json::json!([1.0, 2.0]));
        map.merge(WorkerId(1), second);

        let merged = map.for_worker(WorkerId(1));
        assert_eq!(merged.get("seed"), Some(&serde_json::json!(7)));
        assert_eq!(merged.get("last_x"), Some(&serde_json::json!([1.0, 2.0])));
    }

    #[test]
    fn unknown_worker_yields_empty_default() {
        let map = PersisInfoMap::new();
        assert!(map.for_worker(WorkerId(5)).is_empty());
    }
}
