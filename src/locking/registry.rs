//! Process-wide registry of per-key lock primitives (spec §4.6), grounded
//! in `examples/original_source/locking.py`'s `GlobalDict`/`Driver`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::locking::rw::RwKey;

/// Lazily creates and hands out shared [`RwKey`]s by name.
///
/// One coordinator is shared by every [`crate::Database`]/[`crate::Table`]
/// that needs to lock the same documents, so concurrent callers always
/// contend on the same underlying primitives.
#[derive(Default)]
pub struct LockCoordinator {
    keys: Mutex<HashMap<String, Arc<RwKey>>>,
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: &str) -> Arc<RwKey> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(keys.entry(key.to_string()).or_insert_with(|| Arc::new(RwKey::new())))
    }

    /// Resolve a set of names to their keys, sorted and deduplicated by
    /// name so composite acquisition always follows the same canonical
    /// order regardless of how the caller listed them (spec §9).
    pub fn get_or_create_sorted(&self, names: &[&str]) -> Vec<Arc<RwKey>> {
        let mut sorted: Vec<&str> = names.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.into_iter().map(|name| self.get_or_create(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_returns_same_instance() {
        let coordinator = LockCoordinator::new();
        let a = coordinator.get_or_create("doc1");
        let b = coordinator.get_or_create("doc1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn sorted_resolution_deduplicates() {
        let coordinator = LockCoordinator::new();
        let keys = coordinator.get_or_create_sorted(&["b", "a", "b"]);
        assert_eq!(keys.len(), 2);
    }
}
