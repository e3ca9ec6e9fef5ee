use crate::LoadError;
use chashmap::CHashMap;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// Controls how long a [`BatchLoader`](crate::BatchLoader) keeps resolved
/// values around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Values only live for one accumulation window. Loads of the same key
    /// within a window share a single fetch, but a load issued after that
    /// window was dispatched fetches again.
    #[default]
    Window,

    /// Values are kept for the lifetime of the loader, which is normally one
    /// inbound request. Absent values are kept too, so a key that resolved
    /// to nothing is not fetched again. Errors are never kept.
    Request,
}

impl CachePolicy {
    pub(crate) fn retains_values(self) -> bool {
        matches!(self, CachePolicy::Request)
    }
}

#[derive(Clone)]
pub(crate) struct CacheStore<K, V> {
    map: Arc<CHashMap<K, V>>,
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        let map = Arc::new(CHashMap::new());
        CacheStore { map }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).as_deref().cloned()
    }

    pub(crate) fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    pub(crate) fn insert_many(&self, values: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in values {
            self.map.insert(key, value);
        }
    }

    pub(crate) fn remove(&self, key: &K) {
        self.map.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.map.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// Tracks the keys of a single `load` or `load_many` call: which were
/// already resolved from the cache and which are waiting on a batch.
pub(crate) struct CacheLookup<K, V>
where
    K: Hash + Eq,
{
    keys: Vec<K>,
    entries: HashMap<K, Option<V>>,
}

impl<K, V> CacheLookup<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    pub(crate) fn new(keys: Vec<K>) -> Self {
        let entries = keys.iter().map(|key| (key.clone(), None)).collect();
        CacheLookup { keys, entries }
    }

    /// Resolve any unresolved keys that are present in the store. Returns the
    /// number of requested positions resolved this way, so a key requested
    /// twice counts twice.
    pub(crate) fn reload_keys_from_cache_store(&mut self, cache_store: &CacheStore<K, V>) -> usize {
        let mut newly_resolved = HashSet::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.is_none() {
                *entry = cache_store.get(key);
                if entry.is_some() {
                    newly_resolved.insert(key.clone());
                }
            }
        }

        self.keys
            .iter()
            .filter(|key| newly_resolved.contains(*key))
            .count()
    }

    /// The unresolved keys, deduplicated, in the order they were first
    /// requested.
    pub(crate) fn pending_keys(&self) -> Vec<K> {
        let mut seen = HashSet::new();
        self.keys
            .iter()
            .filter(|key| matches!(self.entries.get(*key), Some(None)))
            .filter(|key| seen.insert(*key))
            .cloned()
            .collect()
    }

    /// Resolve `keys` with the matching entries of `values`, as returned by a
    /// batch for the keys from [`pending_keys`](CacheLookup::pending_keys).
    pub(crate) fn fill(&mut self, keys: Vec<K>, values: Vec<V>) -> Result<(), LoadError> {
        if keys.len() != values.len() {
            return Err(LoadError::ContractViolation(format!(
                "batch returned {} values for {} keys",
                values.len(),
                keys.len(),
            )));
        }

        for (key, value) in keys.into_iter().zip(values) {
            self.entries.insert(key, Some(value));
        }

        Ok(())
    }

    pub(crate) fn lookup_result(&self) -> Result<Vec<V>, LoadError> {
        self.keys
            .iter()
            .map(|key| match self.entries.get(key) {
                Some(Some(value)) => Ok(value.clone()),
                Some(None) | None => Err(LoadError::ContractViolation(
                    "a requested key was never resolved".to_string(),
                )),
            })
            .collect()
    }
}
