//! Store - the indexed object table.
//!
//! The store keeps objects under caller-chosen keys and maintains any number
//! of secondary indices over them. Every registered index function maps an
//! object to zero or more indexed values; the index then maps each value back
//! to the set of keys that produced it.
//!
//! The store has no locking of its own. Wrap it in a
//! [`ThreadSafeStore`](crate::ThreadSafeStore) when readers and writers live
//! on different tasks.

use crate::{error::Result, Error, IndexName, IndexedValue, ObjectKey};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Computes the indexed values of an object.
pub type IndexFunc<T> =
    Arc<dyn Fn(&T) -> std::result::Result<Vec<IndexedValue>, String> + Send + Sync>;

/// Index functions by index name.
pub type Indexers<T> = HashMap<IndexName, IndexFunc<T>>;

/// Object keys by indexed value.
pub type Index = HashMap<IndexedValue, HashSet<ObjectKey>>;

/// Wrap a closure as an [`IndexFunc`].
pub fn index_func<T, F>(f: F) -> IndexFunc<T>
where
    F: Fn(&T) -> std::result::Result<Vec<IndexedValue>, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Placeholder key used in errors for objects that are not stored.
const UNSTORED_KEY: &str = "<unstored>";

/// Buckets of one index plus the values each key was last filed under.
#[derive(Debug, Clone, Default)]
struct IndexState {
    buckets: Index,
    recorded: HashMap<ObjectKey, Vec<IndexedValue>>,
}

impl IndexState {
    /// File `key` under exactly `values`, touching only the buckets that
    /// change.
    fn file(&mut self, key: &str, values: Vec<IndexedValue>) {
        let old = self.recorded.remove(key).unwrap_or_default();

        for value in old.iter().filter(|v| !values.contains(v)) {
            self.remove_from_bucket(value, key);
        }
        for value in values.iter().filter(|v| !old.contains(v)) {
            self.buckets
                .entry(value.clone())
                .or_default()
                .insert(key.to_string());
        }

        if !values.is_empty() {
            self.recorded.insert(key.to_string(), values);
        }
    }

    fn purge(&mut self, key: &str) {
        if let Some(old) = self.recorded.remove(key) {
            for value in &old {
                self.remove_from_bucket(value, key);
            }
        }
    }

    fn remove_from_bucket(&mut self, value: &str, key: &str) {
        if let Some(bucket) = self.buckets.get_mut(value) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.buckets.remove(value);
            }
        }
    }
}

/// A keyed object table with secondary indices.
pub struct IndexedStore<T> {
    /// Objects by key
    items: HashMap<ObjectKey, T>,
    /// Registered index functions
    indexers: Indexers<T>,
    /// Index state by index name, one entry per registered indexer
    indices: HashMap<IndexName, IndexState>,
}

impl<T> Default for IndexedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for IndexedStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut indexers: Vec<_> = self.indexers.keys().collect();
        indexers.sort();
        f.debug_struct("IndexedStore")
            .field("items", &self.items.len())
            .field("indexers", &indexers)
            .finish()
    }
}

impl<T> IndexedStore<T> {
    /// Create an empty store with no indices.
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            indexers: HashMap::new(),
            indices: HashMap::new(),
        }
    }

    /// Create an empty store with the given indexers registered.
    pub fn with_indexers(indexers: Indexers<T>) -> Self {
        let indices = indexers
            .keys()
            .map(|name| (name.clone(), IndexState::default()))
            .collect();
        Self {
            items: HashMap::new(),
            indexers,
            indices,
        }
    }

    /// Insert or replace the object stored under `key`.
    ///
    /// All index functions run before anything is written; if one fails the
    /// store is left untouched.
    pub fn add(&mut self, key: impl Into<ObjectKey>, obj: T) -> Result<()> {
        let key = key.into();
        let values = self.compute(&key, &obj)?;

        for (name, values) in values {
            if let Some(state) = self.indices.get_mut(&name) {
                state.file(&key, values);
            }
        }
        self.items.insert(key, obj);
        Ok(())
    }

    /// Alias of [`add`](Self::add).
    pub fn update(&mut self, key: impl Into<ObjectKey>, obj: T) -> Result<()> {
        self.add(key, obj)
    }

    /// Remove the object under `key` along with all its index memberships.
    ///
    /// Returns the removed object. Absent keys are not an error.
    pub fn delete(&mut self, key: &str) -> Option<T> {
        let removed = self.items.remove(key)?;
        for state in self.indices.values_mut() {
            state.purge(key);
        }
        Some(removed)
    }

    /// Replace the whole content of the store, rebuilding every index.
    pub fn replace<K, I>(&mut self, items: I) -> Result<()>
    where
        K: Into<ObjectKey>,
        I: IntoIterator<Item = (K, T)>,
    {
        let mut fresh = Self::with_indexers(self.indexers.clone());
        for (key, obj) in items {
            fresh.add(key, obj)?;
        }
        *self = fresh;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn list(&self) -> Vec<&T> {
        self.items.values().collect()
    }

    pub fn list_keys(&self) -> Vec<ObjectKey> {
        self.items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Objects filed under `value` in the index `index_name`.
    pub fn by_index(&self, index_name: &str, value: &str) -> Result<Vec<&T>> {
        let keys = self.bucket(index_name, value)?;
        Ok(keys
            .into_iter()
            .flatten()
            .filter_map(|key| self.items.get(key))
            .collect())
    }

    /// Keys filed under `value` in the index `index_name`.
    pub fn index_keys(&self, index_name: &str, value: &str) -> Result<Vec<ObjectKey>> {
        let keys = self.bucket(index_name, value)?;
        Ok(keys.into_iter().flatten().cloned().collect())
    }

    /// Objects sharing at least one indexed value with `obj`.
    ///
    /// `obj` does not need to be stored.
    pub fn index(&self, index_name: &str, obj: &T) -> Result<Vec<&T>> {
        let func = self
            .indexers
            .get(index_name)
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))?;
        let values = func(obj).map_err(|reason| Error::IndexFunc {
            index: index_name.to_string(),
            key: UNSTORED_KEY.to_string(),
            reason,
        })?;

        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for value in &values {
            for key in self.bucket(index_name, value)?.into_iter().flatten() {
                if seen.insert(key.as_str()) {
                    if let Some(item) = self.items.get(key) {
                        matched.push(item);
                    }
                }
            }
        }
        Ok(matched)
    }

    /// Every indexed value currently present in `index_name`.
    pub fn list_index_func_values(&self, index_name: &str) -> Result<Vec<IndexedValue>> {
        let state = self
            .indices
            .get(index_name)
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))?;
        Ok(state.buckets.keys().cloned().collect())
    }

    pub fn get_indexers(&self) -> &Indexers<T> {
        &self.indexers
    }

    /// Register additional indexers.
    ///
    /// Fails if any name is already registered. Objects already stored are
    /// filed into the new indices; if an index function fails on one of them
    /// nothing is registered.
    pub fn add_indexers(&mut self, new_indexers: Indexers<T>) -> Result<()> {
        if let Some(name) = new_indexers
            .keys()
            .find(|name| self.indexers.contains_key(*name))
        {
            return Err(Error::AlreadyRegistered(name.clone()));
        }

        let mut states = HashMap::with_capacity(new_indexers.len());
        for (name, func) in &new_indexers {
            let mut state = IndexState::default();
            for (key, obj) in &self.items {
                state.file(key, run_index_func(name, func, key, obj)?);
            }
            states.insert(name.clone(), state);
        }

        self.indices.extend(states);
        self.indexers.extend(new_indexers);
        Ok(())
    }

    fn bucket(&self, index_name: &str, value: &str) -> Result<Option<&HashSet<ObjectKey>>> {
        let state = self
            .indices
            .get(index_name)
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))?;
        Ok(state.buckets.get(value))
    }

    fn compute(&self, key: &str, obj: &T) -> Result<Vec<(IndexName, Vec<IndexedValue>)>> {
        self.indexers
            .iter()
            .map(|(name, func)| Ok((name.clone(), run_index_func(name, func, key, obj)?)))
            .collect()
    }
}

fn run_index_func<T>(
    name: &str,
    func: &IndexFunc<T>,
    key: &str,
    obj: &T,
) -> Result<Vec<IndexedValue>> {
    let mut values = func(obj).map_err(|reason| Error::IndexFunc {
        index: name.to_string(),
        key: key.to_string(),
        reason,
    })?;
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
    Ok(values)
}
