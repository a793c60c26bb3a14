//! Thread-safe handle over an [`IndexedStore`].
//!
//! One writer feeds the store while handlers read from it on worker tasks.
//! Every mutation holds the write lock for its whole duration, so readers
//! never observe an object without its index memberships.

use crate::store::{Indexers, IndexedStore};
use crate::{error::Result, IndexedValue, KeySource, ObjectKey};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cloneable, lock-protected [`IndexedStore`].
///
/// Queries return owned clones so no lock outlives the call.
#[derive(Debug)]
pub struct ThreadSafeStore<T> {
    inner: Arc<RwLock<IndexedStore<T>>>,
}

impl<T> Clone for ThreadSafeStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ThreadSafeStore<T> {
    fn default() -> Self {
        Self::from_store(IndexedStore::new())
    }
}

impl<T> ThreadSafeStore<T> {
    pub fn from_store(store: IndexedStore<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }
}

impl<T: Clone> ThreadSafeStore<T> {
    pub fn new(indexers: Indexers<T>) -> Self {
        Self::from_store(IndexedStore::with_indexers(indexers))
    }

    pub fn add(&self, key: impl Into<ObjectKey>, obj: T) -> Result<()> {
        self.write().add(key, obj)
    }

    pub fn update(&self, key: impl Into<ObjectKey>, obj: T) -> Result<()> {
        self.write().update(key, obj)
    }

    pub fn delete(&self, key: &str) -> Option<T> {
        self.write().delete(key)
    }

    pub fn replace<K, I>(&self, items: I) -> Result<()>
    where
        K: Into<ObjectKey>,
        I: IntoIterator<Item = (K, T)>,
    {
        self.write().replace(items)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains(key)
    }

    pub fn list(&self) -> Vec<T> {
        self.read().list().into_iter().cloned().collect()
    }

    pub fn list_keys(&self) -> Vec<ObjectKey> {
        self.read().list_keys()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn by_index(&self, index_name: &str, value: &str) -> Result<Vec<T>> {
        let store = self.read();
        Ok(store
            .by_index(index_name, value)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn index_keys(&self, index_name: &str, value: &str) -> Result<Vec<ObjectKey>> {
        self.read().index_keys(index_name, value)
    }

    pub fn index(&self, index_name: &str, obj: &T) -> Result<Vec<T>> {
        let store = self.read();
        Ok(store
            .index(index_name, obj)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn list_index_func_values(&self, index_name: &str) -> Result<Vec<IndexedValue>> {
        self.read().list_index_func_values(index_name)
    }

    pub fn add_indexers(&self, new_indexers: Indexers<T>) -> Result<()> {
        self.write().add_indexers(new_indexers)
    }

    pub fn get_indexers(&self) -> Indexers<T> {
        self.read().get_indexers().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexedStore<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexedStore<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + Sync + 'static> KeySource for ThreadSafeStore<T> {
    fn keys(&self) -> Vec<ObjectKey> {
        self.list_keys()
    }
}
