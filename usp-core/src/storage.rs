//! Pluggable persistence. Every component stores its entities behind a
//! `Repository`, so a production deployment can swap in a database-backed
//! implementation without touching component logic — the same shape as the
//! key-metadata storage backend this codebase grew up with, generalized
//! from one entity to any `(key, value)` pair.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

pub trait Repository<K, V>: Send + Sync
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V);
    fn delete(&self, key: &K);
    fn list(&self) -> Vec<V>;
    fn keys(&self) -> Vec<K>;
}

/// In-memory repository. Suitable for tests and for a single-process
/// deployment backed by periodic snapshotting at a higher layer.
pub struct InMemoryRepository<K, V> {
    data: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryRepository<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { data: RwLock::new(HashMap::new()) }
    }
}

impl<K, V> Default for InMemoryRepository<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Repository<K, V> for InMemoryRepository<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.data.read().unwrap().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.data.write().unwrap().insert(key, value);
    }

    fn delete(&self, key: &K) {
        self.data.write().unwrap().remove(key);
    }

    fn list(&self) -> Vec<V> {
        self.data.read().unwrap().values().cloned().collect()
    }

    fn keys(&self) -> Vec<K> {
        self.data.read().unwrap().keys().cloned().collect()
    }
}
