// Explicit TTL cache objects
// Read-through caches keyed by immutable composite keys; entries are
// replaced whole, never merged, so concurrent readers always see a
// consistent snapshot
//
// Numan Thabit 2025 Nov

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// A TTL cache constructed once and passed into the engine. `ttl == None`
/// means entries never expire (used by the decimals resolver).
pub struct TtlCache<K, V> {
    ttl: Option<Duration>,
    inner: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.read().await;
        let entry = guard.get(key)?;
        if let Some(ttl) = self.ttl {
            if entry.stored_at.elapsed() > ttl {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Atomic whole-entry replacement.
    pub async fn insert(&self, key: K, value: V) {
        let mut guard = self.inner.write().await;
        guard.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, key: &K) {
        let mut guard = self.inner.write().await;
        guard.remove(key);
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
