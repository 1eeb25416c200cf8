//! Bounded, most-recently-used manifest cache (spec §4.6).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::manifest::Manifest;

/// Default capacity when a caller doesn't specify one.
pub const DEFAULT_CAPACITY: usize = 100;

/// A manifest LRU keyed by manifest id (its Base32 string form). Not
/// thread-safe on its own -- the mutex here is what the store facade
/// serialises mutation through (spec §5: "implementations must serialise
/// LRU mutation").
#[derive(Clone)]
pub struct ManifestCache {
    inner: Arc<Mutex<LruCache<String, Arc<Manifest>>>>,
}

impl std::fmt::Debug for ManifestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestCache").finish_non_exhaustive()
    }
}

impl ManifestCache {
    /// Build a cache bounded to `capacity` entries. A `capacity` of zero
    /// falls back to [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN));
        Self { inner: Arc::new(Mutex::new(LruCache::new(capacity))) }
    }

    /// Get a manifest by id, promoting it to most-recently-used on hit.
    pub async fn get(&self, id: &str) -> Option<Arc<Manifest>> {
        let mut guard = self.inner.lock().await;
        guard.get(id).cloned()
    }

    /// Insert or replace a manifest, promoting it to most-recently-used.
    /// Evicts the least-recently-used entry if this insertion pushes the
    /// cache past capacity.
    pub async fn put(&self, id: String, manifest: Arc<Manifest>) {
        let mut guard = self.inner.lock().await;
        guard.put(id, manifest);
    }

    /// Current number of cached entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// `true` iff the cache currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn empty_manifest() -> Arc<Manifest> {
        Arc::new(Manifest::default())
    }

    #[tokio::test]
    async fn eviction_past_capacity() {
        let cache = ManifestCache::new(2);
        cache.put("a".to_string(), empty_manifest()).await;
        cache.put("b".to_string(), empty_manifest()).await;
        cache.put("c".to_string(), empty_manifest()).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_none(), "a should have been evicted");
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn get_promotes_recency() {
        let cache = ManifestCache::new(2);
        cache.put("a".to_string(), empty_manifest()).await;
        cache.put("b".to_string(), empty_manifest()).await;

        // touch "a" so "b" becomes the least-recently-used entry
        assert!(cache.get("a").await.is_some());
        cache.put("c".to_string(), empty_manifest()).await;

        assert!(cache.get("b").await.is_none(), "b should have been evicted, not a");
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn miss_does_not_alter_recency() {
        let cache = ManifestCache::new(2);
        cache.put("a".to_string(), empty_manifest()).await;
        cache.put("b".to_string(), empty_manifest()).await;

        assert!(cache.get("missing").await.is_none());
        cache.put("c".to_string(), empty_manifest()).await;

        // "a" is still the least-recently-used entry since the miss above
        // didn't touch it.
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
    }
}
