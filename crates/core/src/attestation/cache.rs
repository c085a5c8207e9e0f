use std::{hash::Hash, time::Duration};

use async_trait::async_trait;
use moka::future::Cache;

/// A key-value cache whose entries expire a fixed time after insertion.
#[async_trait]
pub trait TtlCache<K, V>: Send + Sync {
    /// Returns the entry for `key`, if present and not expired.
    async fn get(&self, key: &K) -> Option<V>;
    /// Inserts or replaces the entry for `key`.
    async fn put(&self, key: K, value: V);
    /// Drops the entry for `key`.
    async fn invalidate(&self, key: &K);
}

/// [`TtlCache`] backed by a bounded in-memory `moka` cache.
#[derive(Clone)]
pub struct MokaTtlCache<K, V> {
    inner: Cache<K, V>,
}

impl<K, V> std::fmt::Debug for MokaTtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaTtlCache").finish_non_exhaustive()
    }
}

impl<K, V> MokaTtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `max_capacity` entries for `ttl` each.
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl<K, V> TtlCache<K, V> for MokaTtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    async fn put(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = MokaTtlCache::new(Duration::from_millis(50), 16);
        cache.put("wallet", 1u32).await;
        assert_eq!(cache.get(&"wallet").await, Some(1));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(&"wallet").await, None);
    }

    #[tokio::test]
    async fn invalidate_drops_entry() {
        let cache = MokaTtlCache::new(Duration::from_secs(60), 16);
        cache.put(7u8, "attestation".to_string()).await;
        cache.invalidate(&7).await;
        assert_eq!(cache.get(&7).await, None);
    }
}
