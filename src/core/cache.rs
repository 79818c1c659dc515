use async_trait::async_trait;
use std::time::Duration;

/// Async key-value cache with optional per-entry TTL.
#[async_trait]
pub trait Cache<K, V>: Send + Sync {
    async fn get(&self, key: &K) -> Option<V>;

    async fn put(&self, key: K, value: V, ttl: Option<Duration>);

    async fn remove(&self, key: &K);

    /// Removes every entry whose key matches `predicate`, returning the count.
    async fn remove_where(&self, predicate: &(dyn for<'k> Fn(&'k K) -> bool + Send + Sync)) -> usize;

    async fn clear(&self);
}
