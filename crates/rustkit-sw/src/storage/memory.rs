//! In-memory cache storage with an optional byte quota.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rustkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Cache, CacheStorage, EntryTable, MatchOptions};
use crate::error::{Result, ServiceWorkerError};

/// Byte accounting shared by every cache of one storage.
#[derive(Debug, Default)]
pub(crate) struct Quota {
    limit: Option<usize>,
    used: Mutex<usize>,
}

impl Quota {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            used: Mutex::new(0),
        }
    }

    /// Apply a size change, failing if it would exceed the limit.
    pub(crate) fn reserve(&self, delta: i64, cache_name: &str) -> Result<()> {
        let mut used = self.used.lock();
        let next = (*used as i64 + delta).max(0) as usize;
        if let Some(limit) = self.limit {
            if delta > 0 && next > limit {
                return Err(ServiceWorkerError::QuotaExceeded {
                    cache_name: cache_name.to_string(),
                });
            }
        }
        *used = next;
        Ok(())
    }

    pub(crate) fn release(&self, bytes: usize) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(bytes);
    }

    pub(crate) fn used(&self) -> usize {
        *self.used.lock()
    }
}

/// A cache held in memory.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    table: RwLock<EntryTable>,
    quota: Arc<Quota>,
}

impl MemoryCache {
    fn new(name: &str, quota: Arc<Quota>) -> Self {
        Self {
            name: name.to_string(),
            table: RwLock::new(EntryTable::default()),
            quota,
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &Request,
        options: &MatchOptions,
    ) -> Result<Option<Response>> {
        let table = self.table.read().await;
        Ok(table.find(request, options).map(|e| e.response.clone()))
    }

    async fn put(&self, request: Request, response: Response) -> Result<()> {
        let mut table = self.table.write().await;
        let mut staged = table.clone();
        let delta = staged.put(request, response);
        self.quota.reserve(delta, &self.name)?;
        *table = staged;
        Ok(())
    }

    async fn delete(&self, request: &Request, options: &MatchOptions) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.delete(request, options) {
            Some(freed) => {
                self.quota.release(freed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        Ok(self.table.read().await.keys())
    }
}

/// Cache storage kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, Arc<MemoryCache>>>>,
    quota: Arc<Quota>,
}

impl MemoryCacheStorage {
    /// Create new cache storage without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that rejects writes once `max_bytes` of bodies are held.
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            caches: Arc::default(),
            quota: Arc::new(Quota::new(Some(max_bytes))),
        }
    }

    /// Body bytes currently held.
    pub fn usage(&self) -> usize {
        self.quota.used()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache_name = name, "Creating cache");
                Arc::new(MemoryCache::new(name, Arc::clone(&self.quota)))
            })
            .clone();
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match self.caches.write().await.remove(name) {
            Some(cache) => {
                self.quota.release(cache.table.read().await.size_bytes());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn req(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = MemoryCacheStorage::new();

        assert!(!storage.has("v1").await.unwrap());

        storage.open("v1").await.unwrap();
        assert!(storage.has("v1").await.unwrap());

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_returns_same_cache() {
        let storage = MemoryCacheStorage::new();
        let a = storage.open("v1").await.unwrap();
        a.put(req("https://example.com/style.css"), Response::ok_with_body("body"))
            .await
            .unwrap();

        let b = storage.open("v1").await.unwrap();
        let hit = b
            .match_request(&req("https://example.com/style.css"), &MatchOptions::default())
            .await
            .unwrap();
        assert_eq!(hit.unwrap().text().unwrap(), "body");
    }

    #[tokio::test]
    async fn test_cache_delete() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();
        cache
            .put(req("https://example.com/style.css"), Response::ok_with_body(""))
            .await
            .unwrap();

        let opts = MatchOptions::default();
        assert!(cache.delete(&req("https://example.com/style.css"), &opts).await.unwrap());
        assert!(cache
            .match_request(&req("https://example.com/style.css"), &opts)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cache_keys() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("test").await.unwrap();
        cache.put(req("https://example.com/a.js"), Response::ok_with_body("")).await.unwrap();
        cache.put(req("https://example.com/b.js"), Response::ok_with_body("")).await.unwrap();

        let keys = cache.keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].url.path(), "/a.js");
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_cache_unchanged() {
        let storage = MemoryCacheStorage::with_quota(4);
        let cache = storage.open("small").await.unwrap();
        cache.put(req("https://example.com/a"), Response::ok_with_body("abc")).await.unwrap();

        let err = cache
            .put(req("https://example.com/b"), Response::ok_with_body("defg"))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(cache.keys().await.unwrap().len(), 1);
        assert_eq!(storage.usage(), 3);

        cache.delete(&req("https://example.com/a"), &MatchOptions::default()).await.unwrap();
        assert_eq!(storage.usage(), 0);
    }
}
