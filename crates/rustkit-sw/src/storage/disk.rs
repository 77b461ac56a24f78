//! On-disk cache storage.
//!
//! Each named cache is one JSON document under the storage root; bodies are
//! base64 encoded. Writes go to a temporary file that is renamed into place,
//! so a crash leaves either the old or the new document.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hashbrown::HashMap;
use rustkit_net::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use rustkit_net::{Request, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use super::{Cache, CacheEntry, CacheStorage, EntryTable, MatchOptions};
use crate::error::{Result, ServiceWorkerError};

#[derive(Debug, Serialize, Deserialize)]
struct StoredCache {
    name: String,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    method: String,
    request_headers: Vec<(String, String)>,
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    response_url: Option<String>,
    redirected: bool,
    body: String,
    /// Cached at timestamp (ms since epoch).
    cached_at: u64,
}

/// Header values are stored base64 encoded; they need not be UTF-8.
fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), STANDARD.encode(value.as_bytes())))
        .collect()
}

fn pairs_to_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| ServiceWorkerError::Storage(e.to_string()))?;
        let bytes = STANDARD
            .decode(value)
            .map_err(|e| ServiceWorkerError::Storage(e.to_string()))?;
        let value = HeaderValue::from_bytes(&bytes)
            .map_err(|e| ServiceWorkerError::Storage(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl StoredEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        let CacheEntry { request, response } = entry;
        Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            request_headers: headers_to_pairs(&request.headers),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers: headers_to_pairs(&response.headers),
            response_url: response.url.as_ref().map(Url::to_string),
            redirected: response.redirected,
            body: STANDARD.encode(response.body()),
            cached_at: now_millis(),
        }
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let storage_err = |e: String| ServiceWorkerError::Storage(e);

        let url = Url::parse(&self.url).map_err(|e| storage_err(e.to_string()))?;
        let mut request = Request::get(url);
        request.method =
            Method::from_bytes(self.method.as_bytes()).map_err(|e| storage_err(e.to_string()))?;
        request.headers = pairs_to_headers(&self.request_headers)?;

        let status = StatusCode::from_u16(self.status).map_err(|e| storage_err(e.to_string()))?;
        let body = STANDARD
            .decode(&self.body)
            .map_err(|e| storage_err(e.to_string()))?;
        let mut response = Response::new(status, body).with_redirected(self.redirected);
        response.status_text = self.status_text;
        response.headers = pairs_to_headers(&self.headers)?;
        if let Some(ref url) = self.response_url {
            response.url = Some(Url::parse(url).map_err(|e| storage_err(e.to_string()))?);
        }

        Ok(CacheEntry { request, response })
    }
}

/// A cache persisted as a single JSON document.
#[derive(Debug)]
pub struct DiskCache {
    name: String,
    path: PathBuf,
    table: RwLock<EntryTable>,
}

impl DiskCache {
    async fn load(name: &str, path: PathBuf) -> Result<Self> {
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: StoredCache = serde_json::from_slice(&bytes)?;
                let entries = stored
                    .entries
                    .into_iter()
                    .map(StoredEntry::into_entry)
                    .collect::<Result<Vec<_>>>()?;
                debug!(cache_name = name, entries = entries.len(), "Loaded cache from disk");
                EntryTable::from_entries(entries)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EntryTable::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            name: name.to_string(),
            path,
            table: RwLock::new(table),
        })
    }

    async fn persist(&self, table: &EntryTable) -> Result<()> {
        let stored = StoredCache {
            name: self.name.clone(),
            entries: table.entries().iter().map(StoredEntry::from_entry).collect(),
        };
        let bytes = serde_json::to_vec(&stored)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Cache for DiskCache {
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
        staged.put(request, response);
        self.persist(&staged).await?;
        *table = staged;
        Ok(())
    }

    async fn delete(&self, request: &Request, options: &MatchOptions) -> Result<bool> {
        let mut table = self.table.write().await;
        let mut staged = table.clone();
        if staged.delete(request, options).is_none() {
            return Ok(false);
        }
        self.persist(&staged).await?;
        *table = staged;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        Ok(self.table.read().await.keys())
    }
}

/// Cache storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
    open: Arc<RwLock<HashMap<String, Arc<DiskCache>>>>,
}

impl DiskCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            open: Arc::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        self.root.join(format!("{digest}.json"))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let mut open = self.open.write().await;
        if let Some(cache) = open.get(name) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(DiskCache::load(name, self.path_for(name)).await?);
        cache.persist(&*cache.table.read().await).await?;
        open.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        if self.open.read().await.contains_key(name) {
            return Ok(true);
        }
        Ok(tokio::fs::try_exists(self.path_for(name)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.open.write().await.remove(name);
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<StoredCache>(&bytes) {
                Ok(stored) => names.push(stored.name),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache file"),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
            let cache = storage.open("workbox-precache-v2").await.unwrap();
            let response = Response::ok_with_body("hello").with_header(
                rustkit_net::http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain"),
            );
            cache.put(req("https://example.com/a.txt"), response).await.unwrap();
        }

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["workbox-precache-v2"]);

        let cache = storage.open("workbox-precache-v2").await.unwrap();
        let hit = cache
            .match_request(&req("https://example.com/a.txt"), &MatchOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text().unwrap(), "hello");
        assert_eq!(hit.headers.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_opaque_header_bytes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let latin1 = HeaderValue::from_bytes(b"caf\xe9").unwrap();
        assert!(latin1.to_str().is_err());
        {
            let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
            let cache = storage.open("runtime").await.unwrap();
            let response = Response::ok_with_body("x")
                .with_header(HeaderName::from_static("x-label"), latin1.clone());
            cache.put(req("https://example.com/x"), response).await.unwrap();
        }

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("runtime").await.unwrap();
        let hit = cache
            .match_request(&req("https://example.com/x"), &MatchOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.headers.get("x-label"), Some(&latin1));
    }

    #[tokio::test]
    async fn test_delete_cache_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        storage.open("runtime").await.unwrap();

        assert!(storage.has("runtime").await.unwrap());
        assert!(storage.delete("runtime").await.unwrap());
        assert!(!storage.has("runtime").await.unwrap());
        assert!(!storage.delete("runtime").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_delete_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("c").await.unwrap();
        cache.put(req("https://example.com/a"), Response::ok_with_body("a")).await.unwrap();
        cache.delete(&req("https://example.com/a"), &MatchOptions::default()).await.unwrap();

        let reopened = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = reopened.open("c").await.unwrap();
        assert!(cache.keys().await.unwrap().is_empty());
    }
}
