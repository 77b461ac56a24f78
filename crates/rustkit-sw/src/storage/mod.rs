//! Named request/response stores.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (by name)
//!             └── Request → Response
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use rustkit_net::http::Method;
use rustkit_net::{Request, Response};
use url::Url;

use crate::error::Result;

pub mod disk;
pub mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Options controlling how a request is matched against stored entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Ignore the query string when comparing URLs.
    pub ignore_search: bool,
    /// Match regardless of request method.
    pub ignore_method: bool,
}

impl MatchOptions {
    pub fn ignore_search() -> Self {
        Self {
            ignore_search: true,
            ..Default::default()
        }
    }
}

/// A single named cache.
#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// First stored response matching `request`.
    async fn match_request(
        &self,
        request: &Request,
        options: &MatchOptions,
    ) -> Result<Option<Response>>;

    /// Store `response` under `request`, replacing any entry for the same URL.
    async fn put(&self, request: Request, response: Response) -> Result<()>;

    /// Remove every entry matching `request`.
    async fn delete(&self, request: &Request, options: &MatchOptions) -> Result<bool>;

    /// Stored requests in insertion order.
    async fn keys(&self) -> Result<Vec<Request>>;
}

/// The set of named caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if needed.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    async fn has(&self, name: &str) -> Result<bool>;

    async fn delete(&self, name: &str) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub request: Request,
    pub response: Response,
}

/// Insertion-ordered entry list with Cache API matching rules.
#[derive(Debug, Default, Clone)]
pub(crate) struct EntryTable {
    entries: Vec<CacheEntry>,
}

impl EntryTable {
    pub(crate) fn from_entries(entries: Vec<CacheEntry>) -> Self {
        Self { entries }
    }

    pub(crate) fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub(crate) fn find(&self, request: &Request, options: &MatchOptions) -> Option<&CacheEntry> {
        if !Self::method_allowed(request, options) {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| urls_match(&entry.request.url, &request.url, options.ignore_search))
    }

    /// Insert, returning the bytes added minus the bytes replaced.
    pub(crate) fn put(&mut self, request: Request, response: Response) -> i64 {
        let added = response.body().len() as i64;
        let mut removed = 0i64;
        self.entries.retain(|entry| {
            let same = urls_match(&entry.request.url, &request.url, false);
            if same {
                removed += entry.response.body().len() as i64;
            }
            !same
        });
        self.entries.push(CacheEntry { request, response });
        added - removed
    }

    /// Remove matching entries, returning the bytes freed if anything was removed.
    pub(crate) fn delete(&mut self, request: &Request, options: &MatchOptions) -> Option<usize> {
        if !Self::method_allowed(request, options) {
            return None;
        }
        let before = self.entries.len();
        let mut freed = 0;
        self.entries.retain(|entry| {
            let matched = urls_match(&entry.request.url, &request.url, options.ignore_search);
            if matched {
                freed += entry.response.body().len();
            }
            !matched
        });
        (self.entries.len() != before).then_some(freed)
    }

    pub(crate) fn keys(&self) -> Vec<Request> {
        self.entries.iter().map(|e| e.request.clone()).collect()
    }

    pub(crate) fn size_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.response.body().len()).sum()
    }

    fn method_allowed(request: &Request, options: &MatchOptions) -> bool {
        options.ignore_method || request.method == Method::GET || request.method == Method::HEAD
    }
}

/// Compare URLs without fragments, optionally without query strings.
fn urls_match(stored: &Url, wanted: &Url, ignore_search: bool) -> bool {
    let strip = |url: &Url| {
        let mut url = url.clone();
        url.set_fragment(None);
        if ignore_search {
            url.set_query(None);
        }
        url
    };
    strip(stored) == strip(wanted)
}
