//! The desired precache state: URL → cache key.

use hashbrown::{HashMap, HashSet};
use rustkit_net::CacheMode;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::location::WorkerLocation;

/// Query parameter carrying an entry's revision inside its cache key.
pub const REVISION_SEARCH_PARAM: &str = "__WB_REVISION__";

/// One manifest entry: a bare URL or a URL with revision metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    Url(String),
    Entry(PrecacheEntry),
}

/// A URL with optional revision and integrity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,

    /// `None` when the field is absent, `Some(None)` when explicitly null.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    revision: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl PrecacheEntry {
    /// Entry without revision info.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
            integrity: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(Some(revision.into()));
        self
    }

    /// Declare that the URL itself is versioned (e.g. contains a content hash).
    pub fn hashed_url(mut self) -> Self {
        self.revision = Some(None);
        self
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_ref().and_then(|r| r.as_deref())
    }
}

impl From<&str> for ManifestEntry {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for ManifestEntry {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<PrecacheEntry> for ManifestEntry {
    fn from(entry: PrecacheEntry) -> Self {
        Self::Entry(entry)
    }
}

impl ManifestEntry {
    fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Entry(entry) => &entry.url,
        }
    }

    /// Bare strings and entries that omit `revision` cannot be change-detected.
    fn is_unrevisioned(&self) -> bool {
        match self {
            Self::Url(_) => true,
            Self::Entry(entry) => entry.revision.is_none(),
        }
    }

    fn integrity(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Entry(entry) => entry.integrity.as_deref(),
        }
    }

    fn revision(&self) -> Option<&str> {
        match self {
            Self::Url(_) => None,
            Self::Entry(entry) => entry.revision().filter(|r| !r.is_empty()),
        }
    }
}

/// Set `name=value` on `url`, replacing any existing `name` parameters.
fn set_search_param(url: &mut Url, name: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(name, value);
}

#[derive(Debug)]
struct NormalizedEntry {
    url: String,
    cache_key: String,
    cache_mode: CacheMode,
    integrity: Option<String>,
}

fn normalize(entry: &ManifestEntry, location: &WorkerLocation) -> Result<NormalizedEntry> {
    if entry.url().is_empty() {
        return Err(ServiceWorkerError::InvalidEntry(format!("{entry:?}")));
    }

    let url = location.resolve(entry.url())?;
    let (cache_key, cache_mode) = match entry.revision() {
        Some(revision) => {
            let mut key = url.clone();
            set_search_param(&mut key, REVISION_SEARCH_PARAM, revision);
            (key.to_string(), CacheMode::Reload)
        }
        None => (url.to_string(), CacheMode::Default),
    };

    Ok(NormalizedEntry {
        url: url.to_string(),
        cache_key,
        cache_mode,
        integrity: entry.integrity().map(str::to_string),
    })
}

/// Desired precache state, built from manifest entries.
#[derive(Debug, Clone)]
pub struct PrecacheManifest {
    location: WorkerLocation,
    /// URLs in first-added order.
    order: Vec<String>,
    urls_to_cache_keys: HashMap<String, String>,
    urls_to_cache_modes: HashMap<String, CacheMode>,
    cache_keys_to_integrities: HashMap<String, String>,
}

impl PrecacheManifest {
    pub fn new(location: WorkerLocation) -> Self {
        Self {
            location,
            order: Vec::new(),
            urls_to_cache_keys: HashMap::new(),
            urls_to_cache_modes: HashMap::new(),
            cache_keys_to_integrities: HashMap::new(),
        }
    }

    /// Add entries to the manifest.
    ///
    /// Re-adding an identical entry is a no-op. A URL that would map to a
    /// second cache key, or a cache key given a second integrity value,
    /// fails the whole batch and leaves the manifest unchanged.
    pub fn add_entries<I, E>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<ManifestEntry>,
    {
        let mut staged = self.clone();
        let mut unrevisioned = Vec::new();

        for entry in entries {
            let entry = entry.into();
            if entry.is_unrevisioned() {
                unrevisioned.push(entry.url().to_string());
            }

            let normalized = normalize(&entry, &self.location)?;
            staged.insert(normalized)?;
        }

        if !unrevisioned.is_empty() {
            warn!(
                urls = %unrevisioned.join(", "),
                "Precaching URLs without revision info. This is generally NOT safe"
            );
        }

        *self = staged;
        Ok(())
    }

    fn insert(&mut self, entry: NormalizedEntry) -> Result<()> {
        let NormalizedEntry {
            url,
            cache_key,
            cache_mode,
            integrity,
        } = entry;

        if let Some(existing) = self.urls_to_cache_keys.get(&url) {
            if *existing != cache_key {
                return Err(ServiceWorkerError::ConflictingEntry {
                    first_entry: existing.clone(),
                    second_entry: cache_key,
                });
            }
        }

        if let Some(integrity) = integrity {
            if let Some(existing) = self.cache_keys_to_integrities.get(&cache_key) {
                if *existing != integrity {
                    return Err(ServiceWorkerError::ConflictingIntegrity { url });
                }
            }
            self.cache_keys_to_integrities
                .insert(cache_key.clone(), integrity);
        }

        if !self.urls_to_cache_keys.contains_key(&url) {
            self.order.push(url.clone());
        }
        self.urls_to_cache_modes.insert(url.clone(), cache_mode);
        self.urls_to_cache_keys.insert(url, cache_key);
        Ok(())
    }

    /// `(url, cache_key)` pairs in first-added order.
    pub fn urls_to_cache_keys(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .filter_map(|url| {
                self.urls_to_cache_keys
                    .get(url)
                    .map(|key| (url.as_str(), key.as_str()))
            })
            .collect()
    }

    pub fn cached_urls(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Cache key for `url`, resolved against the worker location.
    pub fn cache_key_for_url(&self, url: &str) -> Option<&str> {
        let url = self.location.resolve(url).ok()?;
        self.urls_to_cache_keys
            .get(url.as_str())
            .map(String::as_str)
    }

    /// Cache key for an already absolute URL string, without resolving.
    pub(crate) fn cache_key_for_href(&self, href: &str) -> Option<&str> {
        self.urls_to_cache_keys.get(href).map(String::as_str)
    }

    pub fn cache_mode_for_url(&self, url: &str) -> Option<CacheMode> {
        self.urls_to_cache_modes.get(url).copied()
    }

    pub fn integrity_for_cache_key(&self, cache_key: &str) -> Option<&str> {
        self.cache_keys_to_integrities
            .get(cache_key)
            .map(String::as_str)
    }

    pub fn cache_keys(&self) -> HashSet<&str> {
        self.urls_to_cache_keys
            .values()
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn location(&self) -> &WorkerLocation {
        &self.location
    }
}
