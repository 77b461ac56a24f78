//! Worker configuration loaded from JSON.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache_names::CacheNameDetails;
use crate::error::{Result, ServiceWorkerError};
use crate::location::WorkerLocation;
use crate::precache::PrecacheRouteOptions;

/// Serializable form of [`PrecacheRouteOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheRouteConfig {
    /// Regular expressions for query parameter names to ignore.
    pub ignore_url_parameters_matching: Vec<String>,
    pub directory_index: Option<String>,
    pub clean_urls: bool,
}

impl Default for PrecacheRouteConfig {
    fn default() -> Self {
        Self {
            ignore_url_parameters_matching: vec!["^utm_".to_string()],
            directory_index: Some("index.html".to_string()),
            clean_urls: true,
        }
    }
}

impl PrecacheRouteConfig {
    /// Compile into route options.
    pub fn to_options(&self) -> Result<PrecacheRouteOptions> {
        let patterns = self
            .ignore_url_parameters_matching
            .iter()
            .map(|source| {
                Regex::new(source)
                    .map_err(|e| ServiceWorkerError::Config(format!("pattern {source:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PrecacheRouteOptions {
            ignore_url_parameters_matching: patterns,
            directory_index: self.directory_index.clone().filter(|d| !d.is_empty()),
            clean_urls: self.clean_urls,
            url_manipulation: None,
        })
    }
}

/// Configuration for a [`crate::ServiceWorkerScope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWorkerConfig {
    /// Worker script URL; the base for relative manifest URLs.
    pub location: String,

    /// Registration scope. Defaults to the script's directory.
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub cache_names: CacheNameDetails,

    #[serde(default)]
    pub precache_route: PrecacheRouteConfig,
}

impl ServiceWorkerConfig {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            scope: None,
            cache_names: CacheNameDetails::default(),
            precache_route: PrecacheRouteConfig::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn worker_location(&self) -> Result<WorkerLocation> {
        WorkerLocation::parse(&self.location)
    }

    /// The registration scope URL.
    pub fn scope_url(&self) -> Result<Url> {
        let location = self.worker_location()?;
        match &self.scope {
            Some(scope) => location.resolve(scope),
            None => location.resolve("./"),
        }
    }

    /// Cache name parts, with the scope as suffix unless one is configured.
    pub fn resolved_cache_names(&self) -> Result<CacheNameDetails> {
        let mut names = self.cache_names.clone();
        if names.suffix.is_empty() {
            names.suffix = self.scope_url()?.to_string();
        }
        Ok(names)
    }
}
