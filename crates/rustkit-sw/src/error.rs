//! Error types for the service-worker cache core.

use rustkit_net::NetError;
use thiserror::Error;

/// Errors that can occur in service worker cache operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Invalid precache entry: {0}")]
    InvalidEntry(String),

    #[error("Conflicting precache entries: {first_entry} and {second_entry}")]
    ConflictingEntry {
        first_entry: String,
        second_entry: String,
    },

    #[error("Conflicting integrity values for {url}")]
    ConflictingIntegrity { url: String },

    #[error("Bad precaching response for {url}: status {status}")]
    BadPrecachingResponse { url: String, status: u16 },

    #[error("Attempted to cache {url} with no response")]
    CachePutWithNoResponse { url: String },

    #[error("requestWillFetch plugin failed: {source}")]
    PluginErrorRequestWillFetch {
        #[source]
        source: Box<ServiceWorkerError>,
    },

    #[error("No precached response for {url} in cache {cache_name}")]
    MissingPrecacheEntry { cache_name: String, url: String },

    #[error("URL is not precached: {url}")]
    NonPrecachedUrl { url: String },

    #[error("No routes registered for method {method}")]
    RouteNotFound { method: String },

    #[error("Route is not registered")]
    RouteNotRegistered,

    #[error("Unsupported route type: {0}")]
    UnsupportedRouteType(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Quota exceeded writing to cache {cache_name}")]
    QuotaExceeded { cache_name: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),
}

impl ServiceWorkerError {
    /// Stable kind name, used in logs and message replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidEntry(_) => "add-to-cache-list-unexpected-type",
            Self::ConflictingEntry { .. } => "add-to-cache-list-conflicting-entries",
            Self::ConflictingIntegrity { .. } => "add-to-cache-list-conflicting-integrities",
            Self::BadPrecachingResponse { .. } => "bad-precaching-response",
            Self::CachePutWithNoResponse { .. } => "cache-put-with-no-response",
            Self::PluginErrorRequestWillFetch { .. } => "plugin-error-request-will-fetch",
            Self::MissingPrecacheEntry { .. } => "missing-precache-entry",
            Self::NonPrecachedUrl { .. } => "non-precached-url",
            Self::RouteNotFound { .. } => "unregister-route-but-not-found-with-method",
            Self::RouteNotRegistered => "unregister-route-route-not-registered",
            Self::UnsupportedRouteType(_) => "unsupported-route-type",
            Self::InvalidUrl(_) => "invalid-url",
            Self::QuotaExceeded { .. } => "quota-exceeded",
            Self::StateError(_) => "invalid-state",
            Self::InvalidMessage(_) => "invalid-message",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Plugin(_) => "plugin",
            Self::Network(_) => "network",
        }
    }

    /// Whether this is a storage quota failure.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

impl From<serde_json::Error> for ServiceWorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
