//! # RustKit Service Workers
//!
//! Offline cache management for RustKit service workers: precaching,
//! request routing and plugin-aware cache reads and writes.
//!
//! ## Features
//!
//! - **Precaching**: revisioned manifests, install/activate reconciliation
//! - **Routing**: exact URL, regex and custom matchers; default and catch handlers
//! - **Plugins**: narrow hook traits around every fetch and cache write
//! - **Cache API**: in-memory (with quota) and on-disk `CacheStorage` backends
//! - **Messages**: `CACHE_URLS` warm-up requests from clients
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerScope
//!     ├── Router ──────────────► Route (matcher + Handler)
//!     │                              └── PrecacheHandler / custom handlers
//!     ├── PrecacheController
//!     │       ├── PrecacheManifest (url → cache key)
//!     │       └── install / activate
//!     ├── FetchPipeline ───────► Fetch (rustkit-net)
//!     └── CacheStore ──────────► CacheStorage
//!                                    └── Cache
//!                                            └── Request → Response
//! ```

pub mod cache_names;
pub mod cache_store;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod location;
pub mod messages;
pub mod plugin;
pub mod precache;
pub mod response;
pub mod routing;
pub mod scope;
pub mod storage;

pub use cache_names::CacheNameDetails;
pub use cache_store::{CacheStore, MatchParams, PutParams, QuotaErrorCallbacks};
pub use config::{PrecacheRouteConfig, ServiceWorkerConfig};
pub use error::{Result, ServiceWorkerError};
pub use event::{ExtendableEvent, ExtendableMessageEvent, FetchEvent, LifecycleEventKind};
pub use fetch::FetchPipeline;
pub use location::{RequestInfo, WorkerLocation};
pub use messages::{CacheUrlsPayload, RequestInit, UrlToCache, WorkerMessage};
pub use plugin::{CacheKeyMode, Plugin, Plugins};
pub use precache::{
    BoundPrecacheHandler, CleanupResult, InstallResult, ManifestEntry, PrecacheController,
    PrecacheEntry, PrecacheHandler, PrecacheManifest, PrecacheRouteOptions,
};
pub use response::{copy_response, ResponseInit};
pub use routing::{
    handler_fn, Capture, Handler, MatchContext, MatchResult, NavigationRouteOptions, Params,
    Route, RouteContext, RouteMatcher, Router,
};
pub use scope::{ServiceWorkerEvent, ServiceWorkerScope, ServiceWorkerState};
pub use storage::{Cache, CacheStorage, DiskCacheStorage, MatchOptions, MemoryCacheStorage};
