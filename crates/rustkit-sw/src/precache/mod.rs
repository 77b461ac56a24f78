//! Precaching: manifest, install/activate reconciliation and the precache route.
//!
//! ```text
//! manifest entries ──► PrecacheManifest (url → cache key)
//!                            │
//!        install ────────────┼──► fetch missing keys ──► precache store
//!        activate ───────────┼──► delete unreferenced keys
//!        fetch ──► PrecacheRouteMatcher (URL variations) ──► PrecacheHandler
//! ```

pub mod controller;
pub mod manifest;
pub mod route;
pub mod variations;

pub use controller::{
    BoundPrecacheHandler, CleanupResult, InstallResult, PrecacheController, PrecacheHandler,
    CACHE_KEY_PARAM,
};
pub use manifest::{ManifestEntry, PrecacheEntry, PrecacheManifest, REVISION_SEARCH_PARAM};
pub use route::PrecacheRouteMatcher;
pub use variations::{generate_url_variations, remove_ignored_search_params, PrecacheRouteOptions};
