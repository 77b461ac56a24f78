//! Reconciles the manifest with the precache store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use hashbrown::HashSet;
use parking_lot::RwLock;
use rustkit_net::{CacheMode, CredentialsMode, Request, Response};
use tracing::{debug, info};
use url::Url;

use crate::cache_store::{CacheStore, PutParams};
use crate::error::{Result, ServiceWorkerError};
use crate::fetch::FetchPipeline;
use crate::location::RequestInfo;
use crate::plugin::Plugins;
use crate::precache::manifest::{ManifestEntry, PrecacheManifest};
use crate::response::{copy_response, ResponseInit};
use crate::routing::{Handler, RouteContext};
use crate::storage::MatchOptions;

/// Param carrying the resolved cache key from the precache route matcher.
pub const CACHE_KEY_PARAM: &str = "cacheKey";

/// Outcome of [`PrecacheController::install`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallResult {
    /// URLs fetched and written during this install.
    pub updated_urls: Vec<String>,
    /// URLs whose cache key was already stored.
    pub not_updated_urls: Vec<String>,
}

/// Outcome of [`PrecacheController::activate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub deleted_urls: Vec<String>,
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ServiceWorkerError::InvalidUrl(format!("{url}: {e}")))
}

/// Owns one named precache store and the manifest describing it.
pub struct PrecacheController {
    cache_name: String,
    store: CacheStore,
    pipeline: FetchPipeline,
    manifest: RwLock<PrecacheManifest>,
    install_started: AtomicBool,
}

impl PrecacheController {
    pub fn new(cache_name: impl Into<String>, store: CacheStore, pipeline: FetchPipeline) -> Self {
        let manifest = PrecacheManifest::new(store.location().clone());
        Self {
            cache_name: cache_name.into(),
            store,
            pipeline,
            manifest: RwLock::new(manifest),
            install_started: AtomicBool::new(false),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.pipeline
    }

    /// Add entries to the manifest. Fails once installation has begun.
    pub fn add_to_cache_list<I, E>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<ManifestEntry>,
    {
        if self.install_started.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::StateError(
                "precache manifest cannot change after install has started".into(),
            ));
        }
        self.manifest.write().add_entries(entries)
    }

    /// Snapshot of the current manifest.
    pub fn manifest(&self) -> PrecacheManifest {
        self.manifest.read().clone()
    }

    pub fn urls_to_cache_keys(&self) -> Vec<(String, String)> {
        self.manifest
            .read()
            .urls_to_cache_keys()
            .into_iter()
            .map(|(url, key)| (url.to_string(), key.to_string()))
            .collect()
    }

    pub fn cached_urls(&self) -> Vec<String> {
        self.manifest
            .read()
            .cached_urls()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn cache_key_for_url(&self, url: &str) -> Option<String> {
        self.manifest
            .read()
            .cache_key_for_url(url)
            .map(str::to_string)
    }

    pub fn integrity_for_cache_key(&self, cache_key: &str) -> Option<String> {
        self.manifest
            .read()
            .integrity_for_cache_key(cache_key)
            .map(str::to_string)
    }

    pub(crate) fn cache_key_for_href(&self, href: &str) -> Option<String> {
        self.manifest
            .read()
            .cache_key_for_href(href)
            .map(str::to_string)
    }

    /// Fetch and store every manifest entry whose cache key is missing.
    ///
    /// All missing entries are fetched concurrently; the first failure
    /// aborts the install. Entries already written stay written.
    pub async fn install(&self, plugins: &Plugins) -> Result<InstallResult> {
        self.install_started.store(true, Ordering::SeqCst);
        let manifest = self.manifest();

        let cache = self.store.storage().open(&self.cache_name).await?;
        let existing: HashSet<String> = cache
            .keys()
            .await?
            .into_iter()
            .map(|request| request.url.to_string())
            .collect();

        let mut result = InstallResult::default();
        let mut to_fetch = Vec::new();
        for (url, cache_key) in manifest.urls_to_cache_keys() {
            if existing.contains(cache_key) {
                result.not_updated_urls.push(url.to_string());
            } else {
                result.updated_urls.push(url.to_string());
                to_fetch.push((url, cache_key));
            }
        }

        debug!(
            cache_name = %self.cache_name,
            missing = to_fetch.len(),
            present = result.not_updated_urls.len(),
            "Starting precache install"
        );

        let tasks = to_fetch.into_iter().map(|(url, cache_key)| {
            self.add_url_to_cache(
                url,
                cache_key,
                manifest.cache_mode_for_url(url).unwrap_or_default(),
                manifest.integrity_for_cache_key(cache_key),
                plugins,
            )
        });
        future::try_join_all(tasks).await?;

        info!(
            cache_name = %self.cache_name,
            updated = result.updated_urls.len(),
            not_updated = result.not_updated_urls.len(),
            "Precache install complete"
        );
        Ok(result)
    }

    async fn add_url_to_cache(
        &self,
        url: &str,
        cache_key: &str,
        cache_mode: CacheMode,
        integrity: Option<&str>,
        plugins: &Plugins,
    ) -> Result<()> {
        let mut request = Request::get(parse_url(url)?).cache_mode(cache_mode);
        request.credentials = CredentialsMode::SameOrigin;
        if let Some(integrity) = integrity {
            request = request.integrity(integrity);
        }

        let response = self.pipeline.fetch(request.duplicate(), None, plugins).await?;

        // Only the last validator decides during install.
        let valid = match plugins.last_response_validator() {
            Some(validator) => validator
                .cache_will_update(&request, response.clone(), None)
                .await?
                .is_some(),
            None => response.status.as_u16() < 400,
        };
        if !valid {
            return Err(ServiceWorkerError::BadPrecachingResponse {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }

        let response = if response.redirected {
            debug!(url, "Rewriting redirected precache response");
            copy_response(&response, None::<fn(ResponseInit) -> ResponseInit>)
        } else {
            response
        };

        let key_request = if cache_key == url {
            request
        } else {
            Request::get(parse_url(cache_key)?)
        };

        self.store
            .cache_put(PutParams {
                cache_name: &self.cache_name,
                request: key_request,
                response: Some(response),
                event: None,
                match_options: MatchOptions::ignore_search(),
                plugins,
            })
            .await?;
        Ok(())
    }

    /// Delete stored entries the manifest no longer references.
    pub async fn activate(&self) -> Result<CleanupResult> {
        let expected: HashSet<String> = self
            .manifest
            .read()
            .cache_keys()
            .into_iter()
            .map(str::to_string)
            .collect();

        let cache = self.store.storage().open(&self.cache_name).await?;
        let mut result = CleanupResult::default();
        for request in cache.keys().await? {
            let url = request.url.to_string();
            if expected.contains(&url) {
                continue;
            }
            cache.delete(&request, &MatchOptions::default()).await?;
            result.deleted_urls.push(url);
        }

        info!(
            cache_name = %self.cache_name,
            deleted = result.deleted_urls.len(),
            "Precache cleanup complete"
        );
        Ok(result)
    }

    /// Stored response for a manifest URL, or `None` if it is not
    /// precached or not yet stored.
    pub async fn match_precache(&self, request: impl Into<RequestInfo>) -> Result<Option<Response>> {
        let request = request.into();
        match self.cache_key_for_url(request.url_str()) {
            Some(cache_key) => self.match_cache_key(&cache_key).await,
            None => Ok(None),
        }
    }

    pub(crate) async fn match_cache_key(&self, cache_key: &str) -> Result<Option<Response>> {
        let cache = self.store.storage().open(&self.cache_name).await?;
        cache
            .match_request(&Request::get(parse_url(cache_key)?), &MatchOptions::default())
            .await
    }

    /// Handler serving precached responses.
    ///
    /// With `fallback_to_network`, a miss is fetched from the network
    /// instead of failing with `MissingPrecacheEntry`.
    pub fn create_handler(self: &Arc<Self>, fallback_to_network: bool) -> PrecacheHandler {
        PrecacheHandler {
            controller: Arc::clone(self),
            fallback_to_network,
        }
    }

    /// Handler that always answers with the precached response for `url`.
    pub fn create_handler_bound_to_url(
        self: &Arc<Self>,
        url: &str,
        fallback_to_network: bool,
    ) -> Result<BoundPrecacheHandler> {
        if self.cache_key_for_url(url).is_none() {
            return Err(ServiceWorkerError::NonPrecachedUrl {
                url: url.to_string(),
            });
        }
        let request = Request::get(self.store.location().resolve(url)?);
        Ok(BoundPrecacheHandler {
            handler: self.create_handler(fallback_to_network),
            request,
        })
    }
}

impl std::fmt::Debug for PrecacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecacheController")
            .field("cache_name", &self.cache_name)
            .field("entries", &self.manifest.read().len())
            .field("install_started", &self.install_started.load(Ordering::SeqCst))
            .finish()
    }
}

/// See [`PrecacheController::create_handler`].
#[derive(Clone)]
pub struct PrecacheHandler {
    controller: Arc<PrecacheController>,
    fallback_to_network: bool,
}

#[async_trait]
impl Handler for PrecacheHandler {
    async fn handle(&self, ctx: RouteContext) -> Result<Response> {
        // The precache route already resolved the key from a URL variation.
        let routed_key = ctx.params.get(CACHE_KEY_PARAM).cloned();
        let lookup = match &routed_key {
            Some(cache_key) => self.controller.match_cache_key(cache_key).await,
            None => self.controller.match_precache(&ctx.request).await,
        };

        let error = match lookup {
            Ok(Some(response)) => return Ok(response),
            Ok(None) => ServiceWorkerError::MissingPrecacheEntry {
                cache_name: self.controller.cache_name.clone(),
                url: ctx.request.url.to_string(),
            },
            Err(error) => error,
        };

        if !self.fallback_to_network {
            return Err(error);
        }

        debug!(url = %ctx.request.url, reason = %error, "Precache miss; fetching from network");
        let request = match routed_key {
            Some(cache_key) => Request::get(parse_url(&cache_key)?),
            None => ctx.request,
        };
        self.controller.pipeline.fetch_direct(request).await
    }
}

impl std::fmt::Debug for PrecacheHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecacheHandler")
            .field("cache_name", &self.controller.cache_name)
            .field("fallback_to_network", &self.fallback_to_network)
            .finish()
    }
}

/// See [`PrecacheController::create_handler_bound_to_url`].
#[derive(Clone)]
pub struct BoundPrecacheHandler {
    handler: PrecacheHandler,
    request: Request,
}

impl BoundPrecacheHandler {
    /// The fixed request this handler answers.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub async fn call(&self) -> Result<Response> {
        self.handler
            .handle(RouteContext::for_request(self.request.duplicate()))
            .await
    }
}

impl std::fmt::Debug for BoundPrecacheHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundPrecacheHandler")
            .field("handler", &self.handler)
            .field("url", &self.request.url.as_str())
            .finish()
    }
}

#[async_trait]
impl Handler for BoundPrecacheHandler {
    async fn handle(&self, _ctx: RouteContext) -> Result<Response> {
        self.call().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::WorkerLocation;
    use crate::plugin::{Plugin, ResponseValidator};
    use crate::precache::manifest::PrecacheEntry;
    use crate::storage::{CacheStorage, MemoryCacheStorage};
    use parking_lot::Mutex;
    use rustkit_net::http::StatusCode;
    use rustkit_net::{Fetch, NetError};

    /// Serves canned bodies by path and records every fetched request.
    #[derive(Default)]
    struct StaticServer {
        fetched: Mutex<Vec<String>>,
        requests: Mutex<Vec<Request>>,
        missing: Vec<&'static str>,
        redirected: Vec<&'static str>,
    }

    #[async_trait]
    impl Fetch for StaticServer {
        async fn fetch(&self, request: Request) -> rustkit_net::Result<Response> {
            let path = request.url.path().to_string();
            self.fetched.lock().push(request.url.to_string());
            self.requests.lock().push(request.clone());
            if path == "/offline-only" {
                return Err(NetError::RequestFailed("offline".into()));
            }
            if self.missing.contains(&path.as_str()) {
                return Ok(Response::new(StatusCode::NOT_FOUND, "missing"));
            }
            let response = Response::ok_with_body(format!("body of {path}"))
                .with_url(request.url.clone());
            Ok(response.with_redirected(self.redirected.contains(&path.as_str())))
        }
    }

    struct Fixture {
        storage: MemoryCacheStorage,
        server: Arc<StaticServer>,
        controller: Arc<PrecacheController>,
    }

    fn fixture_with(storage: MemoryCacheStorage, server: StaticServer) -> Fixture {
        let server = Arc::new(server);
        let store = CacheStore::new(
            Arc::new(storage.clone()),
            WorkerLocation::parse("https://example.com/sw.js").unwrap(),
        );
        let controller = Arc::new(PrecacheController::new(
            "precache-test",
            store,
            FetchPipeline::new(server.clone()),
        ));
        Fixture {
            storage,
            server,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryCacheStorage::new(), StaticServer::default())
    }

    fn entries() -> Vec<ManifestEntry> {
        vec![
            PrecacheEntry::new("/index.html").with_revision("1").into(),
            PrecacheEntry::new("/app.js").with_revision("2").into(),
            "/logo.png".into(),
        ]
    }

    async fn stored_keys(storage: &MemoryCacheStorage) -> Vec<String> {
        let cache = storage.open("precache-test").await.unwrap();
        cache
            .keys()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.url.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_install_into_empty_store() {
        let f = fixture();
        f.controller.add_to_cache_list(entries()).unwrap();

        let result = f.controller.install(&Plugins::new()).await.unwrap();

        assert_eq!(result.updated_urls, f.controller.cached_urls());
        assert!(result.not_updated_urls.is_empty());
        let mut keys = stored_keys(&f.storage).await;
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "https://example.com/app.js?__WB_REVISION__=2",
                "https://example.com/index.html?__WB_REVISION__=1",
                "https://example.com/logo.png",
            ]
        );
        // Revisioned entries are fetched by URL, not by cache key.
        assert!(f
            .server
            .fetched
            .lock()
            .iter()
            .all(|u| !u.contains("__WB_REVISION__")));
    }

    #[tokio::test]
    async fn test_install_request_fields() {
        let f = fixture();
        f.controller
            .add_to_cache_list([
                ManifestEntry::from(
                    PrecacheEntry::new("/a.js")
                        .with_revision("7")
                        .with_integrity("sha256-zz"),
                ),
                ManifestEntry::from("/b.js"),
            ])
            .unwrap();
        f.controller.install(&Plugins::new()).await.unwrap();

        let mut seen: Vec<_> = f
            .server
            .requests
            .lock()
            .iter()
            .map(|r| (r.url.to_string(), r.cache, r.integrity.clone(), r.credentials))
            .collect();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                (
                    "https://example.com/a.js".to_string(),
                    CacheMode::Reload,
                    Some("sha256-zz".to_string()),
                    CredentialsMode::SameOrigin,
                ),
                (
                    "https://example.com/b.js".to_string(),
                    CacheMode::Default,
                    None,
                    CredentialsMode::SameOrigin,
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_install_fetches_nothing() {
        let f = fixture();
        f.controller.add_to_cache_list(entries()).unwrap();
        f.controller.install(&Plugins::new()).await.unwrap();
        let fetched = f.server.fetched.lock().len();

        let again = Arc::new(PrecacheController::new(
            "precache-test",
            f.controller.store().clone(),
            f.controller.pipeline().clone(),
        ));
        again.add_to_cache_list(entries()).unwrap();
        let result = again.install(&Plugins::new()).await.unwrap();

        assert!(result.updated_urls.is_empty());
        assert_eq!(result.not_updated_urls, again.cached_urls());
        assert_eq!(f.server.fetched.lock().len(), fetched);
    }

    #[tokio::test]
    async fn test_activate_removes_unreferenced_entries() {
        let f = fixture();
        f.controller.add_to_cache_list(entries()).unwrap();
        f.controller.install(&Plugins::new()).await.unwrap();

        let shrunk = PrecacheController::new(
            "precache-test",
            f.controller.store().clone(),
            f.controller.pipeline().clone(),
        );
        shrunk
            .add_to_cache_list([PrecacheEntry::new("/index.html").with_revision("1")])
            .unwrap();
        let result = shrunk.activate().await.unwrap();

        let mut deleted = result.deleted_urls;
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "https://example.com/app.js?__WB_REVISION__=2",
                "https://example.com/logo.png",
            ]
        );
        assert_eq!(
            stored_keys(&f.storage).await,
            vec!["https://example.com/index.html?__WB_REVISION__=1"]
        );
    }

    #[tokio::test]
    async fn test_bad_response_aborts_install() {
        let f = fixture_with(
            MemoryCacheStorage::new(),
            StaticServer {
                missing: vec!["/gone.css"],
                ..Default::default()
            },
        );
        f.controller
            .add_to_cache_list([PrecacheEntry::new("/gone.css").with_revision("1")])
            .unwrap();

        let err = f.controller.install(&Plugins::new()).await.unwrap_err();

        match err {
            ServiceWorkerError::BadPrecachingResponse { url, status } => {
                assert_eq!(url, "https://example.com/gone.css");
                assert_eq!(status, 404);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(stored_keys(&f.storage).await.is_empty());
    }

    struct AcceptEverything;

    #[async_trait]
    impl ResponseValidator for AcceptEverything {
        async fn cache_will_update(
            &self,
            _request: &Request,
            response: Response,
            _event: Option<&crate::event::FetchEvent>,
        ) -> Result<Option<Response>> {
            Ok(Some(response))
        }
    }

    impl Plugin for AcceptEverything {
        fn response_validator(&self) -> Option<&dyn ResponseValidator> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn test_validator_plugin_overrides_status_check() {
        let f = fixture_with(
            MemoryCacheStorage::new(),
            StaticServer {
                missing: vec!["/soft-404"],
                ..Default::default()
            },
        );
        f.controller.add_to_cache_list(["/soft-404"]).unwrap();
        let plugins = Plugins::new().with(Arc::new(AcceptEverything));

        f.controller.install(&plugins).await.unwrap();

        let cached = f.controller.match_precache("/soft-404").await.unwrap().unwrap();
        assert_eq!(cached.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_redirected_response_stored_as_plain_copy() {
        let f = fixture_with(
            MemoryCacheStorage::new(),
            StaticServer {
                redirected: vec!["/shell"],
                ..Default::default()
            },
        );
        f.controller
            .add_to_cache_list([PrecacheEntry::new("/shell").with_revision("9")])
            .unwrap();
        f.controller.install(&Plugins::new()).await.unwrap();

        let cached = f.controller.match_precache("/shell").await.unwrap().unwrap();
        assert!(!cached.redirected);
        assert_eq!(cached.text().unwrap(), "body of /shell");
    }

    #[tokio::test]
    async fn test_match_precache_hit_and_miss() {
        let f = fixture();
        f.controller.add_to_cache_list(entries()).unwrap();

        assert!(f.controller.match_precache("/index.html").await.unwrap().is_none());

        f.controller.install(&Plugins::new()).await.unwrap();
        let hit = f.controller.match_precache("/index.html").await.unwrap();
        assert_eq!(hit.unwrap().text().unwrap(), "body of /index.html");
        assert!(f.controller.match_precache("/unknown.html").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manifest_frozen_after_install() {
        let f = fixture();
        f.controller.add_to_cache_list(entries()).unwrap();
        f.controller.install(&Plugins::new()).await.unwrap();

        let err = f.controller.add_to_cache_list(["/late.js"]).unwrap_err();
        assert_eq!(err.kind(), "invalid-state");
    }

    #[tokio::test]
    async fn test_handler_miss_with_and_without_fallback() {
        let f = fixture();
        f.controller.add_to_cache_list(["/index.html"]).unwrap();
        let request = Request::get(Url::parse("https://example.com/index.html").unwrap());

        let strict = f.controller.create_handler(false);
        let err = strict
            .handle(RouteContext::for_request(request.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "missing-precache-entry");

        let lenient = f.controller.create_handler(true);
        let response = lenient
            .handle(RouteContext::for_request(request))
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "body of /index.html");
    }

    #[tokio::test]
    async fn test_bound_handler() {
        let f = fixture();
        f.controller.add_to_cache_list(entries()).unwrap();

        let err = f
            .controller
            .create_handler_bound_to_url("/not-listed.html", true)
            .unwrap_err();
        assert!(format!("{:?}", f.controller.create_handler(true)).contains("precache-test"));
        assert_eq!(err.kind(), "non-precached-url");

        f.controller.install(&Plugins::new()).await.unwrap();
        let shell = f
            .controller
            .create_handler_bound_to_url("/index.html", false)
            .unwrap();
        let fetched = f.server.fetched.lock().len();
        assert_eq!(shell.call().await.unwrap().text().unwrap(), "body of /index.html");
        assert_eq!(f.server.fetched.lock().len(), fetched);
    }

    #[tokio::test]
    async fn test_network_failure_propagates_from_install() {
        let f = fixture();
        f.controller
            .add_to_cache_list(["/index.html", "/offline-only"])
            .unwrap();
        let err = f.controller.install(&Plugins::new()).await.unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
