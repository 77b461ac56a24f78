//! Plugin-aware cache reads and writes over a [`CacheStorage`].

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use rustkit_net::{Request, Response};
use tracing::{debug, warn};

use crate::error::{Result, ServiceWorkerError};
use crate::event::FetchEvent;
use crate::location::WorkerLocation;
use crate::plugin::{CacheKeyMode, CacheUpdate, Plugins};
use crate::storage::{CacheStorage, MatchOptions};

type QuotaCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Callbacks run when a cache write fails for lack of quota.
#[derive(Clone, Default)]
pub struct QuotaErrorCallbacks {
    callbacks: Arc<RwLock<Vec<QuotaCallback>>>,
}

impl QuotaErrorCallbacks {
    pub fn register<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks
            .write()
            .push(Arc::new(move || callback().boxed()));
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every callback in registration order.
    pub async fn execute(&self) {
        let callbacks = self.callbacks.read().clone();
        debug!(count = callbacks.len(), "Running quota error callbacks");
        for callback in callbacks {
            callback().await;
        }
    }
}

/// Arguments for [`CacheStore::cache_match`].
#[derive(Debug, Clone, Copy)]
pub struct MatchParams<'a> {
    pub cache_name: &'a str,
    pub request: &'a Request,
    pub event: Option<&'a FetchEvent>,
    pub match_options: MatchOptions,
    pub plugins: &'a Plugins,
}

/// Arguments for [`CacheStore::cache_put`].
#[derive(Debug)]
pub struct PutParams<'a> {
    pub cache_name: &'a str,
    pub request: Request,
    pub response: Option<Response>,
    pub event: Option<&'a FetchEvent>,
    /// Options used to look up the previous value for `cacheDidUpdate`.
    pub match_options: MatchOptions,
    pub plugins: &'a Plugins,
}

/// Wrapper around the persistent store used by handlers and the precache
/// controller.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
    location: WorkerLocation,
    quota_callbacks: QuotaErrorCallbacks,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn CacheStorage>, location: WorkerLocation) -> Self {
        Self {
            storage,
            location,
            quota_callbacks: QuotaErrorCallbacks::default(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn location(&self) -> &WorkerLocation {
        &self.location
    }

    pub fn quota_callbacks(&self) -> &QuotaErrorCallbacks {
        &self.quota_callbacks
    }

    /// Register a cleanup callback for quota failures.
    pub fn register_quota_error_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.quota_callbacks.register(callback);
    }

    /// Look up a request, applying `cacheKeyWillBeUsed` and
    /// `cachedResponseWillBeUsed` hooks.
    pub async fn cache_match(&self, params: MatchParams<'_>) -> Result<Option<Response>> {
        let MatchParams {
            cache_name,
            request,
            event,
            match_options,
            plugins,
        } = params;

        let cache = self.storage.open(cache_name).await?;
        let key = plugins
            .cache_key_will_be_used(request.clone(), CacheKeyMode::Read)
            .await?;
        let cached = cache.match_request(&key, &match_options).await?;

        debug!(
            cache_name,
            url = %self.location.friendly_url(&key.url),
            hit = cached.is_some(),
            "Cache lookup"
        );

        plugins
            .cached_response_will_be_used(cache_name, &key, cached, event)
            .await
    }

    /// Store a response, honouring `cacheWillUpdate` vetoes.
    ///
    /// Returns whether the response was written.
    pub async fn cache_put(&self, params: PutParams<'_>) -> Result<bool> {
        let PutParams {
            cache_name,
            request,
            response,
            event,
            match_options,
            plugins,
        } = params;

        let key = plugins
            .cache_key_will_be_used(request, CacheKeyMode::Write)
            .await?;

        let Some(response) = response else {
            return Err(ServiceWorkerError::CachePutWithNoResponse {
                url: self.location.friendly_url(&key.url),
            });
        };

        let Some(response) = plugins.cache_will_update(&key, response, event).await? else {
            debug!(
                cache_name,
                url = %self.location.friendly_url(&key.url),
                "Response not cachable; skipping write"
            );
            return Ok(false);
        };

        let cache = self.storage.open(cache_name).await?;

        let old_response = if plugins.has_cache_update_observers() {
            self.cache_match(MatchParams {
                cache_name,
                request: &key,
                event: None,
                match_options,
                plugins: &Plugins::new(),
            })
            .await?
        } else {
            None
        };

        if let Err(e) = cache.put(key.clone(), response.clone()).await {
            if e.is_quota_exceeded() {
                warn!(cache_name, url = %key.url, "Quota exceeded; running cleanup callbacks");
                self.quota_callbacks.execute().await;
            }
            return Err(e);
        }

        plugins
            .cache_did_update(&CacheUpdate {
                cache_name,
                request: &key,
                old_response: old_response.as_ref(),
                new_response: &response,
                event,
            })
            .await?;

        Ok(true)
    }
}
