//! Plugin hooks and the ordered pipeline that runs them.
//!
//! Each lifecycle hook is its own trait. A [`Plugin`] exposes the hooks it
//! implements through the capability accessors; [`Plugins`] filters the
//! registered plugins by capability and runs the hooks in registration
//! order, threading the request or response from one hook to the next.
//!
//! ```text
//! requestWillFetch ─► network ─► fetchDidSucceed
//!                        └─(error)─► fetchDidFail
//!
//! cacheKeyWillBeUsed ─► cacheWillUpdate ─► put ─► cacheDidUpdate
//! cacheKeyWillBeUsed ─► match ─► cachedResponseWillBeUsed
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use rustkit_net::{Request, Response};
use tracing::trace;

use crate::error::{Result, ServiceWorkerError};
use crate::event::FetchEvent;

/// Whether a cache key is being computed for a read or a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKeyMode {
    Read,
    Write,
}

/// `cacheKeyWillBeUsed`: rewrite the request used as a cache key.
#[async_trait]
pub trait CacheKeyMutator: Send + Sync {
    async fn cache_key_will_be_used(&self, request: Request, mode: CacheKeyMode)
        -> Result<Request>;
}

/// `cacheWillUpdate`: decide whether a response may be stored.
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    /// Return `None` to veto storage.
    async fn cache_will_update(
        &self,
        request: &Request,
        response: Response,
        event: Option<&FetchEvent>,
    ) -> Result<Option<Response>>;
}

/// Old and new values passed to `cacheDidUpdate`.
#[derive(Debug)]
pub struct CacheUpdate<'a> {
    pub cache_name: &'a str,
    pub request: &'a Request,
    pub old_response: Option<&'a Response>,
    pub new_response: &'a Response,
    pub event: Option<&'a FetchEvent>,
}

/// `cacheDidUpdate`: observe a completed cache write.
#[async_trait]
pub trait CacheUpdateObserver: Send + Sync {
    async fn cache_did_update(&self, update: &CacheUpdate<'_>) -> Result<()>;
}

/// `cachedResponseWillBeUsed`: adjust or drop a response read from a cache.
#[async_trait]
pub trait CachedResponseMutator: Send + Sync {
    async fn cached_response_will_be_used(
        &self,
        cache_name: &str,
        request: &Request,
        cached: Option<Response>,
        event: Option<&FetchEvent>,
    ) -> Result<Option<Response>>;
}

/// `requestWillFetch`: rewrite a request before it hits the network.
#[async_trait]
pub trait RequestMutator: Send + Sync {
    async fn request_will_fetch(&self, request: Request, event: Option<&FetchEvent>)
        -> Result<Request>;
}

/// `fetchDidSucceed`: rewrite a network response.
#[async_trait]
pub trait FetchResponseMutator: Send + Sync {
    async fn fetch_did_succeed(
        &self,
        request: &Request,
        response: Response,
        event: Option<&FetchEvent>,
    ) -> Result<Response>;
}

/// Details passed to `fetchDidFail`.
#[derive(Debug)]
pub struct FetchFailure<'a> {
    pub error: &'a ServiceWorkerError,
    /// The request as first handed to the pipeline.
    pub original_request: &'a Request,
    /// The request after `requestWillFetch` hooks.
    pub request: &'a Request,
    pub event: Option<&'a FetchEvent>,
}

/// `fetchDidFail`: observe a network failure. Cannot recover from it.
#[async_trait]
pub trait FetchFailureObserver: Send + Sync {
    async fn fetch_did_fail(&self, failure: &FetchFailure<'_>);
}

/// A plugin is a value implementing zero or more hooks.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str {
        "plugin"
    }

    fn cache_key_mutator(&self) -> Option<&dyn CacheKeyMutator> {
        None
    }

    fn response_validator(&self) -> Option<&dyn ResponseValidator> {
        None
    }

    fn cache_update_observer(&self) -> Option<&dyn CacheUpdateObserver> {
        None
    }

    fn cached_response_mutator(&self) -> Option<&dyn CachedResponseMutator> {
        None
    }

    fn request_mutator(&self) -> Option<&dyn RequestMutator> {
        None
    }

    fn fetch_response_mutator(&self) -> Option<&dyn FetchResponseMutator> {
        None
    }

    fn fetch_failure_observer(&self) -> Option<&dyn FetchFailureObserver> {
        None
    }
}

/// Ordered plugin list.
#[derive(Clone, Default)]
pub struct Plugins {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin; hooks run in registration order.
    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Builder form of [`Plugins::push`].
    pub fn with(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.push(plugin);
        self
    }

    pub fn extend(&mut self, other: &Plugins) {
        self.plugins.extend(other.plugins.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn has_response_validators(&self) -> bool {
        self.plugins.iter().any(|p| p.response_validator().is_some())
    }

    pub fn has_cache_update_observers(&self) -> bool {
        self.plugins
            .iter()
            .any(|p| p.cache_update_observer().is_some())
    }

    pub fn has_fetch_failure_observers(&self) -> bool {
        self.plugins
            .iter()
            .any(|p| p.fetch_failure_observer().is_some())
    }

    /// The last registered `cacheWillUpdate` hook.
    pub fn last_response_validator(&self) -> Option<&dyn ResponseValidator> {
        self.plugins
            .iter()
            .rev()
            .find_map(|p| p.response_validator())
    }

    /// Run `cacheKeyWillBeUsed` hooks.
    pub async fn cache_key_will_be_used(
        &self,
        mut request: Request,
        mode: CacheKeyMode,
    ) -> Result<Request> {
        for (plugin, hook) in self
            .plugins
            .iter()
            .filter_map(|p| p.cache_key_mutator().map(|h| (p, h)))
        {
            trace!(plugin = plugin.name(), ?mode, url = %request.url, "cacheKeyWillBeUsed");
            request = hook.cache_key_will_be_used(request, mode).await?;
        }
        Ok(request)
    }

    /// Run `requestWillFetch` hooks. Each hook gets a copy of the current request.
    pub async fn request_will_fetch(
        &self,
        mut request: Request,
        event: Option<&FetchEvent>,
    ) -> Result<Request> {
        for hook in self.plugins.iter().filter_map(|p| p.request_mutator()) {
            request = hook.request_will_fetch(request.duplicate(), event).await?;
        }
        Ok(request)
    }

    /// Run `fetchDidSucceed` hooks.
    pub async fn fetch_did_succeed(
        &self,
        request: &Request,
        mut response: Response,
        event: Option<&FetchEvent>,
    ) -> Result<Response> {
        for hook in self.plugins.iter().filter_map(|p| p.fetch_response_mutator()) {
            response = hook.fetch_did_succeed(request, response, event).await?;
        }
        Ok(response)
    }

    /// Run `fetchDidFail` hooks.
    pub async fn fetch_did_fail(&self, failure: &FetchFailure<'_>) {
        for hook in self.plugins.iter().filter_map(|p| p.fetch_failure_observer()) {
            hook.fetch_did_fail(failure).await;
        }
    }

    /// Run `cacheWillUpdate` hooks, stopping at the first veto.
    ///
    /// Without any such hook only `200` responses are accepted.
    pub async fn cache_will_update(
        &self,
        request: &Request,
        response: Response,
        event: Option<&FetchEvent>,
    ) -> Result<Option<Response>> {
        if !self.has_response_validators() {
            return Ok((response.status.as_u16() == 200).then_some(response));
        }

        let mut current = response;
        for hook in self.plugins.iter().filter_map(|p| p.response_validator()) {
            match hook.cache_will_update(request, current, event).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Run `cachedResponseWillBeUsed` hooks.
    pub async fn cached_response_will_be_used(
        &self,
        cache_name: &str,
        request: &Request,
        mut cached: Option<Response>,
        event: Option<&FetchEvent>,
    ) -> Result<Option<Response>> {
        for hook in self.plugins.iter().filter_map(|p| p.cached_response_mutator()) {
            cached = hook
                .cached_response_will_be_used(cache_name, request, cached, event)
                .await?;
        }
        Ok(cached)
    }

    /// Run `cacheDidUpdate` hooks.
    pub async fn cache_did_update(&self, update: &CacheUpdate<'_>) -> Result<()> {
        for hook in self.plugins.iter().filter_map(|p| p.cache_update_observer()) {
            hook.cache_did_update(update).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl FromIterator<Arc<dyn Plugin>> for Plugins {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Plugin>>>(iter: I) -> Self {
        Self {
            plugins: iter.into_iter().collect(),
        }
    }
}
