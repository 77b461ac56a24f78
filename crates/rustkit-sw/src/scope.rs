//! The worker scope: owns the router and precache controller and drives
//! them from lifecycle events.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use rustkit_net::{Fetch, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use url::Url;

use crate::cache_names::CacheNameDetails;
use crate::cache_store::CacheStore;
use crate::config::{PrecacheRouteConfig, ServiceWorkerConfig};
use crate::error::{Result, ServiceWorkerError};
use crate::event::{ExtendableEvent, ExtendableMessageEvent, FetchEvent};
use crate::fetch::FetchPipeline;
use crate::location::RequestInfo;
use crate::plugin::{Plugin, Plugins};
use crate::precache::{
    BoundPrecacheHandler, CleanupResult, InstallResult, ManifestEntry, PrecacheController,
    PrecacheRouteMatcher, PrecacheRouteOptions,
};
use crate::routing::{Route, Router};
use crate::storage::CacheStorage;

// ==================== State ====================

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script evaluated, no lifecycle event yet.
    #[default]
    Parsed,
    /// Install event dispatched.
    Installing,
    /// Precache populated; waiting for activation.
    Installed,
    /// Activate event dispatched.
    Activating,
    /// Active and handling fetches.
    Activated,
    /// Install failed.
    Redundant,
}

/// Notifications emitted by a [`ServiceWorkerScope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    StateChange {
        scope: String,
        new_state: ServiceWorkerState,
    },
    PrecacheInstalled(InstallResult),
    PrecacheCleanedUp(CleanupResult),
}

struct StateCell {
    scope: String,
    state: RwLock<ServiceWorkerState>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl StateCell {
    fn get(&self) -> ServiceWorkerState {
        *self.state.read()
    }

    /// Move from `from` to `to`, failing if the current state differs.
    fn transition(&self, from: &[ServiceWorkerState], to: ServiceWorkerState) -> Result<()> {
        let mut state = self.state.write();
        if !from.contains(&*state) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move from {:?} to {:?}",
                *state, to
            )));
        }
        *state = to;
        drop(state);
        self.announce(to);
        Ok(())
    }

    fn set(&self, to: ServiceWorkerState) {
        *self.state.write() = to;
        self.announce(to);
    }

    fn announce(&self, new_state: ServiceWorkerState) {
        debug!(scope = %self.scope, state = ?new_state, "Service worker state changed");
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            scope: self.scope.clone(),
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ==================== Scope ====================

/// An explicitly constructed worker: one router, one precache controller.
pub struct ServiceWorkerScope {
    scope_url: Url,
    cache_names: CacheNameDetails,
    store: CacheStore,
    pipeline: FetchPipeline,
    router: Arc<Router>,
    precache: Arc<PrecacheController>,
    precache_plugins: RwLock<Plugins>,
    precache_route: PrecacheRouteConfig,
    state: Arc<StateCell>,
}

impl ServiceWorkerScope {
    /// Create a scope over `storage`, fetching through `fetcher`.
    pub fn new(
        config: &ServiceWorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>)> {
        let location = config.worker_location()?;
        let scope_url = config.scope_url()?;
        let cache_names = config.resolved_cache_names()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let store = CacheStore::new(storage, location.clone());
        let pipeline = FetchPipeline::new(fetcher);
        let precache = Arc::new(PrecacheController::new(
            cache_names.precache_name(),
            store.clone(),
            pipeline.clone(),
        ));

        info!(
            scope = %scope_url,
            precache = %precache.cache_name(),
            "Service worker scope created"
        );

        let state = Arc::new(StateCell {
            scope: scope_url.to_string(),
            state: RwLock::new(ServiceWorkerState::Parsed),
            event_tx,
        });

        Ok((
            Self {
                scope_url,
                cache_names,
                store,
                pipeline,
                router: Arc::new(Router::new(location)),
                precache,
                precache_plugins: RwLock::new(Plugins::new()),
                precache_route: config.precache_route.clone(),
                state,
            },
            event_rx,
        ))
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.state.get()
    }

    pub fn scope_url(&self) -> &Url {
        &self.scope_url
    }

    pub fn cache_names(&self) -> &CacheNameDetails {
        &self.cache_names
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn precache_controller(&self) -> &Arc<PrecacheController> {
        &self.precache
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.pipeline
    }

    /// Plugins applied while precaching.
    pub fn add_precache_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.precache_plugins.write().push(plugin);
    }

    /// Add entries to the precache manifest.
    pub fn precache<I, E>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<ManifestEntry>,
    {
        self.precache.add_to_cache_list(entries)
    }

    /// Register the precache route.
    pub fn add_route(&self, options: PrecacheRouteOptions) -> Arc<Route> {
        self.router.add_route(Route::precache(&self.precache, options))
    }

    /// Precache route options from the worker config.
    pub fn configured_route_options(&self) -> Result<PrecacheRouteOptions> {
        self.precache_route.to_options()
    }

    /// Register the precache route with the configured options.
    pub fn add_configured_route(&self) -> Result<Arc<Route>> {
        Ok(self.add_route(self.configured_route_options()?))
    }

    /// Look `url` up the way the configured precache route would, trying
    /// every URL variation.
    pub async fn match_precache_route(&self, url: &str) -> Result<Option<Response>> {
        let url = self.router.location().resolve(url)?;
        let matcher =
            PrecacheRouteMatcher::new(Arc::clone(&self.precache), self.configured_route_options()?);
        match matcher.lookup(&url) {
            Some(cache_key) => self.precache.match_cache_key(&cache_key).await,
            None => Ok(None),
        }
    }

    /// [`Self::precache`] followed by [`Self::add_route`].
    pub fn precache_and_route<I, E>(
        &self,
        entries: I,
        options: PrecacheRouteOptions,
    ) -> Result<Arc<Route>>
    where
        I: IntoIterator<Item = E>,
        E: Into<ManifestEntry>,
    {
        self.precache(entries)?;
        Ok(self.add_route(options))
    }

    pub fn create_handler_bound_to_url(&self, url: &str) -> Result<BoundPrecacheHandler> {
        self.precache.create_handler_bound_to_url(url, true)
    }

    pub async fn match_precache(&self, request: impl Into<RequestInfo>) -> Result<Option<Response>> {
        self.precache.match_precache(request).await
    }

    // ==================== Events ====================

    /// Handle the `install` event: populate the precache.
    ///
    /// The work is attached to `event`; the state becomes `Installed` when
    /// it succeeds and `Redundant` when it fails.
    pub fn on_install(&self, event: &ExtendableEvent) -> Result<()> {
        self.state
            .transition(&[ServiceWorkerState::Parsed], ServiceWorkerState::Installing)?;

        let precache = Arc::clone(&self.precache);
        let plugins = self.precache_plugins.read().clone();
        let state = Arc::clone(&self.state);
        event.wait_until(async move {
            match precache.install(&plugins).await {
                Ok(result) => {
                    state.emit(ServiceWorkerEvent::PrecacheInstalled(result));
                    state.set(ServiceWorkerState::Installed);
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, kind = e.kind(), "Precache install failed");
                    state.set(ServiceWorkerState::Redundant);
                    Err(e)
                }
            }
        });
        Ok(())
    }

    /// Handle the `activate` event: drop stale precache entries.
    pub fn on_activate(&self, event: &ExtendableEvent) -> Result<()> {
        self.state
            .transition(&[ServiceWorkerState::Installed], ServiceWorkerState::Activating)?;

        let precache = Arc::clone(&self.precache);
        let state = Arc::clone(&self.state);
        event.wait_until(async move {
            let result = precache.activate().await?;
            state.emit(ServiceWorkerEvent::PrecacheCleanedUp(result));
            state.set(ServiceWorkerState::Activated);
            Ok(())
        });
        Ok(())
    }

    /// Handle a `fetch` event.
    ///
    /// `None` means the host should perform its default network fetch;
    /// this is always the case before the worker is activated.
    pub fn on_fetch(&self, event: FetchEvent) -> Option<BoxFuture<'static, Result<Response>>> {
        if self.state() != ServiceWorkerState::Activated {
            debug!(url = %event.request.url, "Worker not active; not handling fetch");
            return None;
        }
        self.router.handle_request(event.request.clone(), Some(event))
    }

    /// Handle a `message` event. Returns whether the message was understood.
    pub fn on_message(&self, event: &ExtendableMessageEvent) -> Result<bool> {
        self.router.handle_message(event)
    }
}

impl std::fmt::Debug for ServiceWorkerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorkerScope")
            .field("scope", &self.scope_url.as_str())
            .field("state", &self.state())
            .field("precache", &self.precache)
            .field("router", &self.router)
            .finish()
    }
}
