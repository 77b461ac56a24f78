//! Dispatches requests to the first matching route.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rustkit_net::http::Method;
use rustkit_net::{Request, Response};
use tracing::{debug, trace};

use crate::error::{Result, ServiceWorkerError};
use crate::event::FetchEvent;
use crate::location::WorkerLocation;
use crate::routing::handler::{Handler, RouteContext};
use crate::routing::route::{Capture, MatchContext, MatchResult, Params, Route};

/// Routes grouped by method, each group in registration order.
pub struct Router {
    location: WorkerLocation,
    routes: RwLock<HashMap<Method, Vec<Arc<Route>>>>,
    default_handlers: RwLock<HashMap<Method, Arc<dyn Handler>>>,
    catch_handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl Router {
    pub fn new(location: WorkerLocation) -> Self {
        Self {
            location,
            routes: RwLock::new(HashMap::new()),
            default_handlers: RwLock::new(HashMap::new()),
            catch_handler: RwLock::new(None),
        }
    }

    pub fn location(&self) -> &WorkerLocation {
        &self.location
    }

    /// Build a route from `capture` and register it.
    ///
    /// `method` is ignored when `capture` is already a [`Route`].
    pub fn register_route(
        &self,
        capture: impl Into<Capture>,
        handler: Arc<dyn Handler>,
        method: Method,
    ) -> Result<Arc<Route>> {
        let route = capture.into().into_route(&self.location, handler, method)?;
        Ok(self.add_route(route))
    }

    /// Register a prebuilt route.
    pub fn add_route(&self, route: Route) -> Arc<Route> {
        let route = Arc::new(route);
        debug!(method = %route.method(), "Registering route");
        self.routes
            .write()
            .entry(route.method().clone())
            .or_default()
            .push(Arc::clone(&route));
        route
    }

    /// Remove a route previously returned by [`Router::register_route`].
    pub fn unregister_route(&self, route: &Arc<Route>) -> Result<()> {
        let mut routes = self.routes.write();
        let bucket = routes
            .get_mut(route.method())
            .ok_or_else(|| ServiceWorkerError::RouteNotFound {
                method: route.method().to_string(),
            })?;
        let index = bucket
            .iter()
            .position(|r| Arc::ptr_eq(r, route))
            .ok_or(ServiceWorkerError::RouteNotRegistered)?;
        bucket.remove(index);
        Ok(())
    }

    /// Handler for requests no route matches.
    pub fn set_default_handler(&self, handler: Arc<dyn Handler>, method: Method) {
        self.default_handlers.write().insert(method, handler);
    }

    /// Handler invoked when a route's handler fails.
    pub fn set_catch_handler(&self, handler: Arc<dyn Handler>) {
        *self.catch_handler.write() = Some(handler);
    }

    /// Registered routes for `method`, in order.
    pub fn routes_for(&self, method: &Method) -> Vec<Arc<Route>> {
        self.routes.read().get(method).cloned().unwrap_or_default()
    }

    /// First route whose matcher accepts the request, with its params.
    pub fn find_matching_route(&self, ctx: &MatchContext<'_>) -> Option<(Arc<Route>, Params)> {
        let routes = self.routes.read();
        let bucket = routes.get(&ctx.request.method)?;
        bucket.iter().find_map(|route| match route.matches(ctx) {
            MatchResult::Matched(params) => Some((Arc::clone(route), params)),
            MatchResult::NoMatch => None,
        })
    }

    /// Route `request` and return the pending response.
    ///
    /// `None` means the router does not handle the request (non-HTTP scheme,
    /// or no matching route and no default handler) and the host should
    /// fall back to its normal network behaviour.
    pub fn handle_request(
        &self,
        request: Request,
        event: Option<FetchEvent>,
    ) -> Option<BoxFuture<'static, Result<Response>>> {
        let url = request.url.clone();
        if !url.scheme().starts_with("http") {
            debug!(url = %url, "Ignoring non-HTTP request");
            return None;
        }

        let same_origin = self.location.is_same_origin(&url);
        let matched = self.find_matching_route(&MatchContext {
            url: &url,
            request: &request,
            event: event.as_ref(),
            same_origin,
        });

        let (handler, route_catch, params) = match matched {
            Some((route, params)) => {
                trace!(url = %self.location.friendly_url(&url), "Found matching route");
                (
                    Arc::clone(route.handler()),
                    route.catch_handler().cloned(),
                    params,
                )
            }
            None => {
                let default = self.default_handlers.read().get(&request.method).cloned();
                let Some(default) = default else {
                    trace!(url = %self.location.friendly_url(&url), "No route matched");
                    return None;
                };
                debug!(url = %self.location.friendly_url(&url), "Using default handler");
                (default, None, Params::new())
            }
        };

        let catch_handler = route_catch.or_else(|| self.catch_handler.read().clone());
        let ctx = RouteContext {
            url,
            request,
            event,
            params,
        };

        Some(
            async move {
                let fallback_ctx = catch_handler.as_ref().map(|_| ctx.clone());
                match handler.handle(ctx).await {
                    Ok(response) => Ok(response),
                    Err(error) => match (catch_handler, fallback_ctx) {
                        (Some(catch), Some(ctx)) => {
                            debug!(url = %ctx.url, error = %error, "Handler failed; using catch handler");
                            catch.handle(ctx).await
                        }
                        _ => Err(error),
                    },
                }
            }
            .boxed(),
        )
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read();
        f.debug_struct("Router")
            .field("location", &self.location.href().as_str())
            .field("routes", &routes.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
