//! Request handlers dispatched by the router.

use std::future::Future;

use async_trait::async_trait;
use rustkit_net::{Request, Response};
use url::Url;

use crate::error::Result;
use crate::event::FetchEvent;
use crate::routing::route::Params;

/// Everything a handler sees about the request it is answering.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub url: Url,
    pub request: Request,
    pub event: Option<FetchEvent>,
    /// Values captured by the matcher; empty when it captured nothing.
    pub params: Params,
}

impl RouteContext {
    /// Context for a request handled outside the router.
    pub fn for_request(request: Request) -> Self {
        Self {
            url: request.url.clone(),
            request,
            event: None,
            params: Params::new(),
        }
    }
}

/// Turns a request context into a response.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: RouteContext) -> Result<Response>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RouteContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RouteContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn handle(&self, ctx: RouteContext) -> Result<Response> {
        (self.0)(ctx).await
    }
}
