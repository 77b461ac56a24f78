//! Route serving precached responses for any URL variation in the manifest.

use std::sync::Arc;

use tracing::trace;

use crate::precache::controller::{PrecacheController, CACHE_KEY_PARAM};
use crate::precache::variations::{generate_url_variations, PrecacheRouteOptions};
use crate::routing::{MatchContext, MatchResult, Params, Route, RouteMatcher};

/// Matches requests whose URL, or one of its variations, is precached.
pub struct PrecacheRouteMatcher {
    controller: Arc<PrecacheController>,
    options: PrecacheRouteOptions,
}

impl PrecacheRouteMatcher {
    pub fn new(controller: Arc<PrecacheController>, options: PrecacheRouteOptions) -> Self {
        Self {
            controller,
            options,
        }
    }

    /// Cache key of the first variation present in the manifest.
    pub fn lookup(&self, url: &url::Url) -> Option<String> {
        generate_url_variations(url, &self.options)
            .iter()
            .find_map(|candidate| self.controller.cache_key_for_href(candidate.as_str()))
    }
}

impl RouteMatcher for PrecacheRouteMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        let Some(cache_key) = self.lookup(ctx.url) else {
            return MatchResult::NoMatch;
        };
        trace!(url = %ctx.url, cache_key = %cache_key, "Precache route matched");

        let mut params = Params::new();
        if let Some(integrity) = self.controller.integrity_for_cache_key(&cache_key) {
            params.insert("integrity".to_string(), integrity);
        }
        params.insert(CACHE_KEY_PARAM.to_string(), cache_key);
        MatchResult::Matched(params)
    }
}

impl Route {
    /// GET route answering from the precache, falling back to the network.
    pub fn precache(controller: &Arc<PrecacheController>, options: PrecacheRouteOptions) -> Self {
        let handler = Arc::new(controller.create_handler(true));
        Route::new(
            PrecacheRouteMatcher::new(Arc::clone(controller), options),
            handler,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::CacheStore;
    use crate::fetch::FetchPipeline;
    use crate::location::WorkerLocation;
    use crate::plugin::Plugins;
    use crate::precache::manifest::PrecacheEntry;
    use crate::routing::Router;
    use crate::storage::MemoryCacheStorage;
    use async_trait::async_trait;
    use rustkit_net::{Fetch, Request, Response};
    use url::Url;

    struct Echo;

    #[async_trait]
    impl Fetch for Echo {
        async fn fetch(&self, request: Request) -> rustkit_net::Result<Response> {
            Ok(Response::ok_with_body(format!("network {}", request.url)))
        }
    }

    async fn installed_router() -> Router {
        let location = WorkerLocation::parse("https://example.com/sw.js").unwrap();
        let store = CacheStore::new(Arc::new(MemoryCacheStorage::new()), location.clone());
        let controller = Arc::new(PrecacheController::new(
            "precache",
            store,
            FetchPipeline::new(Arc::new(Echo)),
        ));
        controller
            .add_to_cache_list([
                PrecacheEntry::new("/docs/index.html").with_revision("3"),
                PrecacheEntry::new("/about.html").with_revision("1"),
            ])
            .unwrap();
        controller.install(&Plugins::new()).await.unwrap();

        let router = Router::new(location);
        router.add_route(Route::precache(&controller, PrecacheRouteOptions::default()));
        router
    }

    async fn fetch(router: &Router, url: &str) -> Option<String> {
        let request = Request::get(Url::parse(url).unwrap());
        let response = router.handle_request(request, None)?.await.unwrap();
        Some(response.text().unwrap())
    }

    #[tokio::test]
    async fn test_directory_index_and_tracking_params() {
        let router = installed_router().await;
        assert_eq!(
            fetch(&router, "https://example.com/docs/?utm_source=mail#intro")
                .await
                .as_deref(),
            Some("network https://example.com/docs/index.html")
        );
    }

    #[tokio::test]
    async fn test_clean_url() {
        let router = installed_router().await;
        assert_eq!(
            fetch(&router, "https://example.com/about").await.as_deref(),
            Some("network https://example.com/about.html")
        );
    }

    #[tokio::test]
    async fn test_unlisted_url_not_matched() {
        let router = installed_router().await;
        assert!(fetch(&router, "https://example.com/contact").await.is_none());
    }
}
