//! Routes that only apply to navigation requests.

use std::sync::Arc;

use regex::Regex;

use crate::routing::handler::Handler;
use crate::routing::route::{MatchContext, MatchResult, Route, RouteMatcher};

/// Allow and deny lists tested against `pathname + search`.
#[derive(Debug, Clone)]
pub struct NavigationRouteOptions {
    /// A navigation must match one of these. Empty matches nothing.
    pub allowlist: Vec<Regex>,
    /// Any match here rejects the request, even if allowlisted.
    pub denylist: Vec<Regex>,
}

impl Default for NavigationRouteOptions {
    /// Allow every navigation (`.`), deny none.
    fn default() -> Self {
        Self {
            allowlist: Regex::new(".").into_iter().collect(),
            denylist: Vec::new(),
        }
    }
}

/// Matcher accepting navigations allowed by [`NavigationRouteOptions`].
#[derive(Debug, Clone, Default)]
pub struct NavigationMatcher {
    options: NavigationRouteOptions,
}

impl NavigationMatcher {
    pub fn new(options: NavigationRouteOptions) -> Self {
        Self { options }
    }
}

impl RouteMatcher for NavigationMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        if !ctx.request.is_navigation() {
            return MatchResult::NoMatch;
        }

        let mut path_and_search = ctx.url.path().to_string();
        if let Some(query) = ctx.url.query() {
            path_and_search.push('?');
            path_and_search.push_str(query);
        }

        if let Some(deny) = self
            .options
            .denylist
            .iter()
            .find(|re| re.is_match(&path_and_search))
        {
            tracing::trace!(path = %path_and_search, pattern = %deny, "Navigation denied");
            return MatchResult::NoMatch;
        }

        self.options
            .allowlist
            .iter()
            .any(|re| re.is_match(&path_and_search))
            .into()
    }
}

impl Route {
    /// A GET route for navigations, typically bound to an app shell handler.
    pub fn navigation(handler: Arc<dyn Handler>, options: NavigationRouteOptions) -> Self {
        Route::new(NavigationMatcher::new(options), handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustkit_net::Request;
    use url::Url;

    fn check(matcher: &NavigationMatcher, request: Request) -> bool {
        let url = request.url.clone();
        matcher
            .matches(&MatchContext {
                url: &url,
                request: &request,
                event: None,
                same_origin: true,
            })
            .is_match()
    }

    fn nav(url: &str) -> Request {
        Request::navigate(Url::parse(url).unwrap())
    }

    #[test]
    fn test_only_navigations_match() {
        let matcher = NavigationMatcher::default();
        assert!(check(&matcher, nav("https://example.com/page")));
        assert!(!check(
            &matcher,
            Request::get(Url::parse("https://example.com/page").unwrap())
        ));
    }

    #[test]
    fn test_default_allows_all_but_empty_allowlist_allows_none() {
        assert_eq!(NavigationRouteOptions::default().allowlist.len(), 1);
        let open = NavigationMatcher::new(NavigationRouteOptions::default());
        assert!(check(&open, nav("https://example.com/")));
        assert!(check(&open, nav("https://example.com/deep/link?q=1")));

        let closed = NavigationMatcher::new(NavigationRouteOptions {
            allowlist: Vec::new(),
            denylist: Vec::new(),
        });
        assert!(!check(&closed, nav("https://example.com/")));
        assert!(!check(&closed, nav("https://example.com/deep/link")));
    }

    #[test]
    fn test_denylist_overrides_allowlist() {
        let matcher = NavigationMatcher::new(NavigationRouteOptions {
            allowlist: vec![Regex::new("^/app").unwrap()],
            denylist: vec![Regex::new(r"/admin").unwrap(), Regex::new(r"\?raw").unwrap()],
        });
        assert!(check(&matcher, nav("https://example.com/app/home")));
        assert!(!check(&matcher, nav("https://example.com/app/admin")));
        assert!(!check(&matcher, nav("https://example.com/app/home?raw=1")));
        assert!(!check(&matcher, nav("https://example.com/other")));
    }
}
