//! Routes: a matcher, a handler and an HTTP method.

use std::sync::Arc;

use hashbrown::HashMap;
use regex::Regex;
use rustkit_net::http::Method;
use rustkit_net::Request;
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::event::FetchEvent;
use crate::location::WorkerLocation;
use crate::routing::handler::Handler;

/// Values captured by a matcher.
pub type Params = HashMap<String, String>;

/// Outcome of testing a request against a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// Matched; the map may be empty.
    Matched(Params),
}

impl MatchResult {
    pub fn matched() -> Self {
        Self::Matched(Params::new())
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

impl From<bool> for MatchResult {
    fn from(matched: bool) -> Self {
        if matched {
            Self::matched()
        } else {
            Self::NoMatch
        }
    }
}

impl From<Option<Params>> for MatchResult {
    fn from(params: Option<Params>) -> Self {
        params.map_or(Self::NoMatch, Self::Matched)
    }
}

/// What a matcher gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub url: &'a Url,
    pub request: &'a Request,
    pub event: Option<&'a FetchEvent>,
    /// Whether `url` shares the worker's origin.
    pub same_origin: bool,
}

/// Decides whether a route applies to a request.
pub trait RouteMatcher: Send + Sync {
    fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult;
}

impl<F> RouteMatcher for F
where
    F: Fn(&MatchContext<'_>) -> MatchResult + Send + Sync,
{
    fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        self(ctx)
    }
}

/// Matches exactly one absolute URL.
#[derive(Debug, Clone)]
pub struct ExactUrlMatcher {
    url: Url,
}

impl ExactUrlMatcher {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl RouteMatcher for ExactUrlMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        (ctx.url.as_str() == self.url.as_str()).into()
    }
}

/// Matches a regular expression against the full URL.
///
/// Cross-origin URLs only match when the expression matches from the first
/// character, so a pattern like `/styles/.*` cannot match a third-party URL
/// that merely contains that path.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }
}

impl RouteMatcher for RegexMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        let Some(captures) = self.regex.captures(ctx.url.as_str()) else {
            return MatchResult::NoMatch;
        };
        let whole = captures.get(0).map_or(0, |m| m.start());
        if !ctx.same_origin && whole != 0 {
            tracing::trace!(url = %ctx.url, "Cross-origin match not at start of URL; ignoring");
            return MatchResult::NoMatch;
        }

        // Named groups are keyed by name, the rest by group index.
        let mut params = Params::new();
        for (index, name) in self.regex.capture_names().enumerate().skip(1) {
            if let Some(value) = captures.get(index) {
                let key = name.map_or_else(|| index.to_string(), str::to_string);
                params.insert(key, value.as_str().to_string());
            }
        }
        MatchResult::Matched(params)
    }
}

/// The ways a route's matcher can be described at registration.
pub enum Capture {
    /// An exact URL, resolved against the worker location.
    Url(String),
    /// A regular expression source string.
    Pattern(String),
    Regex(Regex),
    Matcher(Arc<dyn RouteMatcher>),
    /// A fully built route; its own method wins.
    Route(Route),
}

impl Capture {
    pub fn matcher<M: RouteMatcher + 'static>(matcher: M) -> Self {
        Self::Matcher(Arc::new(matcher))
    }

    /// Build the route this capture describes.
    pub(crate) fn into_route(
        self,
        location: &WorkerLocation,
        handler: Arc<dyn Handler>,
        method: Method,
    ) -> Result<Route> {
        let matcher: Arc<dyn RouteMatcher> = match self {
            Self::Url(url) => {
                let url = location
                    .resolve(&url)
                    .map_err(|e| ServiceWorkerError::UnsupportedRouteType(e.to_string()))?;
                Arc::new(ExactUrlMatcher::new(url))
            }
            Self::Pattern(source) => {
                let regex = Regex::new(&source)
                    .map_err(|e| ServiceWorkerError::UnsupportedRouteType(e.to_string()))?;
                Arc::new(RegexMatcher::new(regex))
            }
            Self::Regex(regex) => Arc::new(RegexMatcher::new(regex)),
            Self::Matcher(matcher) => matcher,
            Self::Route(route) => return Ok(route),
        };
        Ok(Route {
            matcher,
            handler,
            method,
            catch_handler: None,
        })
    }
}

impl From<&str> for Capture {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for Capture {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Regex> for Capture {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

impl From<Arc<dyn RouteMatcher>> for Capture {
    fn from(matcher: Arc<dyn RouteMatcher>) -> Self {
        Self::Matcher(matcher)
    }
}

impl From<Route> for Capture {
    fn from(route: Route) -> Self {
        Self::Route(route)
    }
}

/// A registered route. Immutable once added to a router.
#[derive(Clone)]
pub struct Route {
    matcher: Arc<dyn RouteMatcher>,
    handler: Arc<dyn Handler>,
    method: Method,
    catch_handler: Option<Arc<dyn Handler>>,
}

impl Route {
    /// A GET route.
    pub fn new<M: RouteMatcher + 'static>(matcher: M, handler: Arc<dyn Handler>) -> Self {
        Self {
            matcher: Arc::new(matcher),
            handler,
            method: Method::GET,
            catch_handler: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Handler used when this route's handler fails.
    pub fn with_catch_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.catch_handler = Some(handler);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn catch_handler(&self) -> Option<&Arc<dyn Handler>> {
        self.catch_handler.as_ref()
    }

    pub fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        self.matcher.matches(ctx)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("has_catch_handler", &self.catch_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(matcher: &dyn RouteMatcher, url: &str, same_origin: bool) -> MatchResult {
        let url = Url::parse(url).unwrap();
        let request = Request::get(url.clone());
        matcher.matches(&MatchContext {
            url: &url,
            request: &request,
            event: None,
            same_origin,
        })
    }

    #[test]
    fn test_exact_url() {
        let matcher = ExactUrlMatcher::new(Url::parse("https://example.com/a").unwrap());
        assert_eq!(check(&matcher, "https://example.com/a", true), MatchResult::matched());
        assert_eq!(check(&matcher, "https://example.com/a?x", true), MatchResult::NoMatch);
    }

    #[test]
    fn test_regex_captures() {
        let matcher = RegexMatcher::new(Regex::new(r"/api/(?P<version>v\d)/(\w+)").unwrap());
        let MatchResult::Matched(params) = check(&matcher, "https://example.com/api/v2/users", true)
        else {
            panic!("expected a match");
        };
        assert_eq!(params.get("version").map(String::as_str), Some("v2"));
        assert_eq!(params.get("2").map(String::as_str), Some("users"));
    }

    #[test]
    fn test_regex_without_groups_matches_with_empty_params() {
        let matcher = RegexMatcher::new(Regex::new(r"\.css$").unwrap());
        assert_eq!(
            check(&matcher, "https://example.com/site.css", true),
            MatchResult::matched()
        );
    }

    #[test]
    fn test_cross_origin_regex_must_match_from_start() {
        let matcher = RegexMatcher::new(Regex::new(r"/styles/.*\.css").unwrap());
        assert!(check(&matcher, "https://cdn.example.net/styles/a.css", true).is_match());
        assert!(!check(&matcher, "https://cdn.example.net/styles/a.css", false).is_match());

        let anchored = RegexMatcher::new(Regex::new(r"https://cdn\.example\.net/.*").unwrap());
        assert!(check(&anchored, "https://cdn.example.net/styles/a.css", false).is_match());
    }

    #[test]
    fn test_invalid_pattern_is_unsupported() {
        let location = WorkerLocation::parse("https://example.com/sw.js").unwrap();
        let handler: Arc<dyn Handler> = Arc::new(crate::routing::handler::handler_fn(
            |_ctx| async { Ok(rustkit_net::Response::ok_with_body("")) },
        ));
        let err = Capture::Pattern("(".into())
            .into_route(&location, handler, Method::GET)
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported-route-type");
    }
}
