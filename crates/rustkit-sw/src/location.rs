//! The worker's own location, used as the base for relative URLs.

use url::{Origin, Url};

use crate::error::{Result, ServiceWorkerError};
use rustkit_net::Request;

/// Location of the running worker script (`self.location`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLocation {
    href: Url,
}

impl WorkerLocation {
    /// Create a location from the worker script URL.
    pub fn new(href: Url) -> Self {
        Self { href }
    }

    /// Parse a location from a string.
    pub fn parse(href: &str) -> Result<Self> {
        Url::parse(href)
            .map(Self::new)
            .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{href}: {e}")))
    }

    /// The full location URL.
    pub fn href(&self) -> &Url {
        &self.href
    }

    /// The location's origin.
    pub fn origin(&self) -> Origin {
        self.href.origin()
    }

    /// Resolve a possibly relative URL against this location.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.href
            .join(url)
            .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{url}: {e}")))
    }

    /// Whether `url` shares this location's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin()
    }

    /// Strip this location's origin from `url` for readable log output.
    pub fn friendly_url(&self, url: &Url) -> String {
        if self.is_same_origin(url) {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            path
        } else {
            url.to_string()
        }
    }
}

/// Something that can be turned into a request: a URL string or a request.
#[derive(Debug, Clone)]
pub enum RequestInfo {
    Url(String),
    Request(Request),
}

impl RequestInfo {
    /// The URL string, unresolved.
    pub fn url_str(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Request(request) => request.url.as_str(),
        }
    }

    /// Coerce into a request, resolving relative URLs against `location`.
    pub fn into_request(self, location: &WorkerLocation) -> Result<Request> {
        match self {
            Self::Url(url) => Ok(Request::get(location.resolve(&url)?)),
            Self::Request(request) => Ok(request),
        }
    }
}

impl From<&str> for RequestInfo {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for RequestInfo {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Request> for RequestInfo {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<&Request> for RequestInfo {
    fn from(request: &Request) -> Self {
        Self::Request(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> WorkerLocation {
        WorkerLocation::parse("https://example.com/app/sw.js").unwrap()
    }

    #[test]
    fn test_resolve_relative() {
        let loc = location();
        assert_eq!(
            loc.resolve("index.html").unwrap().as_str(),
            "https://example.com/app/index.html"
        );
        assert_eq!(
            loc.resolve("/root.css").unwrap().as_str(),
            "https://example.com/root.css"
        );
    }

    #[test]
    fn test_friendly_url() {
        let loc = location();
        let same = Url::parse("https://example.com/a.js?v=1").unwrap();
        let other = Url::parse("https://cdn.example.net/b.js").unwrap();
        assert_eq!(loc.friendly_url(&same), "/a.js?v=1");
        assert_eq!(loc.friendly_url(&other), "https://cdn.example.net/b.js");
    }

    #[test]
    fn test_request_info_coercion() {
        let loc = location();
        let request = RequestInfo::from("/logo.png").into_request(&loc).unwrap();
        assert_eq!(request.url.as_str(), "https://example.com/logo.png");
        assert_eq!(request.method, rustkit_net::http::Method::GET);
    }
}
