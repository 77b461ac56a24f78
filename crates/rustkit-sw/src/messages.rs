//! Messages posted to the worker by its clients.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::future;
use rustkit_net::http::{HeaderName, HeaderValue, Method};
use rustkit_net::{CacheMode, CredentialsMode, Request, RequestMode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::event::ExtendableMessageEvent;
use crate::routing::Router;

/// Messages understood by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WorkerMessage {
    /// Route each URL so runtime caching handlers can store it.
    #[serde(rename = "CACHE_URLS")]
    CacheUrls(CacheUrlsPayload),
}

impl WorkerMessage {
    /// Parse message data; `None` for anything unrecognised.
    pub fn from_value(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUrlsPayload {
    pub urls_to_cache: Vec<UrlToCache>,
}

/// A URL string, or a `[url, init]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlToCache {
    Url(String),
    WithInit(String, RequestInit),
    Single((String,)),
}

impl UrlToCache {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::WithInit(url, _) | Self::Single((url,)) => url,
        }
    }

    fn into_request(self, router: &Router) -> Result<Request> {
        match self {
            Self::Url(url) | Self::Single((url,)) => {
                Ok(Request::get(router.location().resolve(&url)?))
            }
            Self::WithInit(url, init) => init.into_request(router.location().resolve(&url)?),
        }
    }
}

/// The subset of `RequestInit` honoured when building a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub mode: Option<String>,
    pub credentials: Option<String>,
    pub cache: Option<String>,
    pub integrity: Option<String>,
}

fn invalid(what: &str, value: &str) -> ServiceWorkerError {
    ServiceWorkerError::InvalidMessage(format!("invalid {what}: {value}"))
}

impl RequestInit {
    pub fn into_request(self, url: Url) -> Result<Request> {
        let mut request = Request::get(url);

        if let Some(method) = self.method {
            request.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| invalid("method", &method))?;
        }
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid("header", name))?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid("header value", value))?;
            request.headers.insert(name, value);
        }
        if let Some(body) = self.body {
            request.body = Some(Bytes::from(body));
        }
        if let Some(mode) = self.mode {
            request.mode = RequestMode::parse(&mode).ok_or_else(|| invalid("mode", &mode))?;
        }
        if let Some(credentials) = self.credentials {
            request.credentials = CredentialsMode::parse(&credentials)
                .ok_or_else(|| invalid("credentials", &credentials))?;
        }
        if let Some(cache) = self.cache {
            request.cache = CacheMode::parse(&cache).ok_or_else(|| invalid("cache", &cache))?;
        }
        request.integrity = self.integrity;
        Ok(request)
    }
}

impl Router {
    /// Handle a `message` event.
    ///
    /// Returns `Ok(false)` for messages this router does not understand.
    /// For `CACHE_URLS`, every URL is routed through
    /// [`Router::handle_request`]; once all of them resolve, `true` is posted
    /// on the event's reply port, if it has one.
    pub fn handle_message(&self, event: &ExtendableMessageEvent) -> Result<bool> {
        let Some(WorkerMessage::CacheUrls(payload)) = WorkerMessage::from_value(&event.data) else {
            return Ok(false);
        };

        debug!(count = payload.urls_to_cache.len(), "Caching URLs from message");

        let mut pending = Vec::with_capacity(payload.urls_to_cache.len());
        for entry in payload.urls_to_cache {
            let request = entry.into_request(self)?;
            if let Some(response) = self.handle_request(request, None) {
                pending.push(response);
            }
        }

        let port = event.take_port();
        event.wait_until(async move {
            let responses = future::try_join_all(pending).await?;
            info!(count = responses.len(), "CACHE_URLS requests resolved");
            if let Some(port) = port {
                // The client may have stopped listening.
                let _ = port.send(true);
            }
            Ok(())
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::WorkerLocation;
    use crate::routing::{handler_fn, Capture, RouteContext};
    use parking_lot::Mutex;
    use rustkit_net::Response;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_cache_urls() {
        let data = json!({
            "type": "CACHE_URLS",
            "payload": {
                "urlsToCache": [
                    "/a.css",
                    ["/b.js"],
                    ["/c.json", {"method": "GET", "headers": {"x-from": "page"}, "cache": "reload"}]
                ]
            }
        });
        let Some(WorkerMessage::CacheUrls(payload)) = WorkerMessage::from_value(&data) else {
            panic!("expected CACHE_URLS");
        };
        let urls: Vec<&str> = payload.urls_to_cache.iter().map(UrlToCache::url).collect();
        assert_eq!(urls, vec!["/a.css", "/b.js", "/c.json"]);
        assert!(matches!(
            &payload.urls_to_cache[2],
            UrlToCache::WithInit(_, init) if init.cache.as_deref() == Some("reload")
        ));
    }

    #[test]
    fn test_unknown_message_ignored() {
        assert!(WorkerMessage::from_value(&json!({"type": "SOMETHING_ELSE"})).is_none());
        assert!(WorkerMessage::from_value(&json!("CACHE_URLS")).is_none());
    }

    #[test]
    fn test_request_init_applied() {
        let init = RequestInit {
            method: Some("post".into()),
            headers: BTreeMap::from([("x-test".to_string(), "1".to_string())]),
            body: Some("payload".into()),
            mode: Some("no-cors".into()),
            cache: Some("no-store".into()),
            ..Default::default()
        };
        let request = init
            .into_request(Url::parse("https://example.com/form").unwrap())
            .unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers.get("x-test").unwrap(), "1");
        assert_eq!(request.mode, RequestMode::NoCors);
        assert_eq!(request.cache, CacheMode::NoStore);
        assert_eq!(request.body.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_bad_request_init_rejected() {
        let init = RequestInit {
            cache: Some("sometimes".into()),
            ..Default::default()
        };
        let err = init
            .into_request(Url::parse("https://example.com/").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-message");
    }

    #[tokio::test]
    async fn test_cache_urls_routes_each_url_then_acks() {
        let router = Router::new(WorkerLocation::parse("https://example.com/sw.js").unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        router
            .register_route(
                Capture::Pattern(r"\.(css|js)$".into()),
                Arc::new(handler_fn(move |ctx: RouteContext| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().push(ctx.url.path().to_string());
                        Ok(Response::ok_with_body("ok"))
                    }
                })),
                Method::GET,
            )
            .unwrap();

        let (event, ack) = ExtendableMessageEvent::with_port(json!({
            "type": "CACHE_URLS",
            "payload": {"urlsToCache": ["/a.css", ["/b.js"], "/unrouted.png"]}
        }));
        assert!(router.handle_message(&event).unwrap());
        event.settle().await.unwrap();

        assert!(ack.await.unwrap());
        let mut paths = seen.lock().clone();
        paths.sort();
        assert_eq!(paths, vec!["/a.css", "/b.js"]);
    }
}
