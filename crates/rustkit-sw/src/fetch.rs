//! Network fetches wrapped in plugin hooks.

use std::sync::Arc;

use rustkit_net::{Fetch, Request, Response};
use tracing::{debug, warn};

use crate::error::{Result, ServiceWorkerError};
use crate::event::FetchEvent;
use crate::plugin::{FetchFailure, Plugins};

/// Fetches through the `requestWillFetch` / `fetchDidSucceed` /
/// `fetchDidFail` hooks.
#[derive(Clone)]
pub struct FetchPipeline {
    fetcher: Arc<dyn Fetch>,
}

impl FetchPipeline {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    /// The underlying network fetcher, without hooks.
    pub fn fetcher(&self) -> &Arc<dyn Fetch> {
        &self.fetcher
    }

    /// Plain network fetch.
    pub async fn fetch_direct(&self, request: Request) -> Result<Response> {
        Ok(self.fetcher.fetch(request).await?)
    }

    /// Fetch `request`, running plugin hooks around the network call.
    ///
    /// A navigation preload response on `event` is returned as-is.
    pub async fn fetch(
        &self,
        request: Request,
        event: Option<&FetchEvent>,
        plugins: &Plugins,
    ) -> Result<Response> {
        if let Some(preloaded) = event.and_then(|e| e.preload_response.as_ref()) {
            debug!(url = %request.url, "Using navigation preload response");
            return Ok(preloaded.clone());
        }

        let original_request = request.duplicate();

        let request = plugins
            .request_will_fetch(request, event)
            .await
            .map_err(|e| ServiceWorkerError::PluginErrorRequestWillFetch {
                source: Box::new(e),
            })?;

        let outcome: Result<Response> = async {
            let response = self.fetcher.fetch(request.duplicate()).await?;
            plugins.fetch_did_succeed(&request, response, event).await
        }
        .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(error) => {
                warn!(url = %request.url, error = %error, "Network request failed");
                if plugins.has_fetch_failure_observers() {
                    plugins
                        .fetch_did_fail(&FetchFailure {
                            error: &error,
                            original_request: &original_request,
                            request: &request,
                            event,
                        })
                        .await;
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{FetchFailureObserver, Plugin, RequestMutator};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rustkit_net::http::{HeaderValue, StatusCode};
    use rustkit_net::NetError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    #[derive(Default)]
    struct ScriptedFetcher {
        calls: AtomicUsize,
        seen_headers: Mutex<Vec<Option<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn fetch(&self, request: Request) -> rustkit_net::Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_headers.lock().push(
                request
                    .headers
                    .get("x-mutated")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
            );
            if self.fail {
                Err(NetError::RequestFailed("offline".into()))
            } else {
                Ok(Response::ok_with_body("net"))
            }
        }
    }

    struct AddHeader;

    #[async_trait]
    impl RequestMutator for AddHeader {
        async fn request_will_fetch(
            &self,
            request: Request,
            _event: Option<&FetchEvent>,
        ) -> Result<Request> {
            Ok(request.header("x-mutated".parse().unwrap(), HeaderValue::from_static("yes")))
        }
    }

    impl Plugin for AddHeader {
        fn request_mutator(&self) -> Option<&dyn RequestMutator> {
            Some(self)
        }
    }

    struct Exploding;

    #[async_trait]
    impl RequestMutator for Exploding {
        async fn request_will_fetch(
            &self,
            _request: Request,
            _event: Option<&FetchEvent>,
        ) -> Result<Request> {
            Err(ServiceWorkerError::Plugin("nope".into()))
        }
    }

    impl Plugin for Exploding {
        fn request_mutator(&self) -> Option<&dyn RequestMutator> {
            Some(self)
        }
    }

    #[derive(Default)]
    struct FailureLog {
        failures: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl FetchFailureObserver for FailureLog {
        async fn fetch_did_fail(&self, failure: &FetchFailure<'_>) {
            self.failures.lock().push((
                failure.original_request.url.to_string(),
                failure.error.kind().to_string(),
            ));
        }
    }

    impl Plugin for FailureLog {
        fn fetch_failure_observer(&self) -> Option<&dyn FetchFailureObserver> {
            Some(self)
        }
    }

    fn req() -> Request {
        Request::get(Url::parse("https://example.com/data.json").unwrap())
    }

    #[tokio::test]
    async fn test_request_mutation_reaches_network() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let pipeline = FetchPipeline::new(fetcher.clone());
        let plugins = Plugins::new().with(Arc::new(AddHeader));

        let response = pipeline.fetch(req(), None, &plugins).await.unwrap();

        assert_eq!(response.text().unwrap(), "net");
        assert_eq!(fetcher.seen_headers.lock().clone(), vec![Some("yes".to_string())]);
    }

    #[tokio::test]
    async fn test_request_plugin_error_aborts_before_network() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let pipeline = FetchPipeline::new(fetcher.clone());
        let plugins = Plugins::new().with(Arc::new(Exploding));

        let err = pipeline.fetch(req(), None, &plugins).await.unwrap_err();

        assert_eq!(err.kind(), "plugin-error-request-will-fetch");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_observed_then_rethrown() {
        let fetcher = Arc::new(ScriptedFetcher {
            fail: true,
            ..Default::default()
        });
        let pipeline = FetchPipeline::new(fetcher);
        let log = Arc::new(FailureLog::default());
        let plugins = Plugins::new().with(log.clone());

        let err = pipeline.fetch(req(), None, &plugins).await.unwrap_err();

        assert_eq!(err.kind(), "network");
        assert_eq!(
            log.failures.lock().clone(),
            vec![(
                "https://example.com/data.json".to_string(),
                "network".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_preload_response_skips_network() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let pipeline = FetchPipeline::new(fetcher.clone());
        let event = FetchEvent::new(req())
            .with_preload_response(Response::new(StatusCode::ACCEPTED, "preloaded"));

        let response = pipeline
            .fetch(req(), Some(&event), &Plugins::new())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
