//! Worker events delivered by the host.

use std::future::Future;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use rustkit_net::{Request, Response};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::error::Result;

/// Lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    Install,
    Activate,
    Message,
}

/// An event whose lifetime can be extended with `wait_until`.
///
/// The host dispatches the event, then awaits [`ExtendableEvent::settle`]
/// before moving the worker to its next state.
pub struct ExtendableEvent {
    kind: LifecycleEventKind,
    pending: Mutex<Vec<BoxFuture<'static, Result<()>>>>,
}

impl ExtendableEvent {
    pub fn new(kind: LifecycleEventKind) -> Self {
        Self {
            kind,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn install() -> Self {
        Self::new(LifecycleEventKind::Install)
    }

    pub fn activate() -> Self {
        Self::new(LifecycleEventKind::Activate)
    }

    pub fn kind(&self) -> LifecycleEventKind {
        self.kind
    }

    /// Keep the worker alive until `task` completes.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.pending.lock().push(task.boxed());
    }

    /// Number of outstanding lifetime extensions.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Await every extension; the first failure is returned.
    pub async fn settle(&self) -> Result<()> {
        let tasks = std::mem::take(&mut *self.pending.lock());
        future::try_join_all(tasks).await.map(|_| ())
    }
}

impl std::fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Client ID.
    pub client_id: Option<String>,

    /// Navigation preload response, if the host issued one.
    pub preload_response: Option<Response>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
            preload_response: None,
        }
    }

    /// Attach a navigation preload response.
    pub fn with_preload_response(mut self, response: Response) -> Self {
        self.preload_response = Some(response);
        self
    }
}

/// A `message` event, optionally carrying a reply port.
pub struct ExtendableMessageEvent {
    /// The posted message.
    pub data: JsonValue,
    port: Mutex<Option<oneshot::Sender<bool>>>,
    lifetime: ExtendableEvent,
}

impl ExtendableMessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            port: Mutex::new(None),
            lifetime: ExtendableEvent::new(LifecycleEventKind::Message),
        }
    }

    /// Create an event with a reply port; the receiver gets the acknowledgement.
    pub fn with_port(data: JsonValue) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let event = Self::new(data);
        *event.port.lock() = Some(tx);
        (event, rx)
    }

    /// Take the reply port, if any.
    pub fn take_port(&self) -> Option<oneshot::Sender<bool>> {
        self.port.lock().take()
    }

    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.lifetime.wait_until(task);
    }

    pub async fn settle(&self) -> Result<()> {
        self.lifetime.settle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceWorkerError;

    #[tokio::test]
    async fn test_settle_runs_all_extensions() {
        let event = ExtendableEvent::install();
        let (tx, rx) = oneshot::channel();
        event.wait_until(async move {
            tx.send(1).ok();
            Ok(())
        });
        event.wait_until(async { Ok(()) });

        assert_eq!(event.pending_count(), 2);
        event.settle().await.unwrap();
        assert_eq!(rx.await.unwrap(), 1);
        assert_eq!(event.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_settle_surfaces_failure() {
        let event = ExtendableEvent::activate();
        event.wait_until(async { Err(ServiceWorkerError::StateError("boom".into())) });
        assert!(event.settle().await.is_err());
    }

    #[test]
    fn test_message_port_taken_once() {
        let (event, _rx) = ExtendableMessageEvent::with_port(JsonValue::Null);
        assert!(event.take_port().is_some());
        assert!(event.take_port().is_none());
    }
}
