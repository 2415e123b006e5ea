//! The client facade.
//!
//! A [`Client`] owns a native transport session and the [`Registry`] of
//! in-flight requests. Requests are sent with a [`ResponseHandler`], which
//! receives exactly one [`Response`] per request, whatever happens to it:
//!
//! ```no_run
//! # use uplink::client::Client;
//! # use uplink::transport::hyper::HyperTransportConfig;
//! # #[tokio::main]
//! # async fn main() {
//! let client = Client::builder()
//!     .with_hyper(HyperTransportConfig::default())
//!     .build();
//!
//! let request = client
//!     .create_request()
//!     .with_method("POST")
//!     .with_url("http://collector.example/ingest")
//!     .with_body(r#"{"events":[]}"#);
//!
//! let response = client.send_async(request).await.unwrap();
//! println!("{}: {}", response.id(), response.outcome());
//! # }
//! ```
//!
//! Requests can be cancelled individually, or all at once. Dropping the last
//! handle to a client shuts it down, cancelling everything still in flight and
//! blocking until those requests have finished.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{debug, warn};

use self::operation::Operation;
use crate::request::{Request, RequestId};
use crate::response::Response;
use crate::transport::Transport;

mod builder;
mod error;
mod future;
mod handler;
mod operation;
pub mod registry;

pub use self::builder::{Builder, Config};
pub use self::error::Error;
pub use self::future::ResponseFuture;
pub use self::handler::{LifecycleEvent, ResponseHandler};
pub use self::registry::Registry;

use self::handler::Responder;

struct ClientInner<T: Transport> {
    transport: Arc<T>,
    registry: Registry,
    next_id: AtomicU64,
    closed: AtomicBool,
    config: Config,
}

impl<T: Transport> ClientInner<T> {
    fn drain(&self) {
        let registry = &self.registry;
        let poll = self.config.poll_interval;

        match self.config.shutdown_timeout {
            None => registry.await_empty(poll),
            Some(timeout) => {
                if !registry.await_empty_timeout(poll, timeout) {
                    warn!(
                        in_flight = registry.len(),
                        ?timeout,
                        "requests did not finish after cancellation, abandoning"
                    );
                    registry.abandon_all();
                }
            }
        }
    }

    fn cancel_all(&self) {
        debug!(in_flight = self.registry.len(), "cancelling all requests");
        self.registry.cancel_all();
        self.drain();
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(in_flight = self.registry.len(), "shutting down");
        self.cancel_all();
    }
}

impl<T: Transport> Drop for ClientInner<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An asynchronous HTTP client for delivering payloads over a native transport.
///
/// Cloning a client is cheap, and clones share the transport session and
/// in-flight requests.
pub struct Client<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("in_flight", &self.inner.registry.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Client<crate::transport::hyper::HyperTransport> {
    /// Create a new, empty builder for clients.
    pub fn builder() -> Builder<()> {
        Builder::new()
    }
}

impl<T: Transport> Client<T> {
    /// Create a client over `transport` with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::from_parts(Arc::new(transport), Config::default())
    }

    pub(crate) fn from_parts(transport: Arc<T>, config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                registry: Registry::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The native transport session.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The registry of in-flight requests, which can be inspected and waited
    /// on but not modified.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Number of requests in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Create a request with a fresh identifier, unique for this client.
    pub fn create_request(&self) -> Request {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        Request::new(format!("{}-{}", self.inner.config.id_prefix, n))
    }

    /// Send a request. `handler` receives exactly one response, possibly
    /// before this method returns.
    ///
    /// Requests which cannot be started (the session is not open, the client
    /// has shut down, or the identifier is already in flight) are answered
    /// with [`Outcome::Aborted`](crate::Outcome::Aborted) without any native
    /// call. A duplicate identifier is also reported as an error.
    pub fn send<H>(&self, request: impl Into<Arc<Request>>, handler: H) -> Result<(), Error>
    where
        H: ResponseHandler,
    {
        self.send_boxed(request.into(), Box::new(handler))
    }

    #[cfg_attr(
        not(tarpaulin),
        tracing::instrument(name = "send", skip_all, fields(id = %request.id()))
    )]
    fn send_boxed(
        &self,
        request: Arc<Request>,
        handler: Box<dyn ResponseHandler>,
    ) -> Result<(), Error> {
        let inner = &self.inner;
        let id = request.id().clone();
        let operation = Arc::new(Operation::new(
            request,
            inner.transport.clone(),
            inner.registry.downgrade(),
            handler,
        ));

        if !inner.transport.is_open() {
            warn!("transport session is not open, rejecting request");
            operation.reject();
            return Ok(());
        }

        if inner.closed.load(Ordering::SeqCst) {
            warn!("client has shut down, rejecting request");
            operation.reject();
            return Ok(());
        }

        match inner.registry.register(id, operation.clone()) {
            Ok(key) => {
                operation.start(key);
                Ok(())
            }
            Err(error) => {
                operation.reject();
                Err(error)
            }
        }
    }

    /// Send a request, returning a future of its response.
    pub fn send_async(&self, request: impl Into<Arc<Request>>) -> ResponseFuture {
        let (responder, rx) = Responder::channel();
        // A duplicate identifier is answered through the responder.
        let _ = self.send_boxed(request.into(), Box::new(responder));
        ResponseFuture::new(rx)
    }

    /// Cancel the request with identifier `id`. Returns `false` if no such
    /// request is in flight.
    ///
    /// Cancellation is cooperative: the request's handler may run later, on
    /// another thread. A request whose transport has already finished reports
    /// its real outcome.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.inner.registry.cancel_one(id)
    }

    /// Cancel every request in flight and block until they have all finished.
    ///
    /// When called from a [`ResponseHandler`], the request that handler
    /// belongs to is not waited for.
    ///
    /// Requests still in flight after
    /// [`shutdown_timeout`](Config::shutdown_timeout) are abandoned, which
    /// answers them with [`Outcome::Aborted`](crate::Outcome::Aborted).
    #[cfg_attr(not(tarpaulin), tracing::instrument(skip_all))]
    pub fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    /// Shut the client down: later requests are rejected, and every request
    /// in flight is cancelled as by [`Client::cancel_all`].
    ///
    /// Also runs when the last handle to the client is dropped.
    #[cfg_attr(not(tarpaulin), tracing::instrument(skip_all))]
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl<T: Transport> tower::Service<Arc<Request>> for Client<T> {
    type Response = Response;
    type Error = Error;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Arc<Request>) -> Self::Future {
        self.send_async(request)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::transport::hyper::HyperTransport;
    use crate::transport::mock::{Delivery, MockTransport};
    use crate::transport::Closed;
    use crate::Outcome;

    assert_impl_all!(Client<HyperTransport>: Send, Sync, Clone);
    assert_impl_all!(Client<MockTransport>: tower::Service<Arc<Request>>);

    #[test]
    fn identifiers_are_per_client() {
        let first = Client::new(MockTransport::new());
        let second = Client::new(MockTransport::new());

        assert_eq!(first.create_request().id().as_str(), "WI-1");
        assert_eq!(first.create_request().id().as_str(), "WI-2");
        assert_eq!(second.create_request().id().as_str(), "WI-1");
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let _ = tracing_subscriber::fmt::try_init();

        let transport = MockTransport::new()
            .with_delivery(Delivery::Manual)
            .with_close(Closed::Silent);
        let client = Client::new(transport);
        let request = Arc::new(client.create_request().with_url("http://collector.test/"));

        let (tx, rx) = mpsc::channel();
        let first = tx.clone();
        client
            .send(request.clone(), move |response: Response| {
                first.send(response.outcome()).unwrap();
            })
            .unwrap();

        let error = client
            .send(request.clone(), move |response: Response| {
                tx.send(response.outcome()).unwrap();
            })
            .unwrap_err();
        assert!(matches!(error, Error::DuplicateRequest(id) if id == *request.id()));
        assert_eq!(rx.try_recv().unwrap(), Outcome::Aborted);
        assert_eq!(client.in_flight(), 1);

        assert!(client.cancel(request.id()));
        assert_eq!(rx.try_recv().unwrap(), Outcome::Aborted);
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn shut_down_client_rejects_requests() {
        let transport = MockTransport::new();
        let client = Client::new(transport.clone());
        client.shutdown();

        let (tx, rx) = mpsc::channel();
        let request = client.create_request().with_url("http://collector.test/");
        client
            .send(request, move |response: Response| {
                tx.send(response.outcome()).unwrap();
            })
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Outcome::Aborted);
        assert_eq!(transport.calls().parse_url, 0);
    }
}
