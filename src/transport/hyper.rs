//! An HTTP/1.1 transport over tokio TCP, using hyper's client connection API.
//!
//! Each request runs as its own task on a tokio runtime: the host is resolved
//! and connected, the request is written, and the response headers, each body
//! frame and the completion are delivered through the request's
//! [`EventSink`]. Closing a request aborts its task and the task driving its
//! connection, after which nothing more is delivered and the socket is
//! closed.
//!
//! TLS is not supported; `https` targets fail to connect.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, HOST, USER_AGENT};
use http::HeaderMap;
use http_body_util::{BodyExt as _, Full};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::{Closed, EventSink, NativeError, NativeRequest, Target, Transport, TransportEvent};
use crate::bridge::io::HyperIo;
use crate::headers::Headers;

/// Configuration for a [`HyperTransport`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct HyperTransportConfig {
    /// The timeout for resolving and connecting to a remote address.
    pub connect_timeout: Option<Duration>,

    /// The timeout for the whole exchange, from connecting until the last body frame.
    pub request_timeout: Option<Duration>,

    /// The `User-Agent` sent with requests which do not set one.
    pub user_agent: Option<String>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for HyperTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            request_timeout: Some(Duration::from_secs(30)),
            user_agent: Some(concat!("uplink/", env!("CARGO_PKG_VERSION")).into()),
            nodelay: true,
        }
    }
}

/// A native transport session backed by hyper and a tokio runtime.
#[derive(Clone)]
pub struct HyperTransport {
    config: Arc<HyperTransportConfig>,
    handle: Option<Handle>,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl HyperTransport {
    /// Create a session on the current tokio runtime.
    ///
    /// Outside of a tokio runtime the session does not open, and every request
    /// sent on it is aborted.
    pub fn new(config: HyperTransportConfig) -> Self {
        let handle = Handle::try_current().ok();
        if handle.is_none() {
            tracing::warn!("no tokio runtime available, hyper transport session is closed");
        }
        Self {
            config: Arc::new(config),
            handle,
        }
    }

    /// Create a session whose requests run on `handle`.
    pub fn with_handle(config: HyperTransportConfig, handle: Handle) -> Self {
        Self {
            config: Arc::new(config),
            handle: Some(handle),
        }
    }

    /// The transport configuration.
    pub fn config(&self) -> &HyperTransportConfig {
        &self.config
    }
}

/// A connection target validated by a [`HyperTransport`].
#[derive(Debug, Clone)]
pub struct HyperConnection {
    authority: String,
    host: HeaderValue,
}

impl Transport for HyperTransport {
    type Connection = HyperConnection;
    type Request = HyperRequest;

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn connect(&self, target: &Target) -> Result<HyperConnection, NativeError> {
        if target.scheme != "http" {
            debug!(scheme = %target.scheme, "unsupported scheme");
            return Err(NativeError::CannotConnect);
        }

        let host = if target.port == 80 {
            target.host.clone()
        } else {
            target.authority()
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|_| NativeError::InvalidUrl(target.host.clone()))?;

        Ok(HyperConnection {
            authority: target.authority(),
            host,
        })
    }

    fn open_request(
        &self,
        connection: &HyperConnection,
        method: &str,
        target: &Target,
        sink: EventSink,
    ) -> Result<HyperRequest, NativeError> {
        let handle = self.handle.clone().ok_or(NativeError::Cancelled)?;
        let method = http::Method::from_bytes(method.as_bytes())
            .map_err(|_| NativeError::InvalidMethod(method.to_owned()))?;
        let uri: http::Uri = target
            .path_and_query
            .parse()
            .map_err(|_| NativeError::InvalidUrl(target.path_and_query.clone()))?;

        let mut headers = HeaderMap::new();
        headers.insert(HOST, connection.host.clone());
        if let Some(user_agent) = &self.config.user_agent {
            let user_agent = HeaderValue::from_str(user_agent)
                .map_err(|_| NativeError::InvalidHeader(USER_AGENT.to_string()))?;
            headers.insert(USER_AGENT, user_agent);
        }

        Ok(HyperRequest {
            method,
            uri,
            headers,
            authority: connection.authority.clone(),
            config: self.config.clone(),
            handle,
            sink,
            tasks: Arc::default(),
        })
    }
}

/// A request handle of a [`HyperTransport`].
pub struct HyperRequest {
    method: http::Method,
    uri: http::Uri,
    headers: HeaderMap,
    authority: String,
    config: Arc<HyperTransportConfig>,
    handle: Handle,
    sink: EventSink,
    tasks: Arc<Mutex<Tasks>>,
}

/// The tasks spawned for one exchange, aborted together.
#[derive(Debug, Default)]
struct Tasks {
    aborted: bool,
    handles: Vec<AbortHandle>,
}

impl Tasks {
    /// Track a spawned task. Tasks spawned after the exchange was aborted are
    /// aborted at once.
    fn track(&mut self, handle: AbortHandle) {
        if self.aborted {
            handle.abort();
        } else {
            self.handles.push(handle);
        }
    }

    /// Abort every tracked task. Returns `false` if there was nothing to abort.
    fn abort(&mut self) -> bool {
        self.aborted = true;
        let any = !self.handles.is_empty();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        any
    }
}

impl fmt::Debug for HyperRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperRequest")
            .field("id", self.sink.id())
            .field("method", &self.method)
            .field("authority", &self.authority)
            .field("uri", &self.uri)
            .finish()
    }
}

impl NativeRequest for HyperRequest {
    fn add_headers(&mut self, headers: &Headers) -> Result<(), NativeError> {
        let headers = headers.to_header_map()?;
        // Request headers replace transport defaults.
        for name in headers.keys() {
            self.headers.remove(name);
        }
        self.headers.extend(headers);
        Ok(())
    }

    fn send(&mut self, body: Bytes) -> Result<(), NativeError> {
        let mut request = http::Request::new(Full::new(body));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();

        let exchange = Exchange {
            authority: self.authority.clone(),
            config: self.config.clone(),
            sink: self.sink.clone(),
            tasks: self.tasks.clone(),
        };
        let task = self.handle.spawn(exchange.run(request));
        self.tasks.lock().track(task.abort_handle());
        Ok(())
    }

    fn close(&mut self) -> Closed {
        if self.tasks.lock().abort() {
            trace!(id = %self.sink.id(), "aborted exchange");
        }
        Closed::Silent
    }
}

impl Drop for HyperRequest {
    fn drop(&mut self) {
        self.tasks.lock().abort();
    }
}

/// One request/response exchange, run as a task.
struct Exchange {
    authority: String,
    config: Arc<HyperTransportConfig>,
    sink: EventSink,
    tasks: Arc<Mutex<Tasks>>,
}

impl Exchange {
    async fn run(self, request: http::Request<Full<Bytes>>) {
        let result = match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(request))
                .await
                .unwrap_or(Err(NativeError::Timeout)),
            None => self.exchange(request).await,
        };

        match result {
            Ok(()) => self.sink.deliver(TransportEvent::Complete),
            Err(error) => self.sink.deliver(TransportEvent::Failed(error)),
        };
    }

    async fn exchange(&self, request: http::Request<Full<Bytes>>) -> Result<(), NativeError> {
        let stream = match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.connect())
                .await
                .map_err(|_| NativeError::Timeout)??,
            None => self.connect().await?,
        };

        let (mut sender, connection) = hyper::client::conn::http1::handshake(HyperIo::new(stream))
            .await
            .map_err(hyper_error)?;
        let id = self.sink.id().clone();
        let connection = tokio::spawn(async move {
            if let Err(error) = connection.await {
                trace!(%id, %error, "connection closed with error");
            }
        });
        self.tasks.lock().track(connection.abort_handle());

        let response = sender.send_request(request).await.map_err(hyper_error)?;
        let (parts, mut body) = response.into_parts();
        self.sink.deliver(TransportEvent::Headers {
            status: Some(parts.status.as_u16()),
            headers: Headers::from(&parts.headers),
        });

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(hyper_error)?;
            if let Ok(data) = frame.into_data() {
                self.sink.deliver(TransportEvent::Data(data));
            }
        }

        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream, NativeError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(self.authority.as_str())
            .await
            .map_err(|error| {
                debug!(authority = %self.authority, %error, "unable to resolve host");
                NativeError::NameNotResolved
            })?
            .collect();

        if addrs.is_empty() {
            return Err(NativeError::NameNotResolved);
        }

        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(error) = stream.set_nodelay(self.config.nodelay) {
                        trace!(%addr, %error, "unable to set nodelay");
                    }
                    return Ok(stream);
                }
                Err(error) => {
                    trace!(%addr, %error, "connect attempt failed");
                }
            }
        }

        Err(NativeError::CannotConnect)
    }
}

fn hyper_error(error: hyper::Error) -> NativeError {
    if error.is_timeout() {
        NativeError::Timeout
    } else if error.is_canceled() {
        NativeError::Cancelled
    } else {
        NativeError::other(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(HyperTransport: Transport, Send, Sync);
    assert_impl_all!(HyperRequest: NativeRequest);

    #[tokio::test]
    async fn tasks_spawned_after_abort_are_aborted() {
        let mut tasks = Tasks::default();
        let first = tokio::spawn(std::future::pending::<()>());
        tasks.track(first.abort_handle());
        assert!(tasks.abort());
        assert!(first.await.unwrap_err().is_cancelled());

        let late = tokio::spawn(std::future::pending::<()>());
        tasks.track(late.abort_handle());
        assert!(late.await.unwrap_err().is_cancelled());
        assert!(!tasks.abort());
    }

    #[test]
    fn closed_without_runtime() {
        let transport = HyperTransport::new(HyperTransportConfig::default());
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn https_is_not_supported() {
        let transport = HyperTransport::new(HyperTransportConfig::default());
        assert!(transport.is_open());

        let target = Target::parse("https://collector.test/").unwrap();
        assert!(matches!(
            transport.connect(&target),
            Err(NativeError::CannotConnect)
        ));
    }

    #[tokio::test]
    async fn host_header_omits_default_port() {
        let transport = HyperTransport::new(HyperTransportConfig::default());

        let target = Target::parse("http://collector.test/ingest").unwrap();
        let connection = transport.connect(&target).unwrap();
        assert_eq!(connection.host, "collector.test");
        assert_eq!(connection.authority, "collector.test:80");

        let target = Target::parse("http://127.0.0.1:8080/").unwrap();
        let connection = transport.connect(&target).unwrap();
        assert_eq!(connection.host, "127.0.0.1:8080");
    }
}
