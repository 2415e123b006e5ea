//! The seam between the request lifecycle and a native HTTP stack.
//!
//! A transport is split in two halves, mirroring how native stacks expose
//! themselves:
//!
//! - [`Transport`] is the session. It lives as long as the client, is shared
//!   read-only by every in-flight request, and creates connections and
//!   per-request handles.
//! - [`NativeRequest`] is the per-request handle. It accepts headers and a
//!   body, starts the exchange, and can be closed to cancel it.
//!
//! Native stacks report progress by calling [`EventSink::deliver`] with a
//! [`TransportEvent`], from whatever thread they like: inline from inside
//! [`NativeRequest::send`], from a thread pool, or from a completion port.
//! The request lifecycle serializes those events, so transports do not
//! need any synchronization of their own.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::client::registry::{OperationKey, WeakRegistry};
use crate::headers::Headers;
use crate::request::RequestId;
use crate::BoxError;

pub mod hyper;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;

/// Errors reported by native transports.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum NativeError {
    /// The operation was cancelled or its handle was closed.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The host name could not be resolved.
    #[error("name not resolved")]
    NameNotResolved,

    /// No connection could be established with the remote host.
    #[error("cannot connect")]
    CannotConnect,

    /// The URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The method is not a valid HTTP method.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// A header could not be attached to the request.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The native stack rejected the request as malformed before sending it.
    #[error("request rejected with status {status}")]
    Rejected {
        /// The client-error status reported by the native stack.
        status: u16,
    },

    /// Any other native failure.
    #[error("transport: {0}")]
    Other(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl NativeError {
    /// Wrap any other native failure.
    pub fn other(error: impl Into<BoxError>) -> Self {
        NativeError::Other(Arc::from(error.into()))
    }
}

impl From<crate::headers::InvalidHeader> for NativeError {
    fn from(error: crate::headers::InvalidHeader) -> Self {
        NativeError::InvalidHeader(error.0)
    }
}

/// The destination of a request, cracked from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// URL scheme, e.g. `https`.
    pub scheme: String,
    /// Host name or address literal.
    pub host: String,
    /// Port, defaulted from the scheme when the URL has none.
    pub port: u16,
    /// Path and query string, always starting with `/`.
    pub path_and_query: String,
}

impl Target {
    /// Crack an absolute URL.
    ///
    /// The port defaults to 80 for `http` and 443 for anything else.
    pub fn parse(url: &str) -> Result<Self, NativeError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|_| NativeError::InvalidUrl(url.to_owned()))?;

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| NativeError::InvalidUrl(url.to_owned()))?
            .to_ascii_lowercase();
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| NativeError::InvalidUrl(url.to_owned()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();

        let port = uri.port_u16().unwrap_or(match scheme.as_str() {
            "http" => 80,
            _ => 443,
        });

        let path = match uri.path() {
            "" => "/",
            path => path,
        };
        let path_and_query = match uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        };

        Ok(Target {
            scheme,
            host,
            port,
            path_and_query,
        })
    }

    /// `host:port` authority suitable for a `Host` header or a socket address lookup.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// What a native stack will do after [`NativeRequest::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// A final notification (usually [`NativeError::Cancelled`]) will still be delivered.
    Notifies,
    /// Nothing more will be delivered for this handle.
    Silent,
}

/// A native HTTP session.
pub trait Transport: Send + Sync + 'static {
    /// A connection to a host, created before any request handle.
    type Connection: Send + 'static;

    /// A per-request native handle.
    type Request: NativeRequest;

    /// Whether the session opened successfully. Requests sent on a session that
    /// is not open are rejected without any native call.
    fn is_open(&self) -> bool {
        true
    }

    /// Crack the request URL into a [`Target`].
    fn parse_url(&self, url: &str) -> Result<Target, NativeError> {
        Target::parse(url)
    }

    /// Create a connection handle for `target`.
    fn connect(&self, target: &Target) -> Result<Self::Connection, NativeError>;

    /// Open a request on `connection`. Progress for this request must be reported
    /// through `sink`.
    fn open_request(
        &self,
        connection: &Self::Connection,
        method: &str,
        target: &Target,
        sink: EventSink,
    ) -> Result<Self::Request, NativeError>;
}

/// A per-request native handle.
pub trait NativeRequest: Send + 'static {
    /// Attach request headers.
    fn add_headers(&mut self, headers: &Headers) -> Result<(), NativeError>;

    /// Start the exchange. Must not block on network I/O.
    fn send(&mut self, body: Bytes) -> Result<(), NativeError>;

    /// Close the handle, cancelling the exchange.
    fn close(&mut self) -> Closed;
}

/// A stage-transition notification from a native transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Response headers are available. The first of these moves the request on
    /// to receiving its body; later ones only add headers (e.g. content headers).
    Headers {
        /// Status code, if the native stack could provide one.
        status: Option<u16>,
        /// Parsed headers; see [`Headers::parse_raw`] for raw header blocks.
        headers: Headers,
    },

    /// A chunk of the response body, appended in arrival order.
    Data(Bytes),

    /// The whole response body, replacing anything buffered so far.
    Body(Bytes),

    /// All response data has been delivered.
    Complete,

    /// The exchange failed.
    Failed(NativeError),
}

/// Delivers [`TransportEvent`]s to the operation which owns a native request.
///
/// A sink addresses its operation by identifier through the client's registry,
/// never by reference: once the operation has finished and deregistered, late
/// deliveries are dropped.
#[derive(Clone)]
pub struct EventSink {
    key: OperationKey,
    registry: WeakRegistry,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("id", self.key.id()).finish()
    }
}

impl EventSink {
    pub(crate) fn new(key: OperationKey, registry: WeakRegistry) -> Self {
        Self { key, registry }
    }

    /// Identifier of the request this sink reports for.
    pub fn id(&self) -> &RequestId {
        self.key.id()
    }

    /// Deliver an event. Returns `false` if the operation is no longer registered.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.deliver(&self.key, event),
            None => {
                tracing::trace!(id = %self.key.id(), "client gone, dropping transport event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(NativeError: std::error::Error, Send, Sync);
    assert_impl_all!(EventSink: Send, Sync, Clone);
    assert_impl_all!(TransportEvent: Send, Sync, Clone);

    #[test]
    fn crack_url_defaults() {
        let target =
            Target::parse("https://mobile.events.data.microsoft.com/OneCollector/1.0/").unwrap();
        assert_eq!(target.scheme, "https");
        assert_eq!(target.host, "mobile.events.data.microsoft.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.path_and_query, "/OneCollector/1.0/");

        let target = Target::parse("http://localhost:8080/?x=1").unwrap();
        assert_eq!(target.port, 8080);
        assert_eq!(target.path_and_query, "/?x=1");

        let target = Target::parse("http://127.0.0.1").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.path_and_query, "/");
        assert_eq!(target.authority(), "127.0.0.1:80");
    }

    #[test]
    fn crack_url_failures() {
        assert!(matches!(
            Target::parse("not a url"),
            Err(NativeError::InvalidUrl(_))
        ));
        assert!(matches!(
            Target::parse("/relative/only"),
            Err(NativeError::InvalidUrl(_))
        ));
    }
}
