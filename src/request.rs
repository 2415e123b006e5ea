//! Outgoing request descriptions.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::headers::Headers;

/// Identifier of a request, unique within the [`Client`](crate::Client) that created it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Wrap an identifier string.
    pub fn new(id: impl AsRef<str>) -> Self {
        RequestId(Arc::from(id.as_ref()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::new(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId(Arc::from(id))
    }
}

/// An outgoing HTTP request.
///
/// Requests are created by [`Client::create_request`](crate::Client::create_request),
/// populated by the caller, and then handed to [`Client::send`](crate::Client::send)
/// behind an [`Arc`]. The transport only ever borrows the request; the caller keeps
/// its own handle and decides when to drop it.
#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    id: RequestId,
    method: String,
    url: String,
    headers: Headers,
    body: Bytes,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body.len())
            .finish()
    }
}

impl Request {
    /// Create an empty `GET` request with the given identifier.
    pub fn new(id: impl Into<RequestId>) -> Self {
        Self {
            id: id.into(),
            method: "GET".into(),
            url: String::new(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// The request identifier.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// The HTTP method, e.g. `POST`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Set the HTTP method.
    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    /// The absolute target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Set the absolute target URL.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// Request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Set the request body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Builder-style method setter.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.set_method(method);
        self
    }

    /// Builder-style URL setter.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.set_url(url);
        self
    }

    /// Builder-style header adder.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }
}
