//! Normalized responses delivered to response handlers.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::headers::Headers;
use crate::outcome::Outcome;
use crate::request::RequestId;

/// The normalized result of one request.
///
/// Exactly one `Response` is produced per sent request, whatever the outcome.
/// Ownership passes to the response handler.
#[derive(Clone, PartialEq, Eq)]
pub struct Response {
    id: RequestId,
    status: u16,
    headers: Headers,
    body: Bytes,
    outcome: Outcome,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("outcome", &self.outcome)
            .field("headers", &self.headers)
            .field("body", &self.body.len())
            .finish()
    }
}

impl Response {
    /// Identifier of the originating request.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// HTTP status code, or 0 if none was obtained.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers, with content headers merged in.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Response body, possibly empty.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Terminal classification of the request.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

/// A response under construction by an in-flight operation.
#[derive(Debug)]
pub(crate) struct ResponseParts {
    id: RequestId,
    status: u16,
    headers: Headers,
    body: BytesMut,
}

impl ResponseParts {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            id,
            status: 0,
            headers: Headers::new(),
            body: BytesMut::new(),
        }
    }

    pub(crate) fn status(&self) -> u16 {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub(crate) fn merge_headers(&mut self, headers: Headers) {
        self.headers.merge(headers);
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub(crate) fn replace_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    pub(crate) fn body_len(&self) -> usize {
        self.body.len()
    }

    pub(crate) fn finish(self, outcome: Outcome) -> Response {
        Response {
            id: self.id,
            status: self.status,
            headers: self.headers,
            body: self.body.freeze(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Response: Send, Sync);

    #[test]
    fn chunks_are_appended_in_order() {
        let mut parts = ResponseParts::new("WI-7".into());
        parts.set_status(200);
        parts.append_body(b"hello ");
        parts.append_body(b"");
        parts.append_body(b"world");

        let response = parts.finish(Outcome::Ok);
        assert_eq!(response.body().as_ref(), b"hello world");
        assert_eq!(response.status(), 200);
        assert!(response.outcome().is_ok());
    }

    #[test]
    fn replaced_body_discards_chunks() {
        let mut parts = ResponseParts::new("WI-8".into());
        parts.append_body(b"partial");
        parts.replace_body(b"whole");
        assert_eq!(parts.finish(Outcome::Ok).into_body().as_ref(), b"whole");
    }
}
