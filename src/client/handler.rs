//! Response handlers and lifecycle notifications.

use std::fmt;

use tokio::sync::oneshot;

use crate::request::RequestId;
use crate::response::Response;

/// Best-effort progress notifications for a request.
///
/// These are for diagnostics only. Not every transport produces every event,
/// and correctness must never depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// The connection and native request were created.
    Connecting,
    /// The request could not be set up, or was aborted before any network I/O.
    ConnectFailed,
    /// The request is being sent.
    Sending,
    /// The native send call failed.
    SendFailed,
    /// A response was received and classified as [`Outcome::Ok`](crate::Outcome::Ok).
    ResponseReceived,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Connecting => "connecting",
            LifecycleEvent::ConnectFailed => "connect failed",
            LifecycleEvent::Sending => "sending",
            LifecycleEvent::SendFailed => "send failed",
            LifecycleEvent::ResponseReceived => "response received",
        };
        f.write_str(name)
    }
}

/// Receives the terminal [`Response`] of a request.
///
/// [`ResponseHandler::on_response`] consumes the handler, and is called exactly
/// once per sent request, from whichever thread finishes the request. Handlers
/// should return quickly and must not block waiting on other requests.
///
/// Any `FnOnce(Response)` closure is a handler.
pub trait ResponseHandler: Send + 'static {
    /// A lifecycle notification. The default implementation ignores it.
    fn on_event(&mut self, id: &RequestId, event: LifecycleEvent) {
        let _ = (id, event);
    }

    /// The terminal response. Ownership of the response passes to the handler.
    fn on_response(self: Box<Self>, response: Response);
}

impl<F> ResponseHandler for F
where
    F: FnOnce(Response) + Send + 'static,
{
    fn on_response(self: Box<Self>, response: Response) {
        (*self)(response)
    }
}

/// Forwards the response into a oneshot channel, for [`ResponseFuture`](super::ResponseFuture).
#[derive(Debug)]
pub(crate) struct Responder(oneshot::Sender<Response>);

impl Responder {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (Responder(tx), rx)
    }
}

impl ResponseHandler for Responder {
    fn on_response(self: Box<Self>, response: Response) {
        if self.0.send(response).is_err() {
            tracing::trace!("response future dropped before completion");
        }
    }
}
