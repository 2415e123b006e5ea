use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::client::Error;
use crate::response::Response;

/// A future that resolves to the terminal [`Response`] of a request.
///
/// Dropping the future does not cancel the request; use
/// [`Client::cancel`](super::Client::cancel) for that.
#[pin_project::pin_project]
pub struct ResponseFuture {
    #[pin]
    rx: oneshot::Receiver<Response>,
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").finish()
    }
}

impl ResponseFuture {
    pub(super) fn new(rx: oneshot::Receiver<Response>) -> Self {
        Self { rx }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .rx
            .poll(cx)
            .map(|result| result.map_err(|_| Error::Dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::response::ResponseParts;
    use crate::Outcome;

    #[tokio::test]
    async fn resolves_with_response() {
        let (tx, rx) = oneshot::channel();
        tx.send(ResponseParts::new("WI-1".into()).finish(Outcome::Aborted))
            .unwrap();

        let response = ResponseFuture::new(rx).await.unwrap();
        assert_eq!(response.outcome(), Outcome::Aborted);
    }

    #[tokio::test]
    async fn dropped_sender_is_an_error() {
        let (tx, rx) = oneshot::channel::<Response>();
        drop(tx);

        assert!(matches!(ResponseFuture::new(rx).await, Err(Error::Dropped)));
    }
}
