use thiserror::Error;

use crate::request::RequestId;

/// Client error type.
///
/// These are logic errors of the client itself. Failures of a request are
/// never errors: they are reported through the request's
/// [`Outcome`](crate::Outcome).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A request with this identifier is already in flight.
    #[error("request {0} is already in flight")]
    DuplicateRequest(RequestId),

    /// The request was dropped without producing a response.
    #[error("request dropped without a response")]
    Dropped,
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    use crate::BoxError;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<BoxError>);

    #[test]
    fn display() {
        let error = Error::DuplicateRequest("WI-3".into());
        assert_eq!(error.to_string(), "request WI-3 is already in flight");
    }
}
