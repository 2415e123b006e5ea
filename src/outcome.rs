//! Classification of transport results into a uniform outcome.

use std::fmt;

use crate::transport::NativeError;

/// Terminal classification of a request, reported with every [`Response`](crate::Response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The request completed and a status code was obtained.
    Ok,

    /// The request was cancelled, or failed before any network I/O was attempted.
    Aborted,

    /// The remote endpoint could not be reached: timeout, name resolution or
    /// connection failure.
    NetworkFailure,

    /// Any other failure.
    LocalFailure,
}

impl Outcome {
    /// Returns `true` for [`Outcome::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => f.write_str("ok"),
            Outcome::Aborted => f.write_str("aborted"),
            Outcome::NetworkFailure => f.write_str("network failure"),
            Outcome::LocalFailure => f.write_str("local failure"),
        }
    }
}

/// Map a native error onto an [`Outcome`].
pub fn classify_error(error: &NativeError) -> Outcome {
    match error {
        NativeError::Cancelled
        | NativeError::InvalidUrl(_)
        | NativeError::InvalidMethod(_)
        | NativeError::InvalidHeader(_) => Outcome::Aborted,
        NativeError::Timeout | NativeError::NameNotResolved | NativeError::CannotConnect => {
            Outcome::NetworkFailure
        }
        NativeError::Rejected { .. } | NativeError::Other(_) => Outcome::LocalFailure,
    }
}

/// Classify the end of a request that reached the network.
///
/// `error` is the native error reported with the terminal notification, if any,
/// `cancel_requested` is whether cancellation was requested before the error was
/// observed, and `status` is the status code obtained so far (0 if none).
///
/// A requested cancellation wins over any racing native error. A clean end of
/// data without a status code is a [`Outcome::LocalFailure`].
pub fn classify(error: Option<&NativeError>, cancel_requested: bool, status: u16) -> Outcome {
    match error {
        Some(_) if cancel_requested => Outcome::Aborted,
        Some(error) => classify_error(error),
        None if status != 0 => Outcome::Ok,
        None => Outcome::LocalFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors() {
        for error in [
            NativeError::Timeout,
            NativeError::NameNotResolved,
            NativeError::CannotConnect,
        ] {
            assert_eq!(classify(Some(&error), false, 0), Outcome::NetworkFailure);
        }
    }

    #[test]
    fn never_left_the_client() {
        assert_eq!(
            classify(Some(&NativeError::InvalidUrl("::".into())), false, 0),
            Outcome::Aborted
        );
        assert_eq!(
            classify(Some(&NativeError::InvalidHeader("a b".into())), false, 0),
            Outcome::Aborted
        );
        assert_eq!(classify(Some(&NativeError::Cancelled), false, 200), Outcome::Aborted);
    }

    #[test]
    fn local_failures() {
        assert_eq!(
            classify(Some(&NativeError::Rejected { status: 400 }), false, 0),
            Outcome::LocalFailure
        );
        assert_eq!(
            classify(Some(&NativeError::other("socket reset")), false, 0),
            Outcome::LocalFailure
        );
        assert_eq!(classify(None, false, 0), Outcome::LocalFailure);
    }

    #[test]
    fn cancellation_wins_over_network_error() {
        assert_eq!(classify(Some(&NativeError::Timeout), true, 0), Outcome::Aborted);
    }

    #[test]
    fn success_keeps_real_outcome_even_when_cancelled() {
        assert_eq!(classify(None, false, 204), Outcome::Ok);
        assert_eq!(classify(None, true, 500), Outcome::Ok);
    }
}
