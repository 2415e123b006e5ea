//! Utilities for bridging tokio I/O to `hyper`.

/// Bridge [tokio] sockets to [hyper] I/O traits.
pub mod io;
