//! Uplink
//!
//! The asynchronous HTTP transport core of a telemetry client: it issues
//! batched event payloads against whatever native HTTP stack is available,
//! and reports exactly one normalized [`Response`] per request, whether the
//! request succeeded, failed or was cancelled.
//!
//! - [`Client`] is the entry point. It creates requests, sends them with a
//!   [`ResponseHandler`](client::ResponseHandler), and cancels them one by
//!   one or all together.
//! - [`transport`] defines the seam to native HTTP stacks, and provides a
//!   hyper-based HTTP/1.1 transport.
//! - [`Outcome`] is the uniform classification of how a request ended.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bridge;
pub mod client;
pub mod headers;
pub mod outcome;
pub mod request;
pub mod response;
pub mod transport;

pub use client::Client;
pub use headers::Headers;
pub use outcome::Outcome;
pub use request::{Request, RequestId};
pub use response::Response;

/// A boxed error, as accepted by [`NativeError::other`](transport::NativeError::other).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
