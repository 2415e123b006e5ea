use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::transport::hyper::{HyperTransport, HyperTransportConfig};
use crate::transport::Transport;

/// Client configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Prefix of generated request identifiers, which render as `<prefix>-<n>`.
    pub id_prefix: String,

    /// How often to check whether in-flight requests have drained, when
    /// cancelling all requests or shutting down.
    pub poll_interval: Duration,

    /// How long to wait for in-flight requests to drain after cancelling them,
    /// before abandoning them. `None` waits forever.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_prefix: "WI".into(),
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// A builder for a [`Client`].
#[derive(Debug)]
pub struct Builder<T> {
    transport: T,
    config: Config,
}

impl Builder<()> {
    /// Create a new builder without a transport.
    pub fn new() -> Self {
        Self {
            transport: (),
            config: Config::default(),
        }
    }
}

impl Default for Builder<HyperTransport> {
    fn default() -> Self {
        Builder::new().with_hyper(HyperTransportConfig::default())
    }
}

impl<T> Builder<T> {
    /// Use the hyper transport, driven on the current tokio runtime.
    ///
    /// Outside of a tokio runtime the transport session does not open, and
    /// every request is answered as aborted.
    pub fn with_hyper(self, config: HyperTransportConfig) -> Builder<HyperTransport> {
        self.with_transport(HyperTransport::new(config))
    }

    /// Provide a custom transport.
    pub fn with_transport<T2>(self, transport: T2) -> Builder<T2> {
        Builder {
            transport,
            config: self.config,
        }
    }

    /// Borrow the transport.
    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Borrow the configuration.
    pub fn config(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Set the prefix of generated request identifiers.
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.id_prefix = prefix.into();
        self
    }

    /// Set the interval at which draining is checked.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Abandon requests still in flight `timeout` after shutdown cancelled them.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = Some(timeout);
        self
    }

    /// Wait for every in-flight request to drain at shutdown, however long it takes.
    pub fn without_shutdown_timeout(mut self) -> Self {
        self.config.shutdown_timeout = None;
        self
    }
}

impl<T> Builder<T>
where
    T: Transport,
{
    /// Build a client.
    pub fn build(self) -> Client<T> {
        Client::from_parts(Arc::new(self.transport), self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.id_prefix, "WI");
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.shutdown_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn builder_overrides() {
        let client = Builder::new()
            .with_transport(MockTransport::new())
            .with_id_prefix("EV")
            .with_poll_interval(Duration::from_millis(5))
            .without_shutdown_timeout()
            .build();

        assert_eq!(client.config().id_prefix, "EV");
        assert_eq!(client.config().poll_interval, Duration::from_millis(5));
        assert_eq!(client.config().shutdown_timeout, None);
        assert_eq!(client.create_request().id().as_str(), "EV-1");
    }
}
