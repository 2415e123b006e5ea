//! A scriptable transport for exercising the request lifecycle without a network.
//!
//! The mock can fail at any setup step, and delivers a scripted sequence of
//! [`TransportEvent`]s after a successful send, either inline from inside
//! [`NativeRequest::send`] (like a synchronous native stack), from a spawned
//! thread (like a thread-pool or completion-port stack), or not at all, leaving
//! the test to drive delivery through [`MockTransport::sink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{Closed, EventSink, NativeError, NativeRequest, Target, Transport, TransportEvent};
use crate::headers::Headers;
use crate::request::RequestId;

/// The setup step at which a [`MockTransport`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// URL cracking fails.
    ParseUrl,
    /// Creating the connection fails.
    Connect,
    /// Opening the request handle fails.
    OpenRequest,
    /// Attaching headers fails.
    AddHeaders,
    /// The send call fails synchronously.
    Send,
}

/// How a [`MockTransport`] delivers its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// From inside the `send` call, on the caller's thread.
    Inline,
    /// From a freshly spawned thread per request.
    Spawned,
    /// Not at all; the test delivers events through [`MockTransport::sink`].
    Manual,
}

/// Counts of native calls made against a [`MockTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// Calls to [`Transport::parse_url`].
    pub parse_url: usize,
    /// Calls to [`Transport::connect`].
    pub connect: usize,
    /// Calls to [`Transport::open_request`].
    pub open_request: usize,
    /// Calls to [`NativeRequest::add_headers`].
    pub add_headers: usize,
    /// Calls to [`NativeRequest::send`].
    pub send: usize,
    /// Calls to [`NativeRequest::close`].
    pub close: usize,
}

#[derive(Debug, Clone)]
struct MockConfig {
    open: bool,
    failure: Option<MockFailure>,
    delivery: Delivery,
    close: Closed,
    script: Vec<TransportEvent>,
    step_delay: Option<Duration>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            open: true,
            failure: None,
            delivery: Delivery::Inline,
            close: Closed::Notifies,
            script: vec![
                TransportEvent::Headers {
                    status: Some(200),
                    headers: Headers::new(),
                },
                TransportEvent::Complete,
            ],
            step_delay: None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    parse_url: AtomicUsize,
    connect: AtomicUsize,
    open_request: AtomicUsize,
    add_headers: AtomicUsize,
    send: AtomicUsize,
    close: AtomicUsize,
}

#[derive(Debug, Default)]
struct MockState {
    counters: Counters,
    sinks: Mutex<HashMap<RequestId, EventSink>>,
}

/// A transport which never touches the network.
///
/// Clones share call counters and sinks, so a test can keep a clone after
/// handing the transport to a client.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    config: Arc<MockConfig>,
    state: Arc<MockState>,
}

impl MockTransport {
    /// A transport which answers every request with `200` and an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `script` after each successful send.
    pub fn with_script(mut self, script: Vec<TransportEvent>) -> Self {
        Arc::make_mut(&mut self.config).script = script;
        self
    }

    /// Choose how the script is delivered.
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        Arc::make_mut(&mut self.config).delivery = delivery;
        self
    }

    /// Pause before each scripted event when delivering from a spawned thread.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        Arc::make_mut(&mut self.config).step_delay = Some(delay);
        self
    }

    /// Fail at the given setup step.
    pub fn failing_at(mut self, failure: MockFailure) -> Self {
        Arc::make_mut(&mut self.config).failure = Some(failure);
        self
    }

    /// Choose what happens after a request handle is closed.
    ///
    /// With [`Closed::Notifies`], a final [`NativeError::Cancelled`] is delivered
    /// from inside `close` (inline delivery) or from a spawned thread (spawned
    /// delivery). Manual delivery leaves it to the test.
    pub fn with_close(mut self, close: Closed) -> Self {
        Arc::make_mut(&mut self.config).close = close;
        self
    }

    /// A transport whose session failed to open.
    pub fn closed_session(mut self) -> Self {
        Arc::make_mut(&mut self.config).open = false;
        self
    }

    /// Snapshot of the native calls made so far.
    pub fn calls(&self) -> MockCalls {
        let counters = &self.state.counters;
        MockCalls {
            parse_url: counters.parse_url.load(Ordering::SeqCst),
            connect: counters.connect.load(Ordering::SeqCst),
            open_request: counters.open_request.load(Ordering::SeqCst),
            add_headers: counters.add_headers.load(Ordering::SeqCst),
            send: counters.send.load(Ordering::SeqCst),
            close: counters.close.load(Ordering::SeqCst),
        }
    }

    /// The event sink handed to the transport for request `id`.
    pub fn sink(&self, id: &RequestId) -> Option<EventSink> {
        self.state.sinks.lock().get(id).cloned()
    }

    fn fails_at(&self, step: MockFailure) -> bool {
        self.config.failure == Some(step)
    }
}

impl Transport for MockTransport {
    type Connection = Target;
    type Request = MockRequest;

    fn is_open(&self) -> bool {
        self.config.open
    }

    fn parse_url(&self, url: &str) -> Result<Target, NativeError> {
        self.state.counters.parse_url.fetch_add(1, Ordering::SeqCst);
        if self.fails_at(MockFailure::ParseUrl) {
            return Err(NativeError::InvalidUrl(url.to_owned()));
        }
        Target::parse(url)
    }

    fn connect(&self, target: &Target) -> Result<Self::Connection, NativeError> {
        self.state.counters.connect.fetch_add(1, Ordering::SeqCst);
        if self.fails_at(MockFailure::Connect) {
            return Err(NativeError::CannotConnect);
        }
        Ok(target.clone())
    }

    fn open_request(
        &self,
        _connection: &Self::Connection,
        _method: &str,
        _target: &Target,
        sink: EventSink,
    ) -> Result<Self::Request, NativeError> {
        self.state
            .counters
            .open_request
            .fetch_add(1, Ordering::SeqCst);
        if self.fails_at(MockFailure::OpenRequest) {
            return Err(NativeError::other("request handle unavailable"));
        }

        self.state
            .sinks
            .lock()
            .insert(sink.id().clone(), sink.clone());

        Ok(MockRequest {
            transport: self.clone(),
            sink,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// The request handle of a [`MockTransport`].
#[derive(Debug)]
pub struct MockRequest {
    transport: MockTransport,
    sink: EventSink,
    closed: Arc<AtomicBool>,
}

impl MockRequest {
    fn deliver_all(&self, events: Vec<TransportEvent>) {
        let config = &self.transport.config;
        match config.delivery {
            Delivery::Inline => {
                for event in events {
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    self.sink.deliver(event);
                }
            }
            Delivery::Spawned => {
                let sink = self.sink.clone();
                let closed = self.closed.clone();
                let delay = config.step_delay;
                std::thread::spawn(move || {
                    for event in events {
                        if let Some(delay) = delay {
                            std::thread::sleep(delay);
                        }
                        if closed.load(Ordering::SeqCst) {
                            break;
                        }
                        sink.deliver(event);
                    }
                });
            }
            Delivery::Manual => {}
        }
    }
}

impl NativeRequest for MockRequest {
    fn add_headers(&mut self, headers: &Headers) -> Result<(), NativeError> {
        self.transport
            .state
            .counters
            .add_headers
            .fetch_add(1, Ordering::SeqCst);
        if self.transport.fails_at(MockFailure::AddHeaders) {
            let name = headers
                .iter()
                .next()
                .map(|(name, _)| name.to_owned())
                .unwrap_or_default();
            return Err(NativeError::InvalidHeader(name));
        }
        Ok(())
    }

    fn send(&mut self, _body: Bytes) -> Result<(), NativeError> {
        self.transport
            .state
            .counters
            .send
            .fetch_add(1, Ordering::SeqCst);
        if self.transport.fails_at(MockFailure::Send) {
            return Err(NativeError::other("send failed"));
        }

        self.deliver_all(self.transport.config.script.clone());
        Ok(())
    }

    fn close(&mut self) -> Closed {
        self.transport
            .state
            .counters
            .close
            .fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);

        let close = self.transport.config.close;
        if close == Closed::Notifies {
            let event = TransportEvent::Failed(NativeError::Cancelled);
            match self.transport.config.delivery {
                Delivery::Inline => {
                    self.sink.deliver(event);
                }
                Delivery::Spawned => {
                    let sink = self.sink.clone();
                    std::thread::spawn(move || {
                        sink.deliver(event);
                    });
                }
                Delivery::Manual => {}
            }
        }
        close
    }
}
