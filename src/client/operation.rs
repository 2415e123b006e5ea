//! The per-request state machine.
//!
//! Every input to an operation (start, transport events, cancellation and
//! abandonment) is a [`Command`] pushed onto the operation's inbox. Whichever
//! thread finds the inbox idle becomes its drainer and applies commands one at
//! a time until the inbox is empty. Commands submitted while another thread is
//! draining, including those submitted re-entrantly from inside a native call
//! made by the drainer, are queued and applied in order by that drainer.
//!
//! This gives every operation strictly ordered, monotonic stage transitions no
//! matter which thread a native transport calls back on, without ever holding
//! the state lock across a call into the transport's event sink.
//!
//! The drainer's thread is recorded, so that a handler which cancels or shuts
//! down its own client from inside a callback is not waited for by that
//! shutdown.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::handler::{LifecycleEvent, ResponseHandler};
use super::registry::{OperationKey, Tracked, WeakRegistry};
use crate::outcome::{classify, Outcome};
use crate::request::{Request, RequestId};
use crate::response::{Response, ResponseParts};
use crate::transport::{Closed, EventSink, NativeError, NativeRequest, Transport, TransportEvent};

/// Stages of a request, in the only order they can be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Stage {
    Idle,
    Connecting,
    Sending,
    AwaitingHeaders,
    AwaitingBody,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Connecting => "connecting",
            Stage::Sending => "sending",
            Stage::AwaitingHeaders => "awaiting headers",
            Stage::AwaitingBody => "awaiting body",
            Stage::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Command {
    Start(OperationKey),
    Reject,
    Event(TransportEvent),
    Cancel,
    Abandon,
}

/// How an operation ended.
#[derive(Debug)]
enum End {
    /// Never reached the network.
    Setup,
    /// Forced to finish without waiting for the transport.
    Abandoned,
    /// Terminal notification from the transport, with its error if any.
    Native(Option<NativeError>),
}

#[derive(Debug, Default)]
struct Inbox {
    commands: VecDeque<Command>,
    drainer: Option<ThreadId>,
}

struct State<T: Transport> {
    stage: Stage,
    key: Option<OperationKey>,
    connection: Option<T::Connection>,
    native: Option<T::Request>,
    closed: bool,
    response: Option<ResponseParts>,
    handler: Option<Box<dyn ResponseHandler>>,
}

/// Everything needed to run the terminal callback outside the state lock.
struct Completion {
    handler: Box<dyn ResponseHandler>,
    response: Response,
    key: Option<OperationKey>,
}

/// One in-flight request.
pub(crate) struct Operation<T: Transport> {
    id: RequestId,
    request: Arc<Request>,
    transport: Arc<T>,
    registry: WeakRegistry,
    cancel_requested: AtomicBool,
    inbox: Mutex<Inbox>,
    state: Mutex<State<T>>,
}

impl<T: Transport> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("url", &self.request.url())
            .field("cancel_requested", &self.cancel_requested.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Transport> Operation<T> {
    pub(crate) fn new(
        request: Arc<Request>,
        transport: Arc<T>,
        registry: WeakRegistry,
        handler: Box<dyn ResponseHandler>,
    ) -> Self {
        let id = request.id().clone();
        Self {
            id: id.clone(),
            request,
            transport,
            registry,
            cancel_requested: AtomicBool::new(false),
            inbox: Mutex::new(Inbox::default()),
            state: Mutex::new(State {
                stage: Stage::Idle,
                key: None,
                connection: None,
                native: None,
                closed: false,
                response: Some(ResponseParts::new(id)),
                handler: Some(handler),
            }),
        }
    }

    /// Start driving the request. `key` is the registration this operation
    /// removes when it finishes.
    pub(crate) fn start(&self, key: OperationKey) {
        self.submit(Command::Start(key));
    }

    /// Answer `Aborted` without touching the transport. Used for requests
    /// which could not be registered.
    pub(crate) fn reject(&self) {
        self.submit(Command::Reject);
    }

    #[cfg(test)]
    fn stage(&self) -> Stage {
        self.state.lock().stage
    }

    fn submit(&self, command: Command) {
        {
            let mut inbox = self.inbox.lock();
            inbox.commands.push_back(command);
            if inbox.drainer.is_some() {
                return;
            }
            inbox.drainer = Some(thread::current().id());
        }

        loop {
            let command = {
                let mut inbox = self.inbox.lock();
                match inbox.commands.pop_front() {
                    Some(command) => command,
                    None => {
                        inbox.drainer = None;
                        return;
                    }
                }
            };

            let completion = {
                let mut state = self.state.lock();
                self.apply(&mut state, command)
            };

            if let Some(completion) = completion {
                self.complete(completion);
            }
        }
    }

    fn apply(&self, state: &mut State<T>, command: Command) -> Option<Completion> {
        if state.stage == Stage::Complete {
            trace!(id = %self.id, ?command, "operation complete, ignoring");
            return None;
        }

        match command {
            Command::Start(key) => self.on_start(state, key),
            Command::Reject => {
                self.dispatch(state, LifecycleEvent::ConnectFailed);
                self.finish(state, End::Setup)
            }
            Command::Event(event) => self.on_event(state, event),
            Command::Cancel => self.on_cancel(state),
            Command::Abandon => self.on_abandon(state),
        }
    }

    fn on_start(&self, state: &mut State<T>, key: OperationKey) -> Option<Completion> {
        if state.stage != Stage::Idle {
            return None;
        }
        state.key = Some(key.clone());

        if self.cancel_requested.load(Ordering::SeqCst) || !self.transport.is_open() {
            debug!(id = %self.id, "aborted before connecting");
            self.dispatch(state, LifecycleEvent::ConnectFailed);
            return self.finish(state, End::Setup);
        }

        self.transition(state, Stage::Connecting);
        let sink = EventSink::new(key, self.registry.clone());
        let opened = self.transport.parse_url(self.request.url()).and_then(|target| {
            let connection = self.transport.connect(&target)?;
            let native =
                self.transport
                    .open_request(&connection, self.request.method(), &target, sink)?;
            Ok((connection, native))
        });

        let (connection, mut native) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                warn!(id = %self.id, url = %self.request.url(), %error, "unable to open request");
                self.dispatch(state, LifecycleEvent::ConnectFailed);
                return self.finish(state, End::Setup);
            }
        };
        self.dispatch(state, LifecycleEvent::Connecting);

        let headers = native.add_headers(self.request.headers());
        state.connection = Some(connection);
        state.native = Some(native);
        if let Err(error) = headers {
            warn!(id = %self.id, %error, "unable to attach request headers");
            self.dispatch(state, LifecycleEvent::ConnectFailed);
            return self.finish(state, End::Setup);
        }

        self.transition(state, Stage::Sending);
        self.dispatch(state, LifecycleEvent::Sending);

        let body = self.request.body().clone();
        let sent = match state.native.as_mut() {
            Some(native) => native.send(body),
            None => Ok(()),
        };
        if let Err(error) = sent {
            warn!(id = %self.id, %error, "unable to send request");
            self.dispatch(state, LifecycleEvent::SendFailed);
            return self.finish(state, End::Setup);
        }

        self.transition(state, Stage::AwaitingHeaders);
        None
    }

    fn on_event(&self, state: &mut State<T>, event: TransportEvent) -> Option<Completion> {
        if !matches!(state.stage, Stage::AwaitingHeaders | Stage::AwaitingBody) {
            trace!(id = %self.id, stage = %state.stage, ?event, "unexpected transport event");
            return None;
        }

        match event {
            TransportEvent::Headers { status, headers } => {
                if let Some(parts) = state.response.as_mut() {
                    if let Some(status) = status {
                        if parts.status() == 0 {
                            parts.set_status(status);
                        }
                    }
                    parts.merge_headers(headers);
                }
                if state.stage == Stage::AwaitingHeaders {
                    self.transition(state, Stage::AwaitingBody);
                }
                None
            }
            TransportEvent::Data(chunk) => {
                if let Some(parts) = state.response.as_mut() {
                    parts.append_body(&chunk);
                    trace!(id = %self.id, chunk = chunk.len(), total = parts.body_len(), "data");
                }
                None
            }
            TransportEvent::Body(body) => {
                if let Some(parts) = state.response.as_mut() {
                    parts.replace_body(&body);
                    trace!(id = %self.id, total = parts.body_len(), "body");
                }
                None
            }
            TransportEvent::Complete => self.finish(state, End::Native(None)),
            TransportEvent::Failed(error) => {
                debug!(id = %self.id, stage = %state.stage, %error, "transport failed");
                self.finish(state, End::Native(Some(error)))
            }
        }
    }

    fn on_cancel(&self, state: &mut State<T>) -> Option<Completion> {
        if state.stage == Stage::Idle {
            // Checked again when the start command runs.
            return None;
        }

        if state.closed {
            return None;
        }

        match state.native.as_mut() {
            Some(native) => {
                state.closed = true;
                match native.close() {
                    Closed::Notifies => {
                        trace!(id = %self.id, "handle closed, awaiting final notification");
                        None
                    }
                    Closed::Silent => {
                        trace!(id = %self.id, "handle closed silently");
                        self.finish(state, End::Native(Some(NativeError::Cancelled)))
                    }
                }
            }
            None => self.finish(state, End::Setup),
        }
    }

    fn on_abandon(&self, state: &mut State<T>) -> Option<Completion> {
        if state.stage == Stage::Idle {
            return None;
        }

        if !state.closed {
            if let Some(native) = state.native.as_mut() {
                state.closed = true;
                native.close();
            }
        }
        warn!(id = %self.id, stage = %state.stage, "abandoning request");
        self.finish(state, End::Abandoned)
    }

    fn transition(&self, state: &mut State<T>, stage: Stage) {
        debug_assert!(stage > state.stage, "stages are visited in order");
        trace!(id = %self.id, from = %state.stage, to = %stage, "transition");
        state.stage = stage;
    }

    fn dispatch(&self, state: &mut State<T>, event: LifecycleEvent) {
        trace!(id = %self.id, %event, "lifecycle");
        if let Some(handler) = state.handler.as_mut() {
            handler.on_event(&self.id, event);
        }
    }

    fn finish(&self, state: &mut State<T>, end: End) -> Option<Completion> {
        let parts = state.response.take()?;
        let cancel_requested = self.cancel_requested.load(Ordering::SeqCst);

        let outcome = match &end {
            End::Setup | End::Abandoned => Outcome::Aborted,
            End::Native(error) => classify(error.as_ref(), cancel_requested, parts.status()),
        };

        self.transition(state, Stage::Complete);
        state.native = None;
        state.connection = None;

        if outcome.is_ok() {
            self.dispatch(state, LifecycleEvent::ResponseReceived);
        }
        debug!(
            id = %self.id,
            %outcome,
            status = parts.status(),
            body = parts.body_len(),
            "request finished"
        );

        let handler = state.handler.take()?;
        Some(Completion {
            handler,
            response: parts.finish(outcome),
            key: state.key.take(),
        })
    }

    fn complete(&self, completion: Completion) {
        let Completion {
            handler,
            response,
            key,
        } = completion;

        handler.on_response(response);

        if let Some(key) = key {
            if let Some(registry) = self.registry.upgrade() {
                registry.release(&key);
            }
        }
    }
}

impl<T: Transport> Tracked for Operation<T> {
    fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.submit(Command::Cancel);
    }

    fn abandon(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.submit(Command::Abandon);
    }

    fn deliver(&self, event: TransportEvent) {
        self.submit(Command::Event(event));
    }

    fn is_driven_by_current_thread(&self) -> bool {
        self.inbox.lock().drainer == Some(thread::current().id())
    }
}
