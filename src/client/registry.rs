//! Tracking of in-flight operations.
//!
//! The registry is the single owner of every in-flight operation between its
//! registration and its removal, and the only place where cancellation by
//! identifier can find a live operation. Its lock guards membership only: no
//! operation method is ever called while the lock is held, since cancelling an
//! operation may complete it synchronously, and completion removes it from the
//! registry.
//!
//! Outside the crate the registry is read-only. Only an operation's own
//! completion removes it, so every registered operation answers its handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::Error;
use crate::request::RequestId;
use crate::transport::TransportEvent;

/// An in-flight unit of work which can be tracked by a [`Registry`].
pub(crate) trait Tracked: Send + Sync + 'static {
    /// Request cancellation. Cancellation is cooperative: the operation will
    /// finish and remove itself, possibly later and on another thread.
    fn cancel(&self);

    /// Force the operation to finish as aborted, without waiting for its
    /// native transport.
    fn abandon(&self);

    /// Hand a transport event to the operation.
    fn deliver(&self, event: TransportEvent);

    /// Whether the calling thread is currently driving this operation, in
    /// which case the operation cannot leave the registry until the caller
    /// returns.
    fn is_driven_by_current_thread(&self) -> bool {
        false
    }
}

/// Identifies one registration of an operation.
///
/// Identifiers can be reused once an operation has finished; the serial
/// distinguishes successive registrations under the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct OperationKey {
    id: RequestId,
    serial: u64,
}

impl OperationKey {
    /// The request identifier.
    pub(crate) fn id(&self) -> &RequestId {
        &self.id
    }
}

struct Entry {
    serial: u64,
    operation: Arc<dyn Tracked>,
}

struct RegistryInner {
    operations: Mutex<HashMap<RequestId, Entry>>,
    serial: AtomicU64,
}

/// Concurrency-safe map from request identifier to in-flight operation.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("in_flight", &self.len())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                operations: Mutex::new(HashMap::new()),
                serial: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register `operation` under `id`.
    ///
    /// Fails with [`Error::DuplicateRequest`] if an operation is already
    /// registered under `id`.
    pub(crate) fn register(
        &self,
        id: RequestId,
        operation: Arc<dyn Tracked>,
    ) -> Result<OperationKey, Error> {
        let mut operations = self.inner.operations.lock();
        if operations.contains_key(&id) {
            tracing::error!(%id, "request is already in flight");
            return Err(Error::DuplicateRequest(id));
        }

        let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
        operations.insert(id.clone(), Entry { serial, operation });
        trace!(%id, serial, in_flight = operations.len(), "registered");
        Ok(OperationKey { id, serial })
    }

    /// Remove whatever operation is registered under `id`. Returns `false` if
    /// there was none.
    #[cfg(test)]
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        let removed = self.inner.operations.lock().remove(id);
        removed.is_some()
    }

    /// Remove the registration identified by `key`, leaving any newer
    /// registration under the same identifier in place.
    pub(crate) fn release(&self, key: &OperationKey) -> bool {
        let mut operations = self.inner.operations.lock();
        if operations.get(&key.id).map(|entry| entry.serial) != Some(key.serial) {
            return false;
        }

        let entry = operations.remove(&key.id);
        trace!(id = %key.id, in_flight = operations.len(), "released");
        // The operation may be dropped here, never under the lock.
        drop(operations);
        drop(entry);
        true
    }

    fn lookup(&self, id: &RequestId) -> Option<Arc<dyn Tracked>> {
        self.inner
            .operations
            .lock()
            .get(id)
            .map(|entry| entry.operation.clone())
    }

    /// Cancel the operation registered under `id`, if any.
    ///
    /// The lock is held only for the lookup. Returns `false` if no operation was
    /// registered under `id`.
    pub(crate) fn cancel_one(&self, id: &RequestId) -> bool {
        match self.lookup(id) {
            Some(operation) => {
                trace!(%id, "cancelling");
                operation.cancel();
                true
            }
            None => {
                trace!(%id, "cancel requested for unknown request");
                false
            }
        }
    }

    /// Cancel every registered operation.
    ///
    /// Identifiers are snapshotted under the lock, then cancelled one by one
    /// without holding it. Operations registered after the snapshot are not
    /// cancelled.
    pub(crate) fn cancel_all(&self) {
        for id in self.ids() {
            self.cancel_one(&id);
        }
    }

    /// Force every registered operation to finish as aborted.
    pub(crate) fn abandon_all(&self) {
        for operation in self.snapshot() {
            operation.abandon();
        }
    }

    /// Hand `event` to the operation registered under `key`.
    ///
    /// Returns `false` if that registration no longer exists.
    pub(crate) fn deliver(&self, key: &OperationKey, event: TransportEvent) -> bool {
        let operation = {
            let operations = self.inner.operations.lock();
            match operations.get(&key.id) {
                Some(entry) if entry.serial == key.serial => entry.operation.clone(),
                _ => {
                    trace!(id = %key.id, ?event, "operation finished, dropping transport event");
                    return false;
                }
            }
        };

        operation.deliver(event);
        true
    }

    fn snapshot(&self) -> Vec<Arc<dyn Tracked>> {
        self.inner
            .operations
            .lock()
            .values()
            .map(|entry| entry.operation.clone())
            .collect()
    }

    /// Whether every registered operation has finished, other than those the
    /// calling thread is itself driving.
    ///
    /// A handler which shuts its client down runs on the thread driving its
    /// operation, and that operation is only released once the handler
    /// returns.
    fn is_drained(&self) -> bool {
        self.snapshot()
            .iter()
            .all(|operation| operation.is_driven_by_current_thread())
    }

    /// Block the calling thread until every operation it is not itself
    /// driving has left the registry, checking every `poll_interval`.
    pub fn await_empty(&self, poll_interval: Duration) {
        while !self.is_drained() {
            std::thread::sleep(poll_interval);
        }
    }

    /// Like [`Registry::await_empty`], but gives up after `timeout`. Returns
    /// `true` if the registry drained.
    pub fn await_empty_timeout(&self, poll_interval: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_drained() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            std::thread::sleep(poll_interval.min(deadline - now));
        }
    }

    /// Whether an operation is registered under `id`.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.operations.lock().contains_key(id)
    }

    /// Snapshot of the registered identifiers.
    pub fn ids(&self) -> Vec<RequestId> {
        self.inner.operations.lock().keys().cloned().collect()
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.inner.operations.lock().len()
    }

    /// Returns `true` if no operation is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.operations.lock().is_empty()
    }
}

/// A registry handle which does not keep the registry alive.
#[derive(Clone)]
pub(crate) struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}
