//! Client events and their delivery.
//!
//! Every user-visible notification (events and operation callbacks) goes
//! through one [`Notifier`] task, so notifications are observed in the
//! order they were raised and never on the caller's stack.
//!
//! | Event | Raised when |
//! |-------|-------------|
//! | [`ClientEvent::Started`] | first connect after `start`/`connect` succeeds |
//! | [`ClientEvent::Restarted`] | a reconnect succeeds |
//! | [`ClientEvent::Stopped`] | a disconnect completes |
//! | [`ClientEvent::Error`] | an asynchronous failure has no callback to go to |
//! | [`ClientEvent::Message`] | a message arrives for a subscription |
//! | [`ClientEvent::Malformed`] | a message arrives that the service flagged as malformed |
//! | [`ClientEvent::Drain`] | a send backlog has cleared |

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::Error;
use crate::identifiers::{ClientId, ListenerId};

use super::delivery::Delivery;

// ============================================================================
// Types
// ============================================================================

/// Listener callback.
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Unit of work run by the notifier task.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// ClientEvent
// ============================================================================

/// Event emitted by a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The client connected after `start` or `connect`.
    Started,
    /// The client reconnected after a failure.
    Restarted,
    /// The client stopped.
    Stopped,
    /// An asynchronous error.
    Error(Error),
    /// A message arrived.
    Message(Delivery),
    /// A malformed message arrived.
    Malformed(Delivery),
    /// Outstanding sends dropped back below the backlog threshold.
    Drain,
}

impl ClientEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Started => EventKind::Started,
            Self::Restarted => EventKind::Restarted,
            Self::Stopped => EventKind::Stopped,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
            Self::Malformed(_) => EventKind::Malformed,
            Self::Drain => EventKind::Drain,
        }
    }
}

/// Event discriminant used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`ClientEvent::Started`].
    Started,
    /// See [`ClientEvent::Restarted`].
    Restarted,
    /// See [`ClientEvent::Stopped`].
    Stopped,
    /// See [`ClientEvent::Error`].
    Error,
    /// See [`ClientEvent::Message`].
    Message,
    /// See [`ClientEvent::Malformed`].
    Malformed,
    /// See [`ClientEvent::Drain`].
    Drain,
}

// ============================================================================
// Listeners
// ============================================================================

/// Registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: RwLock<Vec<(ListenerId, EventKind, EventHandler)>>,
}

impl Listeners {
    /// Registers a listener.
    pub(crate) fn add(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let id = ListenerId::next();
        self.entries.write().push((id, kind, handler));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry, _, _)| *entry != id);
        entries.len() != before
    }

    /// Returns `true` if any listener is registered for `kind`.
    pub(crate) fn has(&self, kind: EventKind) -> bool {
        self.entries.read().iter().any(|(_, k, _)| *k == kind)
    }

    fn handlers(&self, kind: EventKind) -> Vec<EventHandler> {
        self.entries
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect()
    }

    /// Calls every listener for the event's kind.
    ///
    /// A panicking message or malformed listener becomes an error event;
    /// other panics are logged.
    pub(crate) fn dispatch(&self, client_id: &ClientId, event: &ClientEvent) {
        let kind = event.kind();
        let handlers = self.handlers(kind);

        if handlers.is_empty() {
            if let ClientEvent::Error(err) = event {
                warn!(client_id = %client_id, error = %err, "Unhandled client error");
            }
            return;
        }

        for handler in handlers {
            let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) else {
                continue;
            };
            let message = panic_message(payload.as_ref());
            match kind {
                EventKind::Message | EventKind::Malformed => {
                    self.dispatch(client_id, &ClientEvent::Error(Error::listener(message)));
                }
                _ => warn!(client_id = %client_id, ?kind, panic = %message, "Listener panicked"),
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Ordered, asynchronous delivery of notifications.
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<Job>,
}

impl Notifier {
    /// Spawns the notifier task on `runtime`.
    ///
    /// The task ends once the notifier is dropped and the queue is empty.
    pub(crate) fn spawn(runtime: &Handle, client_id: ClientId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    warn!(
                        client_id = %client_id,
                        panic = %panic_message(payload.as_ref()),
                        "Callback panicked"
                    );
                }
            }
            trace!(client_id = %client_id, "Notifier stopped");
        });

        Self { tx }
    }

    /// Queues a job. Jobs posted after the task ended are dropped.
    pub(crate) fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            trace!("Notifier closed, dropping notification");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
