//! Client handle and shared state.
//!
//! A [`Client`] is a cheap, cloneable handle over `Arc<ClientInner>`. All
//! mutable state sits in one [`ClientCore`] behind a `parking_lot::Mutex`
//! that is held only for synchronous bookkeeping and transport calls, never
//! across an `.await` and never while user code runs.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::identifiers::{ClientId, ListenerId};
use crate::service::ServiceResolver;
use crate::transport::{Payload, TlsOptions, Transport};

use super::builder::ClientBuilder;
use super::events::{ClientEvent, EventHandler, EventKind, Listeners, Notifier};
use super::options::{ReplayOrder, SendOptions, SubscribeOptions, UnsubscribeOptions};
use super::queue::ActionQueues;
use super::schedule::Loops;
use super::send::OutstandingSend;
use super::subscription::{Destination, Registry};

// ============================================================================
// Types
// ============================================================================

/// Completion callback for `connect` and `disconnect`.
pub type CompletionCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Completion callback for `subscribe` and `unsubscribe`.
pub type SubscribeCallback = Box<dyn FnOnce(Result<()>, Destination) + Send + 'static>;

/// Completion callback for `send`.
pub type SendCallback = Box<dyn FnOnce(Result<()>, SentMessage) + Send + 'static>;

/// What a send callback receives back.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Topic the message was sent to.
    pub topic: String,
    /// Message body.
    pub body: Payload,
    /// Options the message was sent with.
    pub options: SendOptions,
}

// ============================================================================
// ClientState
// ============================================================================

/// Connection state.
///
/// ```text
/// Starting ──► Started ──► Retrying ──► Started
///    │  ▲         │           │
///    │  │         ▼           ▼
///    │  └──── Stopped ◄── Stopping ◄── (any other state)
///    └──► Retrying
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Connecting for the first time after `start`/`connect`.
    Starting,
    /// Connected.
    Started,
    /// Lost or failed to get a connection, retrying.
    Retrying,
    /// Disconnect in progress.
    Stopping,
    /// Disconnected.
    Stopped,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Retrying => "retrying",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ClientCore
// ============================================================================

/// Mutable client state, guarded by [`ClientInner::core`].
pub(crate) struct ClientCore {
    pub state: ClientState,
    /// Connected endpoint URL; `Some` only while started.
    pub service: Option<String>,
    /// Emit `started` (not `restarted`) on the next successful connect.
    pub first_start: bool,
    /// Bumped on every connect, reconnect and stop; loops compare it to
    /// detect that they belong to an earlier connection.
    pub generation: u64,
    /// The transport must be stopped before the next connect.
    pub transport_dirty: bool,
    pub transport: Box<dyn Transport>,
    pub subscriptions: Registry,
    pub queues: ActionQueues,
    pub outstanding: VecDeque<OutstandingSend>,
    pub drain_required: bool,
    pub connect_callbacks: Vec<CompletionCallback>,
    pub disconnect_callbacks: Vec<CompletionCallback>,
    /// A connect arrived while stopping.
    pub connect_after_stop: bool,
    pub loops: Loops,
}

impl ClientCore {
    pub(crate) fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            state: ClientState::Stopped,
            service: None,
            first_start: true,
            generation: 0,
            transport_dirty: false,
            transport,
            subscriptions: Registry::default(),
            queues: ActionQueues::default(),
            outstanding: VecDeque::new(),
            drain_required: false,
            connect_callbacks: Vec::new(),
            disconnect_callbacks: Vec::new(),
            connect_after_stop: false,
            loops: Loops::default(),
        }
    }

    /// Connected, on the given connection.
    #[inline]
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.state == ClientState::Started && self.generation == generation
    }

    /// Connecting, on the given connect cycle.
    #[inline]
    pub(crate) fn is_connecting(&self, generation: u64) -> bool {
        matches!(self.state, ClientState::Starting | ClientState::Retrying)
            && self.generation == generation
    }

    /// Service URL while started; the empty string otherwise.
    #[inline]
    pub(crate) fn service_url(&self) -> &str {
        self.service.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// ClientInner
// ============================================================================

/// Shared client internals.
pub(crate) struct ClientInner {
    pub id: ClientId,
    pub resolver: ServiceResolver,
    pub tls: TlsOptions,
    pub retry_interval: Duration,
    pub poll_interval: Duration,
    pub replay_order: ReplayOrder,
    pub runtime: Handle,
    pub core: Mutex<ClientCore>,
    pub listeners: Arc<Listeners>,
    pub notifier: Notifier,
}

impl ClientInner {
    /// Queues an event for the listeners.
    pub(crate) fn emit(&self, event: ClientEvent) {
        let listeners = Arc::clone(&self.listeners);
        let id = self.id.clone();
        self.notifier
            .post(Box::new(move || listeners.dispatch(&id, &event)));
    }

    /// Queues a completion callback.
    pub(crate) fn complete(&self, callback: CompletionCallback, result: Result<()>) {
        self.notifier.post(Box::new(move || callback(result)));
    }
}

// ============================================================================
// Client
// ============================================================================

/// MQ Light messaging client.
///
/// Cloning is cheap; all clones drive the same connection.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder()
///     .service("amqp://localhost")
///     .transport(transport)
///     .connect()
///     .await?;
///
/// client.on(EventKind::Message, |event| {
///     if let ClientEvent::Message(delivery) = event {
///         println!("{}: {:?}", delivery.message.topic, delivery.message.body);
///     }
/// });
/// client.subscribe("news/#", SubscribeOptions::default(), None)?;
/// client.send("news/today", "hello", SendOptions::default(), None)?;
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("state", &core.state)
            .field("service", &core.service)
            .field("resolver", &self.inner.resolver)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Accessors
// ============================================================================

impl Client {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Returns the client id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.inner.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.inner.core.lock().state
    }

    /// Returns the connected endpoint URL while started.
    #[must_use]
    pub fn service(&self) -> Option<String> {
        self.inner.core.lock().service.clone()
    }

    /// Returns the active subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Destination> {
        self.inner.core.lock().subscriptions.destinations()
    }
}

// ============================================================================
// Client - Events
// ============================================================================

impl Client {
    /// Registers a listener for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        let id = self.inner.listeners.add(kind, handler);

        if matches!(kind, EventKind::Message | EventKind::Malformed) {
            let mut core = self.inner.core.lock();
            self.inner.ensure_dispatch(&mut core);
        }
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Connects a stopped client.
    ///
    /// On a client that is already started, starting or retrying the
    /// callback completes `Ok` without a new attempt. While stopping, the
    /// connect is performed once the stop completes.
    pub fn connect(&self, callback: Option<CompletionCallback>) {
        self.inner.request_connect(callback);
    }

    /// Awaitable form of [`Client::connect`].
    ///
    /// # Errors
    ///
    /// Returns the error the connect completed with.
    pub async fn connect_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.connect(Some(Box::new(move |result| {
            let _ = tx.send(result);
        })));
        rx.await?
    }

    /// Disconnects, failing queued operations with [`Error::Stopped`].
    ///
    /// Idempotent: on a stopped client the callback completes `Ok` and no
    /// event is emitted.
    ///
    /// [`Error::Stopped`]: crate::Error::Stopped
    pub fn disconnect(&self, callback: Option<CompletionCallback>) {
        self.inner.request_disconnect(callback);
    }

    /// Awaitable form of [`Client::disconnect`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the client was dropped mid-stop.
    pub async fn disconnect_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.disconnect(Some(Box::new(move |result| {
            let _ = tx.send(result);
        })));
        rx.await?
    }
}

// ============================================================================
// Client - Messaging
// ============================================================================

impl Client {
    /// Sends a message.
    ///
    /// Returns `Ok(true)` when the message went straight to the transport
    /// and `Ok(false)` when it was queued or the send backlog is building;
    /// in the latter case a [`ClientEvent::Drain`] follows once it clears.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty topic, a zero ttl, or
    ///   at-least-once without a callback
    /// - [`Error::Stopped`] when stopped or stopping
    ///
    /// [`Error::InvalidArgument`]: crate::Error::InvalidArgument
    /// [`Error::Stopped`]: crate::Error::Stopped
    pub fn send(
        &self,
        topic: &str,
        body: impl Into<Payload>,
        options: SendOptions,
        callback: Option<SendCallback>,
    ) -> Result<bool> {
        self.inner.send(topic, body.into(), options, callback)
    }

    /// Subscribes to a topic pattern.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty pattern or a bad share name
    /// - [`Error::Stopped`] when stopped or stopping
    /// - [`Error::Subscribed`] when already subscribed
    ///
    /// [`Error::InvalidArgument`]: crate::Error::InvalidArgument
    /// [`Error::Stopped`]: crate::Error::Stopped
    /// [`Error::Subscribed`]: crate::Error::Subscribed
    pub fn subscribe(
        &self,
        topic_pattern: &str,
        options: SubscribeOptions,
        callback: Option<SubscribeCallback>,
    ) -> Result<&Self> {
        self.inner.subscribe(topic_pattern, options, callback)?;
        Ok(self)
    }

    /// Unsubscribes from a topic pattern.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty pattern or non-zero ttl
    /// - [`Error::Stopped`] when stopped or stopping
    /// - [`Error::Unsubscribed`] when there is no such subscription
    ///
    /// [`Error::InvalidArgument`]: crate::Error::InvalidArgument
    /// [`Error::Stopped`]: crate::Error::Stopped
    /// [`Error::Unsubscribed`]: crate::Error::Unsubscribed
    pub fn unsubscribe(
        &self,
        topic_pattern: &str,
        options: UnsubscribeOptions,
        callback: Option<SubscribeCallback>,
    ) -> Result<&Self> {
        self.inner.unsubscribe(topic_pattern, options, callback)?;
        Ok(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_send_sync_clone() {
        fn assert_send_sync<T: Send + Sync>() {}
        fn assert_clone<T: Clone>() {}
        assert_send_sync::<Client>();
        assert_clone::<Client>();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ClientState::Starting.to_string(), "starting");
        assert_eq!(ClientState::Retrying.to_string(), "retrying");
        assert_eq!(ClientState::Stopped.to_string(), "stopped");
    }
}
