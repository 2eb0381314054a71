//! Transport facade.
//!
//! The client drives an AMQP 1.0 messenger through the synchronous
//! [`Transport`] trait. Implementations own the wire protocol, TLS and
//! framing; the client only sequences calls and interprets their results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   Transport (sync)   ┌──────────────────────┐
//! │  Client              │─────────────────────►│  AMQP messenger      │
//! │  connect / retry     │  connect  put        │                      │
//! │  delivery tracker    │  status   settle     │  links, sessions,    │
//! │  dispatch loop       │  receive  flow       │  TLS, framing        │
//! └──────────────────────┘                      └──────────────────────┘
//! ```
//!
//! Every call is made with the client state lock held, so implementations
//! must not block for long.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Messages, payloads, statuses |
//! | `mock` | In-memory scripted transport |

// ============================================================================
// Submodules
// ============================================================================

/// Messages, payloads and delivery statuses.
pub mod message;

/// In-memory transport for tests and benchmarks.
pub mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::Result;
use crate::identifiers::DeliveryTag;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{
    Annotation, AnnotationValue, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, ConnectRequest,
    DeliveryStatus, InboundMessage, OutboundMessage, Payload, Qos, TlsOptions,
};
pub use mock::{MockCall, MockController, MockTransport, PutRecord};

// ============================================================================
// Transport
// ============================================================================

/// Synchronous messenger operations consumed by the client.
///
/// Errors should use [`Error::Network`](crate::Error::Network) for
/// connectivity problems, [`Error::Security`](crate::Error::Security) for
/// authentication or TLS failures and
/// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for rejected
/// arguments. Only the latter is treated as the caller's fault; everything
/// else makes the client reconnect.
pub trait Transport: Send + 'static {
    /// Opens a connection to a single endpoint.
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<()>;

    /// Stops the messenger. Returns `true` once fully stopped; the client
    /// keeps polling until then.
    fn stop(&mut self) -> bool;

    /// Queues a message for sending and returns its tracking tag.
    fn put(&mut self, message: OutboundMessage, qos: Qos) -> Result<DeliveryTag>;

    /// Pushes queued messages onto the wire.
    fn send_pending(&mut self) -> Result<()>;

    /// Current status of an outbound message.
    fn status(&mut self, tag: DeliveryTag) -> Result<DeliveryStatus>;

    /// Reason text for a failed outbound message, if the peer gave one.
    fn status_error(&mut self, tag: DeliveryTag) -> Option<String>;

    /// Accepts an inbound message.
    fn accept(&mut self, tag: DeliveryTag) -> Result<()>;

    /// Settles a message in either direction, releasing its resources.
    fn settle(&mut self, tag: DeliveryTag) -> Result<()>;

    /// Returns up to `max` received messages.
    fn receive(&mut self, max: usize) -> Result<Vec<InboundMessage>>;

    /// Opens a receiving link.
    fn subscribe(&mut self, address: &str, qos: Qos, ttl_secs: u64, credit: u32) -> Result<()>;

    /// Closes a receiving link.
    fn unsubscribe(&mut self, address: &str, ttl_secs: u64) -> Result<()>;

    /// Grants `credit` more messages on a receiving link.
    fn flow(&mut self, address: &str, credit: u32) -> Result<()>;

    /// Idle timeout advertised by the peer; zero disables heartbeats.
    fn remote_idle_timeout(&mut self, service: &str) -> Duration;

    /// Performs pending protocol work, waiting at most `timeout`.
    fn work(&mut self, timeout: Duration) -> Result<()>;

    /// Text of the most recent transport error, logged with connection
    /// failures.
    fn last_error_text(&self) -> Option<String>;
}
