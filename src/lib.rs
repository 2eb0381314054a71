//! MQ Light - messaging client over an AMQP 1.0 transport.
//!
//! This library keeps a client connected to an MQ Light service and
//! coordinates everything around the wire protocol: the connection state
//! machine, operations queued while disconnected, subscription credit and
//! delivery confirmation.
//!
//! # Architecture
//!
//! The wire protocol lives behind the [`Transport`] trait. The client drives
//! it from a handful of background tasks:
//!
//! - **Connect**: resolves the service, tries each endpoint, retries
//! - **Heartbeat**: keeps an idle connection alive
//! - **Tracker**: completes sends once the transport reports an outcome
//! - **Dispatch**: polls for inbound messages and emits them as events
//!
//! Operations issued while the client is connecting are queued and replayed
//! once it connects; a lost connection re-queues active subscriptions and
//! unconfirmed at-least-once sends.
//!
//! # Quick Start
//!
//! ```ignore
//! use mqlight::{Client, ClientEvent, EventKind, Result, SendOptions, SubscribeOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .service("amqp://localhost")
//!         .transport(my_transport())
//!         .connect()
//!         .await?;
//!
//!     client.on(EventKind::Message, |event| {
//!         if let ClientEvent::Message(delivery) = event {
//!             println!("{}: {:?}", delivery.message.topic, delivery.message.body);
//!         }
//!     });
//!     client.subscribe("news/#", SubscribeOptions::default(), None)?;
//!     client.send("news/today", "hello", SendOptions::default(), None)?;
//!
//!     client.disconnect_async().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`], its builder, options and events |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Client ids and transport handles |
//! | [`service`] | Service URLs, credentials and lookup |
//! | [`transport`] | [`Transport`] trait, message types and [`MockTransport`] |

// ============================================================================
// Modules
// ============================================================================

/// Messaging client.
///
/// Use [`Client::builder()`] to create one.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Service resolution.
///
/// Turns a service URL, list or lookup into candidate endpoints.
pub mod service;

/// AMQP transport abstraction.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    Client, ClientBuilder, ClientEvent, ClientState, CompletionCallback, Delivery, Destination,
    EventKind, Malformed, Message, ReplayOrder, SendCallback, SendOptions, SentMessage,
    SubscribeCallback, SubscribeOptions, UnsubscribeOptions,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ClientId, DeliveryTag, ListenerId};

// Service types
pub use service::{Credentials, Service};

// Transport types
pub use transport::{
    DeliveryStatus, InboundMessage, MockController, MockTransport, OutboundMessage, Payload,
    Qos, Transport,
};
