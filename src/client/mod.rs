//! Messaging client.
//!
//! | Module | Concern |
//! |--------|---------|
//! | `core` | [`Client`] handle, shared state, [`ClientState`] |
//! | `builder` | [`ClientBuilder`] configuration |
//! | `connection` | connect, retry, reconnect and stop |
//! | `queue` | operations waiting for a connection, and their replay |
//! | `subscription` | active subscriptions and credit flow |
//! | `send` | sends and the delivery tracker |
//! | `dispatch` | inbound message loop |
//! | `delivery` | [`Delivery`] handed to message listeners |
//! | `events` | [`ClientEvent`] and listener notification |
//! | `schedule` | background task handles |

// ============================================================================
// Modules
// ============================================================================

mod builder;
mod connection;
mod core;
mod delivery;
mod dispatch;
mod events;
mod options;
mod queue;
mod schedule;
mod send;
mod subscription;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{ClientBuilder, DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_INTERVAL};
pub use self::core::{
    Client, ClientState, CompletionCallback, SendCallback, SentMessage, SubscribeCallback,
};
pub use delivery::{Delivery, Malformed, Message, Mqmd};
pub use dispatch::RECEIVE_BATCH;
pub use events::{ClientEvent, EventHandler, EventKind};
pub use options::{
    DEFAULT_CREDIT, MAX_TTL, ReplayOrder, SendOptions, SubscribeOptions, UnsubscribeOptions,
};
pub use subscription::Destination;
