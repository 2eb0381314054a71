//! Inbound message deliveries.
//!
//! Each message received for a subscription is handed to listeners as a
//! [`Delivery`]. Deliveries on at-least-once subscriptions created with
//! `auto_confirm(false)` carry a confirmation handle: the message counts
//! against the subscription's credit until [`Delivery::confirm`] is called.
//!
//! # Example
//!
//! ```ignore
//! client.on(EventKind::Message, |event| {
//!     if let ClientEvent::Message(delivery) = event {
//!         process(&delivery.message);
//!         delivery.confirm().ok();
//!     }
//! });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::identifiers::DeliveryTag;
use crate::transport::{Annotation, Payload};

use super::core::{ClientCore, ClientInner};
use super::subscription::Destination;

// ============================================================================
// Constants
// ============================================================================

/// Annotation keys set by the service on malformed messages.
pub(crate) mod annotation {
    pub const CONDITION: &str = "x-opt-message-malformed-condition";
    pub const DESCRIPTION: &str = "x-opt-message-malformed-description";
    pub const CODED_CHAR_SET_ID: &str = "x-opt-message-malformed-MQMD.CodedCharSetId";
    pub const FORMAT: &str = "x-opt-message-malformed-MQMD.Format";
}

// ============================================================================
// Message
// ============================================================================

/// A received message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Decoded body.
    pub body: Payload,
    /// Topic the message was published to.
    pub topic: String,
    /// Remaining time to live in milliseconds.
    pub ttl: Option<u64>,
}

// ============================================================================
// Malformed
// ============================================================================

/// MQ message descriptor fields reported for a malformed message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mqmd {
    /// Coded character set id of the original message.
    pub coded_char_set_id: Option<i64>,
    /// MQ format name of the original message.
    pub format: Option<String>,
}

/// Why the service flagged a message as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Malformed {
    /// Condition name, e.g. `PAYLOADNOTAMQP`.
    pub condition: String,
    /// Human readable description.
    pub description: Option<String>,
    /// Descriptor of the original MQ message.
    pub mqmd: Mqmd,
}

impl Malformed {
    /// Parses malformed annotations; `None` unless a condition is present.
    pub(crate) fn from_annotations(annotations: &[Annotation]) -> Option<Self> {
        let find = |key: &str| annotations.iter().find(|a| a.key == key).map(|a| &a.value);

        let condition = find(annotation::CONDITION)?.as_str()?.to_string();
        Some(Self {
            condition,
            description: find(annotation::DESCRIPTION)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            mqmd: Mqmd {
                coded_char_set_id: find(annotation::CODED_CHAR_SET_ID).and_then(|v| v.as_int()),
                format: find(annotation::FORMAT)
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
        })
    }
}

// ============================================================================
// Confirmation
// ============================================================================

/// Shared between clones of a delivery so a confirm happens at most once.
#[derive(Debug)]
struct ConfirmState {
    client: Weak<ClientInner>,
    generation: u64,
    tag: DeliveryTag,
    destination: Destination,
    done: AtomicBool,
}

/// Handle that confirms one at-least-once message.
#[derive(Debug, Clone)]
pub(crate) struct Confirmation(Arc<ConfirmState>);

impl Confirmation {
    pub(crate) fn new(
        client: &Arc<ClientInner>,
        generation: u64,
        tag: DeliveryTag,
        destination: Destination,
    ) -> Self {
        Self(Arc::new(ConfirmState {
            client: Arc::downgrade(client),
            generation,
            tag,
            destination,
            done: AtomicBool::new(false),
        }))
    }

    fn confirm(&self) -> Result<()> {
        let state = &self.0;
        if self.is_done() {
            return Ok(());
        }
        let Some(client) = state.client.upgrade() else {
            state.done.store(true, Ordering::Release);
            return Ok(());
        };

        let mut guard = client.core.lock();
        let core = &mut *guard;
        if self.is_done() {
            return Ok(());
        }
        if !core.is_live(state.generation) {
            trace!(client_id = %client.id, tag = %state.tag, "Confirm after reconnect ignored");
            state.done.store(true, Ordering::Release);
            return Ok(());
        }

        match client.settle_delivery(core, state.tag, &state.destination, false) {
            Ok(()) => {
                state.done.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) if err.is_input_error() => Err(err),
            Err(err) => {
                client.reconnect(core, err.clone());
                Err(err)
            }
        }
    }

    fn is_done(&self) -> bool {
        self.0.done.load(Ordering::Acquire)
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// A message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The message.
    pub message: Message,
    /// Subscription it arrived on.
    pub destination: Destination,
    /// Present if the service flagged the message as malformed.
    pub malformed: Option<Malformed>,
    pub(crate) confirmation: Option<Confirmation>,
}

impl Delivery {
    /// Returns `true` while the message still awaits [`Delivery::confirm`].
    #[must_use]
    pub fn needs_confirmation(&self) -> bool {
        self.confirmation.as_ref().is_some_and(|c| !c.is_done())
    }

    /// Confirms receipt, releasing one unit of subscription credit.
    ///
    /// A no-op for automatically confirmed messages, once confirmed, and
    /// after the connection the message arrived on has been lost.
    ///
    /// # Errors
    ///
    /// Returns the transport error if settling the message fails. A
    /// connection failure also makes the client reconnect; the service
    /// then redelivers the message.
    pub fn confirm(&self) -> Result<()> {
        match &self.confirmation {
            Some(confirmation) => confirmation.confirm(),
            None => Ok(()),
        }
    }
}

// ============================================================================
// ClientInner - Settlement
// ============================================================================

impl ClientInner {
    /// Settles a received message and replenishes credit when due.
    ///
    /// An error from the transport means nothing was settled, unless it is
    /// a connection failure during the flow.
    pub(crate) fn settle_delivery(
        &self,
        core: &mut ClientCore,
        tag: DeliveryTag,
        destination: &Destination,
        accept: bool,
    ) -> Result<()> {
        if accept {
            core.transport.accept(tag)?;
        }
        core.transport.settle(tag)?;

        let Some(subscription) = core.subscriptions.get_mut(destination) else {
            return Ok(());
        };
        let Some(credit) = subscription.record_confirmed() else {
            return Ok(());
        };
        let address = subscription.address.clone();
        debug!(client_id = %self.id, address = %address, credit, "Replenishing credit");
        match core.transport.flow(&address, credit) {
            // The message is settled either way.
            Err(err) if err.is_input_error() => {
                warn!(client_id = %self.id, address = %address, error = %err, "Flow refused");
                Ok(())
            }
            result => result,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
