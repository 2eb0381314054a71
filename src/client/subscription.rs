//! Subscription registry and credit flow.
//!
//! Each active subscription counts messages received but not yet confirmed
//! (`unconfirmed`) and confirmed since the last flow (`confirmed`). After a
//! confirmation, more credit is granted when
//!
//! ```text
//! (credit - unconfirmed) / confirmed <= 1.25   or   unconfirmed == 0 && confirmed > 0
//! ```
//!
//! The grant equals `confirmed`, which then resets to zero.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Qos;

use super::core::{ClientCore, ClientInner, ClientState, SubscribeCallback};
use super::events::ClientEvent;
use super::options::{SubscribeOptions, UnsubscribeOptions, validate_topic};
use super::queue::{QueuedSubscribe, QueuedUnsubscribe};

// ============================================================================
// Constants
// ============================================================================

/// Credit is replenished once the remaining window per confirmed message
/// drops to this ratio.
const FLOW_RATIO: f64 = 1.25;

// ============================================================================
// Destination
// ============================================================================

/// A subscribed topic pattern, optionally shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Topic pattern.
    pub topic_pattern: String,
    /// Share name; `None` for a private subscription.
    pub share: Option<String>,
}

impl Destination {
    /// Creates a destination.
    #[must_use]
    pub fn new(topic_pattern: impl Into<String>, share: Option<String>) -> Self {
        Self {
            topic_pattern: topic_pattern.into(),
            share,
        }
    }

    /// Link address: `share:<name>:<pattern>` or `private:<pattern>`.
    #[must_use]
    pub fn link_address(&self) -> String {
        match &self.share {
            Some(share) => format!("share:{share}:{}", self.topic_pattern),
            None => format!("private:{}", self.topic_pattern),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.link_address())
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// An active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subscription {
    pub destination: Destination,
    /// `service + '/' + link address`, as handed to the transport.
    pub address: String,
    pub link_address: String,
    pub qos: Qos,
    pub auto_confirm: bool,
    pub ttl_secs: u64,
    pub credit: u32,
    pub unconfirmed: u32,
    pub confirmed: u32,
}

impl Subscription {
    pub(crate) fn new(service: &str, destination: Destination, options: &SubscribeOptions) -> Self {
        let link_address = destination.link_address();
        Self {
            address: format!("{service}/{link_address}"),
            link_address,
            destination,
            qos: options.qos,
            auto_confirm: options.auto_confirm,
            ttl_secs: options.ttl_secs(),
            credit: options.credit,
            unconfirmed: 0,
            confirmed: 0,
        }
    }

    /// Options that recreate this subscription on replay.
    pub(crate) fn options(&self) -> SubscribeOptions {
        SubscribeOptions {
            share: self.destination.share.clone(),
            qos: self.qos,
            auto_confirm: self.auto_confirm,
            ttl: self.ttl_secs.saturating_mul(1000),
            credit: self.credit,
        }
    }

    /// Counts a received message.
    #[inline]
    pub(crate) fn record_received(&mut self) {
        self.unconfirmed = self.unconfirmed.saturating_add(1);
    }

    /// Counts a confirmation and returns the credit to grant, if due.
    pub(crate) fn record_confirmed(&mut self) -> Option<u32> {
        self.unconfirmed = self.unconfirmed.saturating_sub(1);
        self.confirmed = self.confirmed.saturating_add(1);

        if self.flow_due() {
            Some(std::mem::take(&mut self.confirmed))
        } else {
            None
        }
    }

    fn flow_due(&self) -> bool {
        if self.confirmed == 0 {
            return false;
        }
        if self.unconfirmed == 0 {
            return true;
        }
        let window = f64::from(self.credit) - f64::from(self.unconfirmed);
        window / f64::from(self.confirmed) <= FLOW_RATIO
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Active subscriptions, unique by destination, in subscribe order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Vec<Subscription>,
}

impl Registry {
    /// Inserts, replacing any subscription for the same destination.
    pub(crate) fn insert(&mut self, subscription: Subscription) {
        match self.position(&subscription.destination) {
            Some(index) => self.entries[index] = subscription,
            None => self.entries.push(subscription),
        }
    }

    pub(crate) fn remove(&mut self, destination: &Destination) -> Option<Subscription> {
        self.position(destination).map(|index| self.entries.remove(index))
    }

    pub(crate) fn contains(&self, destination: &Destination) -> bool {
        self.position(destination).is_some()
    }

    pub(crate) fn get_mut(&mut self, destination: &Destination) -> Option<&mut Subscription> {
        self.entries
            .iter_mut()
            .find(|entry| entry.destination == *destination)
    }

    /// Indices of subscriptions whose link address equals `link_address`.
    pub(crate) fn matching(&self, link_address: &str) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.link_address == link_address)
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn get_index_mut(&mut self, index: usize) -> Option<&mut Subscription> {
        self.entries.get_mut(index)
    }

    pub(crate) fn destinations(&self) -> Vec<Destination> {
        self.entries.iter().map(|e| e.destination.clone()).collect()
    }

    /// Removes and returns every subscription.
    pub(crate) fn drain(&mut self) -> Vec<Subscription> {
        std::mem::take(&mut self.entries)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, destination: &Destination) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.destination == *destination)
    }
}

// ============================================================================
// ClientInner - Subscribe
// ============================================================================

impl ClientInner {
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        topic_pattern: &str,
        options: SubscribeOptions,
        callback: Option<SubscribeCallback>,
    ) -> Result<()> {
        validate_topic("subscribe", topic_pattern)?;
        options.validate()?;

        let destination = Destination::new(topic_pattern, options.share.clone());
        let mut guard = self.core.lock();
        let core = &mut *guard;

        match core.state {
            ClientState::Stopped | ClientState::Stopping => Err(Error::stopped(format!(
                "cannot subscribe to {destination} while the client is {}",
                core.state
            ))),
            ClientState::Started => {
                if core.subscriptions.contains(&destination) {
                    return Err(Error::subscribed(format!(
                        "client already has a subscription to {destination}"
                    )));
                }
                self.perform_subscribe(core, QueuedSubscribe::new(destination, options, callback));
                Ok(())
            }
            ClientState::Starting | ClientState::Retrying => {
                if core.queues.is_established(&destination) {
                    return Err(Error::subscribed(format!(
                        "client already has a subscription to {destination}"
                    )));
                }
                debug!(client_id = %self.id, destination = %destination, "Queueing subscribe");
                let op = QueuedSubscribe::new(destination, options, callback);
                if let Some(replaced) = core.queues.replace_subscribe(op) {
                    let destination = replaced.destination.clone();
                    self.complete_subscribe(
                        replaced.callback,
                        Err(Error::subscribed(format!(
                            "queued subscription to {destination} was replaced"
                        ))),
                        destination,
                    );
                }
                Ok(())
            }
        }
    }

    /// Subscribes on the transport; the client must be started.
    pub(crate) fn perform_subscribe(self: &Arc<Self>, core: &mut ClientCore, op: QueuedSubscribe) {
        if op.noop {
            self.complete_subscribe(op.callback, Ok(()), op.destination);
            return;
        }

        let subscription = Subscription::new(core.service_url(), op.destination.clone(), &op.options);
        let result = core.transport.subscribe(
            &subscription.address,
            subscription.qos,
            subscription.ttl_secs,
            subscription.credit,
        );

        match result {
            Ok(()) => {
                debug!(
                    client_id = %self.id,
                    address = %subscription.address,
                    credit = subscription.credit,
                    "Subscribed"
                );
                core.subscriptions.insert(subscription);
                self.ensure_dispatch(core);
                self.complete_subscribe(op.callback, Ok(()), op.destination);
            }
            Err(err) if err.is_input_error() => {
                self.complete_subscribe(op.callback, Err(err), op.destination);
            }
            Err(err) => {
                core.queues.requeue_subscribe(op, self.replay_order);
                self.reconnect(core, err);
            }
        }
    }

    pub(crate) fn complete_subscribe(
        &self,
        callback: Option<SubscribeCallback>,
        result: Result<()>,
        destination: Destination,
    ) {
        match callback {
            Some(callback) => self
                .notifier
                .post(Box::new(move || callback(result, destination))),
            None => {
                if let Err(err) = result {
                    self.emit(ClientEvent::Error(err));
                }
            }
        }
    }
}

// ============================================================================
// ClientInner - Unsubscribe
// ============================================================================

impl ClientInner {
    pub(crate) fn unsubscribe(
        self: &Arc<Self>,
        topic_pattern: &str,
        options: UnsubscribeOptions,
        callback: Option<SubscribeCallback>,
    ) -> Result<()> {
        validate_topic("unsubscribe", topic_pattern)?;
        options.validate()?;

        let destination = Destination::new(topic_pattern, options.share.clone());
        let mut guard = self.core.lock();
        let core = &mut *guard;

        match core.state {
            ClientState::Stopped | ClientState::Stopping => Err(Error::stopped(format!(
                "cannot unsubscribe from {destination} while the client is {}",
                core.state
            ))),
            ClientState::Started => {
                if !core.subscriptions.contains(&destination) {
                    return Err(not_subscribed(&destination));
                }
                self.perform_unsubscribe(
                    core,
                    QueuedUnsubscribe::new(destination, options, callback),
                );
                Ok(())
            }
            ClientState::Starting | ClientState::Retrying => {
                let mut op = QueuedUnsubscribe::new(destination, options, callback);
                if core.queues.cancel_subscribe(&op.destination) {
                    debug!(
                        client_id = %self.id,
                        destination = %op.destination,
                        "Cancelled queued subscribe"
                    );
                    op.noop = true;
                } else if core.queues.is_established(&op.destination)
                    && !core.queues.unsubscribe_pending(&op.destination)
                {
                    debug!(client_id = %self.id, destination = %op.destination, "Queueing unsubscribe");
                } else {
                    return Err(not_subscribed(&op.destination));
                }
                core.queues.unsubscribes.push_back(op);
                Ok(())
            }
        }
    }

    /// Unsubscribes on the transport; the client must be started.
    pub(crate) fn perform_unsubscribe(self: &Arc<Self>, core: &mut ClientCore, op: QueuedUnsubscribe) {
        if op.noop {
            self.complete_subscribe(op.callback, Ok(()), op.destination);
            return;
        }
        let Some(address) = core
            .subscriptions
            .get_mut(&op.destination)
            .map(|s| s.address.clone())
        else {
            let err = not_subscribed(&op.destination);
            self.complete_subscribe(op.callback, Err(err), op.destination);
            return;
        };

        match core.transport.unsubscribe(&address, 0) {
            Ok(()) => {
                debug!(client_id = %self.id, address = %address, "Unsubscribed");
                core.subscriptions.remove(&op.destination);
                self.complete_subscribe(op.callback, Ok(()), op.destination);
            }
            Err(err) if err.is_input_error() => {
                self.complete_subscribe(op.callback, Err(err), op.destination);
            }
            Err(err) => {
                core.queues.requeue_unsubscribe(op, self.replay_order);
                self.reconnect(core, err);
            }
        }
    }
}

fn not_subscribed(destination: &Destination) -> Error {
    Error::unsubscribed(format!("client is not subscribed to {destination}"))
}

// ============================================================================
// Tests
// ============================================================================
