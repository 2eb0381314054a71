//! Action queues.
//!
//! Operations requested while the client is starting or retrying wait here
//! and are replayed after every successful connect: subscribes, then
//! unsubscribes, then sends, each popped in the configured
//! [`ReplayOrder`]. Replay stops as soon as the client leaves `Started`;
//! whatever is left waits for the next connect.
//!
//! An unsubscribe that arrives while its subscribe is still queued turns
//! both into no-ops: neither reaches the transport, both callbacks fire.
//! Subscriptions put back by a reconnect are marked `established`; they
//! exist on the service, so an unsubscribe for one is replayed for real.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::transport::Payload;

use super::core::{ClientCore, ClientInner, ClientState, SendCallback, SubscribeCallback};
use super::options::{ReplayOrder, SendOptions, SubscribeOptions, UnsubscribeOptions};
use super::subscription::Destination;

// ============================================================================
// Queued Records
// ============================================================================

/// Deferred subscribe.
pub(crate) struct QueuedSubscribe {
    pub destination: Destination,
    pub options: SubscribeOptions,
    pub callback: Option<SubscribeCallback>,
    pub noop: bool,
    /// Subscribed on an earlier connection.
    pub established: bool,
}

impl QueuedSubscribe {
    pub(crate) fn new(
        destination: Destination,
        options: SubscribeOptions,
        callback: Option<SubscribeCallback>,
    ) -> Self {
        Self {
            destination,
            options,
            callback,
            noop: false,
            established: false,
        }
    }

    /// A subscription restored after a connection loss.
    pub(crate) fn established(destination: Destination, options: SubscribeOptions) -> Self {
        Self {
            established: true,
            ..Self::new(destination, options, None)
        }
    }
}

/// Deferred unsubscribe.
pub(crate) struct QueuedUnsubscribe {
    pub destination: Destination,
    pub options: UnsubscribeOptions,
    pub callback: Option<SubscribeCallback>,
    pub noop: bool,
}

impl QueuedUnsubscribe {
    pub(crate) fn new(
        destination: Destination,
        options: UnsubscribeOptions,
        callback: Option<SubscribeCallback>,
    ) -> Self {
        Self {
            destination,
            options,
            callback,
            noop: false,
        }
    }
}

/// Deferred send.
pub(crate) struct QueuedSend {
    pub topic: String,
    pub body: Payload,
    pub options: SendOptions,
    /// Validated message ttl in milliseconds; zero for none.
    pub ttl: u32,
    pub callback: Option<SendCallback>,
}

// ============================================================================
// ActionQueues
// ============================================================================

/// The three replay queues, oldest entry at the front.
#[derive(Default)]
pub(crate) struct ActionQueues {
    pub subscribes: VecDeque<QueuedSubscribe>,
    pub unsubscribes: VecDeque<QueuedUnsubscribe>,
    pub sends: VecDeque<QueuedSend>,
}

impl ActionQueues {
    /// Queues a subscribe, returning the live entry it replaced.
    pub(crate) fn replace_subscribe(&mut self, op: QueuedSubscribe) -> Option<QueuedSubscribe> {
        let replaced = self
            .subscribes
            .iter()
            .position(|q| !q.noop && q.destination == op.destination)
            .and_then(|index| self.subscribes.remove(index));
        self.subscribes.push_back(op);
        replaced
    }

    /// Marks the live queued subscribe for `destination` as a no-op.
    /// Returns `false` if there is none; established entries are left
    /// alone.
    pub(crate) fn cancel_subscribe(&mut self, destination: &Destination) -> bool {
        match self
            .subscribes
            .iter_mut()
            .find(|q| !q.noop && !q.established && q.destination == *destination)
        {
            Some(queued) => {
                queued.noop = true;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `destination` waits to be restored.
    pub(crate) fn is_established(&self, destination: &Destination) -> bool {
        self.subscribes
            .iter()
            .any(|q| q.established && q.destination == *destination)
    }

    /// Returns `true` if a transport unsubscribe for `destination` is queued.
    pub(crate) fn unsubscribe_pending(&self, destination: &Destination) -> bool {
        self.unsubscribes
            .iter()
            .any(|q| !q.noop && q.destination == *destination)
    }

    /// Puts a subscribe back so that it is popped next.
    pub(crate) fn requeue_subscribe(&mut self, op: QueuedSubscribe, order: ReplayOrder) {
        push_next(&mut self.subscribes, op, order);
    }

    /// Puts an unsubscribe back so that it is popped next.
    pub(crate) fn requeue_unsubscribe(&mut self, op: QueuedUnsubscribe, order: ReplayOrder) {
        push_next(&mut self.unsubscribes, op, order);
    }

    /// Puts a send back so that it is popped next.
    pub(crate) fn requeue_send(&mut self, op: QueuedSend, order: ReplayOrder) {
        push_next(&mut self.sends, op, order);
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.subscribes.is_empty() && self.unsubscribes.is_empty() && self.sends.is_empty()
    }
}

fn pop_next<T>(queue: &mut VecDeque<T>, order: ReplayOrder) -> Option<T> {
    match order {
        ReplayOrder::Lifo => queue.pop_back(),
        ReplayOrder::Fifo => queue.pop_front(),
    }
}

fn push_next<T>(queue: &mut VecDeque<T>, item: T, order: ReplayOrder) {
    match order {
        ReplayOrder::Lifo => queue.push_back(item),
        ReplayOrder::Fifo => queue.push_front(item),
    }
}

// ============================================================================
// ClientInner - Replay
// ============================================================================

impl ClientInner {
    /// Replays queued operations while the client stays started.
    pub(crate) fn replay(self: &Arc<Self>, core: &mut ClientCore) {
        if core.queues.is_empty() {
            return;
        }
        debug!(
            client_id = %self.id,
            subscribes = core.queues.subscribes.len(),
            unsubscribes = core.queues.unsubscribes.len(),
            sends = core.queues.sends.len(),
            "Replaying queued operations"
        );

        let order = self.replay_order;
        while core.state == ClientState::Started {
            let Some(op) = pop_next(&mut core.queues.subscribes, order) else {
                break;
            };
            self.perform_subscribe(core, op);
        }
        while core.state == ClientState::Started {
            let Some(op) = pop_next(&mut core.queues.unsubscribes, order) else {
                break;
            };
            self.perform_unsubscribe(core, op);
        }
        while core.state == ClientState::Started {
            let Some(op) = pop_next(&mut core.queues.sends, order) else {
                break;
            };
            self.dispatch_send(core, op);
        }
    }

    /// Fails every queued operation that has a callback with a stopped
    /// error; the rest are dropped silently.
    pub(crate) fn flush_queues(&self, core: &mut ClientCore) {
        let queues = std::mem::take(&mut core.queues);

        for op in queues.subscribes.into_iter().filter(|op| op.callback.is_some()) {
            let err = Error::stopped(format!("subscribe to {} cancelled by stop", op.destination));
            self.complete_subscribe(op.callback, Err(err), op.destination);
        }
        for op in queues.unsubscribes.into_iter().filter(|op| op.callback.is_some()) {
            let err = Error::stopped(format!("unsubscribe from {} cancelled by stop", op.destination));
            self.complete_subscribe(op.callback, Err(err), op.destination);
        }
        for op in queues.sends.into_iter().filter(|op| op.callback.is_some()) {
            let err = Error::stopped(format!("send to '{}' cancelled by stop", op.topic));
            self.complete_send(op, Err(err));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(pattern: &str) -> QueuedSubscribe {
        QueuedSubscribe::new(
            Destination::new(pattern, None),
            SubscribeOptions::default(),
            None,
        )
    }

    fn patterns(queues: &ActionQueues) -> Vec<&str> {
        queues
            .subscribes
            .iter()
            .map(|q| q.destination.topic_pattern.as_str())
            .collect()
    }

    #[test]
    fn test_pop_order() {
        let mut queue: VecDeque<u32> = (1..=3).collect();
        assert_eq!(pop_next(&mut queue, ReplayOrder::Lifo), Some(3));
        assert_eq!(pop_next(&mut queue, ReplayOrder::Fifo), Some(1));
        assert_eq!(pop_next(&mut queue, ReplayOrder::Fifo), Some(2));
        assert_eq!(pop_next(&mut queue, ReplayOrder::Lifo), None);
    }

    #[test]
    fn test_requeue_is_popped_next() {
        for order in [ReplayOrder::Lifo, ReplayOrder::Fifo] {
            let mut queue: VecDeque<u32> = (1..=3).collect();
            let first = pop_next(&mut queue, order).unwrap();
            push_next(&mut queue, first, order);
            assert_eq!(pop_next(&mut queue, order), Some(first));
        }
    }

    #[test]
    fn test_replace_subscribe() {
        let mut queues = ActionQueues::default();
        assert!(queues.replace_subscribe(sub("a")).is_none());
        assert!(queues.replace_subscribe(sub("b")).is_none());
        assert!(queues.replace_subscribe(sub("a")).is_some());
        assert_eq!(patterns(&queues), vec!["b", "a"]);
    }

    #[test]
    fn test_cancel_subscribe() {
        let mut queues = ActionQueues::default();
        queues.replace_subscribe(sub("a"));

        assert!(queues.cancel_subscribe(&Destination::new("a", None)));
        assert!(queues.subscribes[0].noop);
        assert!(!queues.cancel_subscribe(&Destination::new("a", None)));
        assert!(!queues.cancel_subscribe(&Destination::new("a", Some("share".into()))));

        // A new subscribe after the cancellation is live again.
        assert!(queues.replace_subscribe(sub("a")).is_none());
        assert!(queues.cancel_subscribe(&Destination::new("a", None)));
        assert_eq!(queues.subscribes.len(), 2);
    }

    #[test]
    fn test_established_subscribe_is_not_cancelled() {
        let mut queues = ActionQueues::default();
        let destination = Destination::new("kept", None);
        queues.requeue_subscribe(
            QueuedSubscribe::established(destination.clone(), SubscribeOptions::default()),
            ReplayOrder::Lifo,
        );

        assert!(queues.is_established(&destination));
        assert!(!queues.cancel_subscribe(&destination));
        assert!(!queues.subscribes[0].noop);
        assert!(!queues.unsubscribe_pending(&destination));

        queues.unsubscribes.push_back(QueuedUnsubscribe::new(
            destination.clone(),
            UnsubscribeOptions::default(),
            None,
        ));
        assert!(queues.unsubscribe_pending(&destination));
    }

    #[test]
    fn test_is_empty() {
        let mut queues = ActionQueues::default();
        assert!(queues.is_empty());
        queues.sends.push_back(QueuedSend {
            topic: "t".into(),
            body: Payload::from("m"),
            options: SendOptions::default(),
            ttl: 0,
            callback: None,
        });
        assert!(!queues.is_empty());
    }
}
