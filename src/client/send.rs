//! Send path and delivery tracking.
//!
//! A started client hands each message to the transport and records it as
//! outstanding. The tracker loop polls outstanding sends in submission
//! order and completes each once its status is terminal:
//!
//! | Status | Outcome |
//! |--------|---------|
//! | `Accepted`, `Settled` | settled, callback `Ok` |
//! | `Unknown` (at-most-once) | callback `Ok` |
//! | `Rejected`, `Released`, `Modified`, `Aborted` | callback [`Error::Delivery`] |
//! | `Pending` | polled again next tick |
//!
//! Delivery outcome errors are never retried. A transport failure while
//! polling reconnects: at-least-once sends go back to the send queue,
//! at-most-once sends fail.

// ============================================================================
// Imports
// ============================================================================

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::DeliveryTag;
use crate::transport::{DeliveryStatus, OutboundMessage, Payload, Qos};

use super::core::{ClientCore, ClientInner, ClientState, SendCallback, SentMessage};
use super::events::ClientEvent;
use super::options::{SendOptions, validate_topic};
use super::queue::QueuedSend;
use super::schedule::TaskHandle;

// ============================================================================
// Constants
// ============================================================================

/// More outstanding sends than this signals backpressure.
const BACKLOG_THRESHOLD: usize = 1;

// ============================================================================
// OutstandingSend
// ============================================================================

/// A send handed to the transport, awaiting its terminal status.
pub(crate) struct OutstandingSend {
    pub tag: DeliveryTag,
    pub op: QueuedSend,
}

// ============================================================================
// ClientInner - Send
// ============================================================================

impl ClientInner {
    pub(crate) fn send(
        self: &Arc<Self>,
        topic: &str,
        body: Payload,
        options: SendOptions,
        callback: Option<SendCallback>,
    ) -> Result<bool> {
        validate_topic("send", topic)?;
        let ttl = options.validate(callback.is_some())?;

        let op = QueuedSend {
            topic: topic.to_string(),
            body,
            options,
            ttl,
            callback,
        };
        let mut guard = self.core.lock();
        let core = &mut *guard;

        match core.state {
            ClientState::Stopped | ClientState::Stopping => Err(Error::stopped(format!(
                "cannot send to '{topic}' while the client is {}",
                core.state
            ))),
            ClientState::Starting | ClientState::Retrying => {
                trace!(client_id = %self.id, topic = %topic, "Queueing send");
                core.queues.sends.push_back(op);
                core.drain_required = true;
                Ok(false)
            }
            ClientState::Started => Ok(self.dispatch_send(core, op)),
        }
    }

    /// Puts a message on the transport; the client must be started.
    ///
    /// Returns `false` when the send backlog is building.
    pub(crate) fn dispatch_send(self: &Arc<Self>, core: &mut ClientCore, op: QueuedSend) -> bool {
        let address = format!("{}/{}", core.service_url(), op.topic);
        let message = OutboundMessage::new(address, &op.body).with_ttl(op.ttl);

        let put = core
            .transport
            .put(message, op.options.qos)
            .and_then(|tag| core.transport.send_pending().map(|()| tag));

        match put {
            Ok(tag) => {
                trace!(client_id = %self.id, topic = %op.topic, %tag, "Message sent");
                let backlog = core.outstanding.len() > BACKLOG_THRESHOLD;
                core.outstanding.push_back(OutstandingSend { tag, op });
                self.ensure_tracker(core);
                if backlog {
                    core.drain_required = true;
                }
                !backlog
            }
            Err(err) if err.is_input_error() => {
                self.complete_send(op, Err(err));
                false
            }
            Err(err) => {
                match op.options.qos {
                    Qos::AtLeastOnce => core.queues.requeue_send(op, self.replay_order),
                    Qos::AtMostOnce => self.complete_send(op, Err(err.clone())),
                }
                core.drain_required = true;
                self.reconnect(core, err);
                false
            }
        }
    }

    /// Queues the send callback, or an error event if there is none.
    pub(crate) fn complete_send(&self, op: QueuedSend, result: Result<()>) {
        let QueuedSend {
            topic,
            body,
            options,
            callback,
            ..
        } = op;

        match callback {
            Some(callback) => {
                let sent = SentMessage {
                    topic,
                    body,
                    options,
                };
                self.notifier.post(Box::new(move || callback(result, sent)));
            }
            None => {
                if let Err(err) = result {
                    self.emit(ClientEvent::Error(err));
                }
            }
        }
    }
}

// ============================================================================
// ClientInner - Delivery Tracker
// ============================================================================

impl ClientInner {
    /// Starts the tracker loop if it is not running.
    pub(crate) fn ensure_tracker(self: &Arc<Self>, core: &mut ClientCore) {
        if core.loops.tracker.is_some() || core.outstanding.is_empty() {
            return;
        }
        let generation = core.generation;
        core.loops.tracker = Some(TaskHandle::every(
            &self.runtime,
            self.poll_interval,
            Arc::downgrade(self),
            move |inner: &Arc<Self>| inner.track_sends(generation),
        ));
    }

    fn track_sends(self: &Arc<Self>, generation: u64) -> ControlFlow<()> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if !core.is_live(generation) {
            return ControlFlow::Break(());
        }

        loop {
            let Some((tag, qos)) = core.outstanding.front().map(|s| (s.tag, s.op.options.qos)) else {
                core.loops.tracker = None;
                return ControlFlow::Break(());
            };

            let status = match core.transport.status(tag) {
                Ok(status) => status,
                Err(err) if err.is_input_error() => {
                    debug!(client_id = %self.id, %tag, error = %err, "Send status refused");
                    if let Some(send) = core.outstanding.pop_front() {
                        self.send_completed(core, send.op, Err(err));
                    }
                    continue;
                }
                Err(err) => {
                    self.reconnect(core, err);
                    return ControlFlow::Break(());
                }
            };

            let outcome = match status {
                DeliveryStatus::Accepted | DeliveryStatus::Settled => Ok(()),
                DeliveryStatus::Unknown if qos == Qos::AtMostOnce => Ok(()),
                DeliveryStatus::Pending | DeliveryStatus::Unknown => return ControlFlow::Continue(()),
                DeliveryStatus::Rejected
                | DeliveryStatus::Released
                | DeliveryStatus::Modified
                | DeliveryStatus::Aborted => {
                    let reason = core
                        .transport
                        .status_error(tag)
                        .unwrap_or_else(|| format!("send failed - message was {status}"));
                    Err(Error::delivery(status, reason))
                }
            };

            if outcome.is_ok()
                && let Err(err) = core.transport.settle(tag)
            {
                debug!(client_id = %self.id, %tag, error = %err, "Settle after send failed");
            }

            let Some(send) = core.outstanding.pop_front() else {
                continue;
            };
            debug!(client_id = %self.id, topic = %send.op.topic, %status, "Send complete");
            self.send_completed(core, send.op, outcome);
        }
    }

    /// Completes a send that left the outstanding list, emitting `Drain`
    /// first if the backlog has cleared.
    fn send_completed(&self, core: &mut ClientCore, op: QueuedSend, outcome: Result<()>) {
        if core.drain_required && core.outstanding.len() <= BACKLOG_THRESHOLD {
            core.drain_required = false;
            self.emit(ClientEvent::Drain);
        }
        self.complete_send(op, outcome);
    }

    /// Hands outstanding sends back for replay after a connection loss.
    pub(crate) fn abandon_outstanding(&self, core: &mut ClientCore, cause: &Error) {
        let outstanding: Vec<_> = core.outstanding.drain(..).collect();
        for send in outstanding {
            match send.op.options.qos {
                Qos::AtLeastOnce => core.queues.sends.push_back(send.op),
                Qos::AtMostOnce => self.complete_send(send.op, Err(cause.clone())),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
