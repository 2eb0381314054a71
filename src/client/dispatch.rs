//! Message dispatch loop.
//!
//! While the client is started and has at least one subscription, a loop
//! polls the transport every `poll_interval` and turns each inbound message
//! into a [`Delivery`] event. Nothing is received until a `Message`
//! listener is registered; malformed messages additionally need a
//! `Malformed` listener.
//!
//! Messages are matched to subscriptions by link address. A message that
//! matches no subscription, or several, is settled and reported as an
//! internal error; the loop carries on.

// ============================================================================
// Imports
// ============================================================================

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{error, trace, warn};
use url::Url;

use crate::error::Error;
use crate::transport::{InboundMessage, Payload, Qos};

use super::core::{ClientCore, ClientInner, ClientState};
use super::delivery::{Confirmation, Delivery, Malformed, Message};
use super::events::{ClientEvent, EventKind};
use super::schedule::TaskHandle;

// ============================================================================
// Constants
// ============================================================================

/// Messages taken from the transport per poll.
pub const RECEIVE_BATCH: usize = 50;

// ============================================================================
// ClientInner - Dispatch
// ============================================================================

impl ClientInner {
    /// Starts the dispatch loop if it should be running and is not.
    pub(crate) fn ensure_dispatch(self: &Arc<Self>, core: &mut ClientCore) {
        if core.state != ClientState::Started
            || core.subscriptions.is_empty()
            || core.loops.dispatch.is_some()
        {
            return;
        }
        let generation = core.generation;
        trace!(client_id = %self.id, "Starting dispatch loop");
        core.loops.dispatch = Some(TaskHandle::every(
            &self.runtime,
            self.poll_interval,
            Arc::downgrade(self),
            move |inner: &Arc<Self>| inner.poll_messages(generation),
        ));
    }

    fn poll_messages(self: &Arc<Self>, generation: u64) -> ControlFlow<()> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if !core.is_live(generation) {
            return ControlFlow::Break(());
        }
        if core.subscriptions.is_empty() {
            core.loops.dispatch = None;
            return ControlFlow::Break(());
        }
        // Without a message listener a received message has nowhere to go.
        if !self.listeners.has(EventKind::Message) {
            return ControlFlow::Continue(());
        }

        let messages = match core.transport.receive(RECEIVE_BATCH) {
            Ok(messages) => messages,
            Err(err) => {
                self.reconnect(core, err);
                return ControlFlow::Break(());
            }
        };
        for message in messages {
            self.deliver(core, generation, message);
            if !core.is_live(generation) {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn deliver(self: &Arc<Self>, core: &mut ClientCore, generation: u64, inbound: InboundMessage) {
        let matches = core.subscriptions.matching(&inbound.link_address);
        let subscription = match matches.as_slice() {
            [index] => core.subscriptions.get_index_mut(*index),
            _ => None,
        };
        let Some(subscription) = subscription else {
            error!(
                client_id = %self.id,
                link_address = %inbound.link_address,
                matches = matches.len(),
                "Message does not match exactly one subscription"
            );
            if let Err(err) = core.transport.settle(inbound.tag) {
                warn!(client_id = %self.id, error = %err, "Settle of unmatched message failed");
            }
            self.emit(ClientEvent::Error(Error::internal(format!(
                "received message on '{}' matching {} subscriptions",
                inbound.link_address,
                matches.len()
            ))));
            return;
        };

        subscription.record_received();
        let destination = subscription.destination.clone();
        let qos = subscription.qos;
        let auto_confirm = qos == Qos::AtMostOnce || subscription.auto_confirm;

        let malformed = Malformed::from_annotations(&inbound.delivery_annotations);
        if malformed.is_some() && !self.listeners.has(EventKind::Malformed) {
            error!(
                client_id = %self.id,
                address = %inbound.address,
                "Malformed message with no malformed listener"
            );
            if let Err(err) = self.settle_delivery(core, inbound.tag, &destination, false) {
                warn!(client_id = %self.id, error = %err, "Settle of malformed message failed");
            }
            self.emit(ClientEvent::Error(Error::internal(format!(
                "no listener for malformed message on '{}'",
                inbound.address
            ))));
            return;
        }

        let message = Message {
            body: Payload::decode(inbound.body, inbound.content_type.as_deref()),
            topic: topic_of(core.service_url(), &inbound.address),
            ttl: (inbound.ttl > 0).then_some(inbound.ttl),
        };

        let confirmation = if auto_confirm {
            match self.settle_delivery(core, inbound.tag, &destination, qos == Qos::AtMostOnce) {
                Ok(()) => {}
                Err(err) if err.is_input_error() => {
                    warn!(client_id = %self.id, error = %err, "Settle of delivered message refused");
                    self.emit(ClientEvent::Error(err));
                }
                Err(err) => {
                    self.reconnect(core, err);
                    return;
                }
            }
            None
        } else {
            Some(Confirmation::new(self, generation, inbound.tag, destination.clone()))
        };

        trace!(client_id = %self.id, topic = %message.topic, "Delivering message");
        let delivery = Delivery {
            message,
            destination,
            malformed,
            confirmation,
        };
        let event = if delivery.malformed.is_some() {
            ClientEvent::Malformed(delivery)
        } else {
            ClientEvent::Message(delivery)
        };
        self.emit(event);
    }
}

/// Topic of an inbound message: the address without the service prefix,
/// or the URL path for addresses on another host.
fn topic_of(service: &str, address: &str) -> String {
    if !service.is_empty()
        && let Some(topic) = address
            .strip_prefix(service)
            .and_then(|rest| rest.strip_prefix('/'))
    {
        return topic.to_string();
    }
    match Url::parse(address) {
        Ok(url) => url.path().trim_start_matches('/').to_string(),
        Err(_) => address.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::client::testing::{started_client, wait_for};
    use crate::client::{Delivery, SubscribeOptions};
    use crate::transport::{Annotation, AnnotationValue, MockCall};

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event timed out")
            .expect("channel closed")
    }

    fn message_channel(client: &crate::Client) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(EventKind::Message, move |event| {
            if let ClientEvent::Message(delivery) = event {
                let _ = tx.send(delivery.clone());
            }
        });
        rx
    }

    fn error_channel(client: &crate::Client) -> mpsc::UnboundedReceiver<Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(EventKind::Error, move |event| {
            if let ClientEvent::Error(err) = event {
                let _ = tx.send(err.clone());
            }
        });
        rx
    }

    #[test]
    fn test_topic_of() {
        assert_eq!(topic_of("amqp://host:5672", "amqp://host:5672/a/b"), "a/b");
        assert_eq!(topic_of("amqp://host:5672", "amqp://other:5672/c"), "c");
        assert_eq!(topic_of("", "amqp://host:5672/d"), "d");
        assert_eq!(topic_of("amqp://host:5672", "not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_message_delivered_and_auto_confirmed() {
        let (client, mock) = started_client().await;
        let mut messages = message_channel(&client);
        client.subscribe("news/#", SubscribeOptions::default(), None).unwrap();

        let tag = mock.deliver("amqp://host:5672/news/today", "private:news/#", &"hello".into());

        let delivery = next(&mut messages).await;
        assert_eq!(delivery.message.topic, "news/today");
        assert_eq!(delivery.message.body, Payload::from("hello"));
        assert_eq!(delivery.destination.topic_pattern, "news/#");
        assert!(!delivery.needs_confirmation());
        assert_eq!(mock.accepted(), vec![tag]);
        assert_eq!(mock.settled(), vec![tag]);
        // A single confirm with nothing outstanding replenishes at once.
        assert_eq!(mock.flows(), vec![1]);
    }

    #[tokio::test]
    async fn test_manual_confirmation() {
        let (client, mock) = started_client().await;
        let mut messages = message_channel(&client);
        let options = SubscribeOptions::default()
            .with_qos(Qos::AtLeastOnce)
            .with_auto_confirm(false)
            .with_credit(4);
        client.subscribe("jobs", options, None).unwrap();

        let tag = mock.deliver("amqp://host:5672/jobs", "private:jobs", &"work".into());
        let delivery = next(&mut messages).await;
        assert!(delivery.needs_confirmation());
        assert!(mock.settled().is_empty());

        delivery.confirm().unwrap();
        assert!(!delivery.needs_confirmation());
        delivery.confirm().unwrap();

        assert_eq!(mock.settled(), vec![tag]);
        assert!(mock.accepted().is_empty());
        assert_eq!(mock.flows(), vec![1]);
    }

    #[tokio::test]
    async fn test_shared_subscription_match() {
        let (client, mock) = started_client().await;
        let mut messages = message_channel(&client);
        client
            .subscribe("orders", SubscribeOptions::default().with_share("workers"), None)
            .unwrap();

        mock.deliver("amqp://host:5672/orders", "share:workers:orders", &"o1".into());
        let delivery = next(&mut messages).await;
        assert_eq!(delivery.destination.share.as_deref(), Some("workers"));
        assert!(matches!(
            &mock.calls()[0],
            MockCall::Subscribe { address, .. } if address == "amqp://host:5672/share:workers:orders"
        ));
    }

    #[tokio::test]
    async fn test_unmatched_message_reports_internal_error() {
        let (client, mock) = started_client().await;
        let _messages = message_channel(&client);
        let mut errors = error_channel(&client);
        client.subscribe("a", SubscribeOptions::default(), None).unwrap();

        let tag = mock.deliver("amqp://host:5672/b", "private:b", &"stray".into());

        let err = next(&mut errors).await;
        assert!(matches!(err, Error::Internal { .. }));
        assert_eq!(mock.settled(), vec![tag]);
        assert_eq!(client.state(), ClientState::Started);
    }

    #[tokio::test]
    async fn test_malformed_message_goes_to_malformed_listener() {
        let (client, mock) = started_client().await;
        let mut messages = message_channel(&client);
        let (tx, mut malformed) = mpsc::unbounded_channel();
        client.on(EventKind::Malformed, move |event| {
            if let ClientEvent::Malformed(delivery) = event {
                let _ = tx.send(delivery.clone());
            }
        });
        client.subscribe("t", SubscribeOptions::default(), None).unwrap();

        mock.push_inbound(InboundMessage {
            tag: crate::identifiers::DeliveryTag::new(900),
            address: "amqp://host:5672/t".into(),
            link_address: "private:t".into(),
            body: vec![0xff, 0x00],
            content_type: None,
            ttl: 0,
            delivery_annotations: vec![Annotation::new(
                "x-opt-message-malformed-condition",
                AnnotationValue::Symbol("PAYLOADNOTAMQP".into()),
            )],
        });
        mock.deliver("amqp://host:5672/t", "private:t", &"fine".into());

        let delivery = next(&mut malformed).await;
        assert_eq!(delivery.malformed.unwrap().condition, "PAYLOADNOTAMQP");
        assert_eq!(delivery.message.body, Payload::Bytes(vec![0xff, 0x00]));

        let delivery = next(&mut messages).await;
        assert_eq!(delivery.message.body, Payload::from("fine"));
    }

    #[tokio::test]
    async fn test_malformed_without_listener_is_an_error() {
        let (client, mock) = started_client().await;
        let _messages = message_channel(&client);
        let mut errors = error_channel(&client);
        client.subscribe("t", SubscribeOptions::default(), None).unwrap();

        mock.push_inbound(InboundMessage {
            tag: crate::identifiers::DeliveryTag::new(901),
            address: "amqp://host:5672/t".into(),
            link_address: "private:t".into(),
            body: Vec::new(),
            content_type: None,
            ttl: 0,
            delivery_annotations: vec![Annotation::new(
                "x-opt-message-malformed-condition",
                AnnotationValue::Symbol("FORMATNOTSUPPORTED".into()),
            )],
        });

        let err = next(&mut errors).await;
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test]
    async fn test_listener_panic_becomes_error_event() {
        let (client, mock) = started_client().await;
        let mut errors = error_channel(&client);
        let mut messages = message_channel(&client);
        client.on(EventKind::Message, |_| panic!("listener exploded"));
        client.subscribe("t", SubscribeOptions::default(), None).unwrap();

        mock.deliver("amqp://host:5672/t", "private:t", &"1".into());
        mock.deliver("amqp://host:5672/t", "private:t", &"2".into());

        match next(&mut errors).await {
            Error::Listener { message } => assert!(message.contains("listener exploded")),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(next(&mut messages).await.message.body, Payload::from("1"));
        assert_eq!(next(&mut messages).await.message.body, Payload::from("2"));
    }

    fn restart_channel(client: &crate::Client) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(EventKind::Restarted, move |_| {
            let _ = tx.send(());
        });
        rx
    }

    async fn manual_delivery(
        client: &crate::Client,
        mock: &crate::transport::MockController,
    ) -> (Delivery, crate::identifiers::DeliveryTag) {
        let mut messages = message_channel(client);
        let options = SubscribeOptions::default()
            .with_qos(Qos::AtLeastOnce)
            .with_auto_confirm(false)
            .with_credit(1);
        client.subscribe("jobs", options, None).unwrap();
        let tag = mock.deliver("amqp://host:5672/jobs", "private:jobs", &"work".into());
        (next(&mut messages).await, tag)
    }

    #[tokio::test]
    async fn test_refused_confirm_can_be_retried() {
        let (client, mock) = started_client().await;
        let mut restarted = restart_channel(&client);
        let (delivery, tag) = manual_delivery(&client, &mock).await;

        mock.fail_next_settle(Error::invalid_argument("settle refused"));
        let err = delivery.confirm().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(delivery.needs_confirmation());
        assert!(mock.settled().is_empty());

        delivery.confirm().unwrap();
        assert!(!delivery.needs_confirmation());
        assert_eq!(mock.settled(), vec![tag]);
        assert_eq!(mock.flows(), vec![1]);
        assert_eq!(client.state(), ClientState::Started);
        assert!(restarted.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_confirm_transport_failure_reconnects() {
        let (client, mock) = started_client().await;
        let mut restarted = restart_channel(&client);
        let (delivery, _tag) = manual_delivery(&client, &mock).await;

        mock.fail_next_settle(Error::network("link detached"));
        let err = delivery.confirm().unwrap_err();
        assert!(matches!(err, Error::Network { .. }));

        next(&mut restarted).await;
        wait_for(|| mock.subscribe_count() == 2).await;

        // The link is gone; the service redelivers instead.
        delivery.confirm().unwrap();
        assert!(!delivery.needs_confirmation());
        assert!(mock.settled().is_empty());
    }

    #[tokio::test]
    async fn test_flow_failure_after_confirm_reconnects() {
        let (client, mock) = started_client().await;
        let mut restarted = restart_channel(&client);
        let (delivery, tag) = manual_delivery(&client, &mock).await;

        mock.fail_next_flow(Error::network("session ended"));
        assert!(matches!(delivery.confirm().unwrap_err(), Error::Network { .. }));
        assert_eq!(mock.settled(), vec![tag]);

        next(&mut restarted).await;
        delivery.confirm().unwrap();
        assert_eq!(mock.settled(), vec![tag]);
        assert!(mock.flows().is_empty());
    }

    #[tokio::test]
    async fn test_auto_confirm_settle_failure_reconnects() {
        let (client, mock) = started_client().await;
        let mut restarted = restart_channel(&client);
        let mut messages = message_channel(&client);
        client.subscribe("t", SubscribeOptions::default(), None).unwrap();

        mock.fail_next_settle(Error::network("link detached"));
        mock.deliver("amqp://host:5672/t", "private:t", &"lost".into());

        next(&mut restarted).await;
        assert!(messages.try_recv().is_err());
        wait_for(|| mock.subscribe_count() == 2).await;
    }

    #[tokio::test]
    async fn test_malformed_listener_alone_receives_nothing() {
        let (client, mock) = started_client().await;
        client.on(EventKind::Malformed, |_| {});
        let options = SubscribeOptions::default()
            .with_qos(Qos::AtLeastOnce)
            .with_auto_confirm(false);
        client.subscribe("t", options, None).unwrap();
        mock.deliver("amqp://host:5672/t", "private:t", &"plain".into());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.inbound_len(), 1);
        assert!(mock.settled().is_empty());
    }

    #[tokio::test]
    async fn test_no_receive_without_message_listener() {
        let (client, mock) = started_client().await;
        client.subscribe("t", SubscribeOptions::default(), None).unwrap();
        mock.deliver("amqp://host:5672/t", "private:t", &"held".into());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.inbound_len(), 1);

        let mut messages = message_channel(&client);
        assert_eq!(next(&mut messages).await.message.body, Payload::from("held"));
        wait_for(|| mock.inbound_len() == 0).await;
    }
}
