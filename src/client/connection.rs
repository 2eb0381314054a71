//! Connection lifecycle.
//!
//! Drives the client through its states:
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | `Stopped` | `connect` | `Starting` |
//! | `Starting`, `Retrying` | endpoint connected | `Started` |
//! | `Starting`, `Retrying` | every endpoint failed | `Retrying` |
//! | `Started` | transport failure | `Retrying` |
//! | any but `Stopped` | `disconnect` | `Stopping` |
//! | `Stopping` | transport stopped | `Stopped` |
//!
//! Connect attempts run on a spawned task that re-checks the state and the
//! connection generation before every attempt, so a disconnect or a newer
//! connect cycle retires it.

// ============================================================================
// Imports
// ============================================================================

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::transport::ConnectRequest;

use super::core::{ClientCore, ClientInner, ClientState, CompletionCallback};
use super::events::ClientEvent;
use super::queue::QueuedSubscribe;
use super::schedule::TaskHandle;

// ============================================================================
// Types
// ============================================================================

/// Result of one connect attempt.
enum Attempt {
    /// Connected, or the cycle was retired.
    Done,
    /// Every endpoint failed; try again after the retry interval.
    Retry,
    /// The transport is still stopping; poll it again shortly.
    StopPending,
}

// ============================================================================
// ClientInner - Connect
// ============================================================================

impl ClientInner {
    pub(crate) fn request_connect(self: &Arc<Self>, callback: Option<CompletionCallback>) {
        let mut guard = self.core.lock();
        let core = &mut *guard;

        match core.state {
            ClientState::Stopped => {
                core.connect_callbacks.extend(callback);
                self.begin_connect(core);
            }
            ClientState::Stopping => {
                debug!(client_id = %self.id, "Connect deferred until stopped");
                core.connect_callbacks.extend(callback);
                core.connect_after_stop = true;
            }
            ClientState::Starting | ClientState::Started | ClientState::Retrying => {
                if let Some(callback) = callback {
                    self.complete(callback, Ok(()));
                }
            }
        }
    }

    /// Enters `Starting` and spawns the connect task.
    pub(crate) fn begin_connect(self: &Arc<Self>, core: &mut ClientCore) {
        debug!(client_id = %self.id, from = %core.state, "Starting");
        core.state = ClientState::Starting;
        core.first_start = true;
        self.spawn_connect(core);
    }

    fn spawn_connect(self: &Arc<Self>, core: &mut ClientCore) {
        core.generation += 1;
        let task = run_connect(Arc::downgrade(self), core.generation);
        core.loops.connect = Some(TaskHandle::spawn(&self.runtime, task));
    }

    async fn attempt_connect(self: &Arc<Self>, generation: u64) -> Attempt {
        {
            let mut core = self.core.lock();
            if !core.is_connecting(generation) {
                return Attempt::Done;
            }
            if core.transport_dirty {
                if !core.transport.stop() {
                    return Attempt::StopPending;
                }
                core.transport_dirty = false;
            }
        }

        let resolved = self.resolver.resolve().await;

        let mut guard = self.core.lock();
        let core = &mut *guard;
        if !core.is_connecting(generation) {
            return Attempt::Done;
        }

        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => return self.connect_failed(core, err),
        };

        let mut last_error = Error::service_lookup("no services to connect to");
        for endpoint in &resolved.endpoints {
            let request = ConnectRequest {
                url: endpoint.url(),
                credentials: resolved.credentials.as_ref(),
                tls: &self.tls,
            };
            debug!(client_id = %self.id, service = %endpoint, "Connecting");
            match core.transport.connect(&request) {
                Ok(()) => {
                    self.connected(core, endpoint.url());
                    return Attempt::Done;
                }
                Err(err) => {
                    debug!(
                        client_id = %self.id,
                        service = %endpoint,
                        error = %err,
                        detail = ?core.transport.last_error_text(),
                        "Connect failed"
                    );
                    let fatal = is_fatal(&err);
                    last_error = err;
                    if fatal {
                        break;
                    }
                }
            }
        }
        self.connect_failed(core, last_error)
    }

    fn connected(self: &Arc<Self>, core: &mut ClientCore, url: &str) {
        info!(client_id = %self.id, service = %url, "Connected");
        core.state = ClientState::Started;
        core.service = Some(url.to_string());
        core.transport_dirty = true;

        let idle = core.transport.remote_idle_timeout(url);
        if !idle.is_zero() {
            let generation = core.generation;
            core.loops.heartbeat = Some(TaskHandle::every(
                &self.runtime,
                idle / 2,
                Arc::downgrade(self),
                move |inner: &Arc<Self>| inner.heartbeat(generation),
            ));
        }

        let event = if std::mem::take(&mut core.first_start) {
            ClientEvent::Started
        } else {
            ClientEvent::Restarted
        };
        self.emit(event);
        for callback in core.connect_callbacks.drain(..) {
            self.complete(callback, Ok(()));
        }

        self.replay(core);
    }

    fn connect_failed(self: &Arc<Self>, core: &mut ClientCore, err: Error) -> Attempt {
        if is_fatal(&err) {
            warn!(client_id = %self.id, error = %err, "Security failure, stopping");
            self.emit(ClientEvent::Error(err.clone()));
            for callback in core.connect_callbacks.drain(..) {
                self.complete(callback, Err(err.clone()));
            }
            self.begin_stop(core);
            return Attempt::Done;
        }

        warn!(
            client_id = %self.id,
            error = %err,
            retry_in = ?self.retry_interval,
            "Connect failed, retrying"
        );
        core.state = ClientState::Retrying;
        self.emit(ClientEvent::Error(err));
        Attempt::Retry
    }

    fn heartbeat(self: &Arc<Self>, generation: u64) -> ControlFlow<()> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if !core.is_live(generation) {
            return ControlFlow::Break(());
        }
        match core.transport.work(Duration::ZERO) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => {
                self.reconnect(core, err);
                ControlFlow::Break(())
            }
        }
    }
}

/// Connection errors that no retry can fix, such as rejected credentials.
fn is_fatal(err: &Error) -> bool {
    err.is_connection_error() && !err.is_recoverable()
}

/// Connect loop for one connect cycle.
async fn run_connect(client: Weak<ClientInner>, generation: u64) {
    loop {
        let Some(inner) = client.upgrade() else {
            return;
        };
        let pause = match inner.attempt_connect(generation).await {
            Attempt::Done => return,
            Attempt::Retry => inner.retry_interval,
            Attempt::StopPending => inner.poll_interval,
        };
        drop(inner);

        tokio::time::sleep(pause).await;
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// ClientInner - Reconnect
// ============================================================================

impl ClientInner {
    /// Abandons the current connection after a transport failure and starts
    /// a new connect cycle. Only acts while started, so concurrent failures
    /// collapse into one cycle.
    pub(crate) fn reconnect(self: &Arc<Self>, core: &mut ClientCore, err: Error) {
        if core.state != ClientState::Started {
            return;
        }
        warn!(
            client_id = %self.id,
            error = %err,
            detail = ?core.transport.last_error_text(),
            "Connection lost, reconnecting"
        );

        core.loops.cancel_connection();
        core.service = None;

        let order = self.replay_order;
        for subscription in core.subscriptions.drain() {
            let options = subscription.options();
            let op = QueuedSubscribe::established(subscription.destination, options);
            core.queues.requeue_subscribe(op, order);
        }

        self.abandon_outstanding(core, &err);

        core.state = ClientState::Retrying;
        self.emit(ClientEvent::Error(err));
        self.spawn_connect(core);
    }
}

// ============================================================================
// ClientInner - Disconnect
// ============================================================================

impl ClientInner {
    pub(crate) fn request_disconnect(self: &Arc<Self>, callback: Option<CompletionCallback>) {
        let mut guard = self.core.lock();
        let core = &mut *guard;

        match core.state {
            ClientState::Stopped => {
                if let Some(callback) = callback {
                    self.complete(callback, Ok(()));
                }
            }
            ClientState::Stopping => {
                core.disconnect_callbacks.extend(callback);
                if std::mem::take(&mut core.connect_after_stop) {
                    for callback in core.connect_callbacks.drain(..) {
                        self.complete(callback, Err(Error::stopped("client was disconnected")));
                    }
                }
            }
            ClientState::Starting | ClientState::Started | ClientState::Retrying => {
                core.disconnect_callbacks.extend(callback);
                self.begin_stop(core);
            }
        }
    }

    /// Enters `Stopping` and polls the transport until it has stopped.
    pub(crate) fn begin_stop(self: &Arc<Self>, core: &mut ClientCore) {
        debug!(client_id = %self.id, from = %core.state, "Stopping");
        core.state = ClientState::Stopping;
        core.generation += 1;
        core.loops.cancel_all();

        for callback in core.connect_callbacks.drain(..) {
            self.complete(callback, Err(Error::stopped("client was disconnected")));
        }

        core.loops.stop = Some(TaskHandle::every(
            &self.runtime,
            self.poll_interval,
            Arc::downgrade(self),
            |inner: &Arc<Self>| inner.poll_stop(),
        ));
    }

    fn poll_stop(self: &Arc<Self>) -> ControlFlow<()> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.state != ClientState::Stopping {
            return ControlFlow::Break(());
        }
        if !core.transport.stop() {
            return ControlFlow::Continue(());
        }
        core.transport_dirty = false;
        self.stopped(core);
        ControlFlow::Break(())
    }

    fn stopped(self: &Arc<Self>, core: &mut ClientCore) {
        info!(client_id = %self.id, "Stopped");
        core.state = ClientState::Stopped;
        core.service = None;
        core.subscriptions.drain();

        self.flush_queues(core);
        let outstanding: Vec<_> = core.outstanding.drain(..).collect();
        for send in outstanding.into_iter().filter(|s| s.op.callback.is_some()) {
            self.complete_send(send.op, Err(Error::stopped("client was disconnected")));
        }
        core.drain_required = false;

        self.emit(ClientEvent::Stopped);
        for callback in core.disconnect_callbacks.drain(..) {
            self.complete(callback, Ok(()));
        }

        if std::mem::take(&mut core.connect_after_stop) {
            self.begin_connect(core);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::transport::Qos;
    use crate::client::testing::{builder, force_reconnect, started_client, wait_for};
    use crate::client::{EventKind, SendOptions, SubscribeOptions, UnsubscribeOptions};
    use crate::transport::{MockCall, MockTransport};

    fn event_channel(client: &crate::Client, kind: EventKind) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_start_emits_started() {
        let (transport, mock) = MockTransport::new();
        let client = builder(transport).start().unwrap();
        let mut started = event_channel(&client, EventKind::Started);

        assert!(matches!(next(&mut started).await, ClientEvent::Started));
        assert_eq!(client.state(), ClientState::Started);
        assert_eq!(client.service().as_deref(), Some("amqp://host:5672"));
        assert_eq!(mock.connected_url().as_deref(), Some("amqp://host:5672"));
    }

    #[tokio::test]
    async fn test_first_good_endpoint_wins() {
        let (transport, mock) = MockTransport::new();
        let client = builder(transport)
            .service(vec!["amqp://bad1", "amqp://bad2", "amqp://goodhost:5672", "amqp://other"])
            .connect()
            .await
            .unwrap();

        assert_eq!(client.service().as_deref(), Some("amqp://goodhost:5672"));
        assert_eq!(
            mock.connect_attempts(),
            vec!["amqp://bad1:5672", "amqp://bad2:5672", "amqp://goodhost:5672"]
        );
    }

    #[tokio::test]
    async fn test_retry_until_connected() {
        let (transport, mock) = MockTransport::new();
        mock.fail_connect(Some(Error::network("connection refused")));
        let client = builder(transport).start().unwrap();
        let mut errors = event_channel(&client, EventKind::Error);

        assert!(matches!(next(&mut errors).await, ClientEvent::Error(Error::Network { .. })));
        assert_eq!(client.state(), ClientState::Retrying);

        mock.fail_connect(None);
        client.connect_async().await.unwrap();
        wait_for(|| client.state() == ClientState::Started).await;
        assert!(mock.connect_attempts().len() >= 2);
    }

    #[test]
    fn test_only_security_errors_are_fatal() {
        assert!(is_fatal(&Error::security("bad certificate")));
        assert!(!is_fatal(&Error::network("refused")));
        assert!(!is_fatal(&Error::service_lookup("no services")));
        assert!(!is_fatal(&Error::internal("bug")));
    }

    #[tokio::test]
    async fn test_security_error_stops_client() {
        let (transport, mock) = MockTransport::new();
        mock.fail_connect(Some(Error::security("certificate verify failed")));

        let err = builder(transport).connect().await.unwrap_err();
        assert!(matches!(err, Error::Security { .. }));
        assert_eq!(mock.connect_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_dynamic_lookup_reinvoked_each_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = crate::service::Service::lookup(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(Error::service_lookup("lookup unavailable"))
                } else {
                    Ok(vec!["amqp://dynamic".to_string()])
                }
            }
        });
        let (transport, _mock) = MockTransport::new();

        let client = builder(transport).service(service).connect().await.unwrap();
        assert_eq!(client.service().as_deref(), Some("amqp://dynamic:5672"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client, mock) = started_client().await;
        let mut stopped = event_channel(&client, EventKind::Stopped);

        client.disconnect_async().await.unwrap();
        assert!(matches!(next(&mut stopped).await, ClientEvent::Stopped));
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(!mock.is_connected());

        client.disconnect_async().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stopped.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_polls_until_transport_stopped() {
        let (client, mock) = started_client().await;
        mock.set_stop_polls(3);

        client.disconnect_async().await.unwrap();
        assert!(mock.stop_calls() >= 3);
    }

    #[tokio::test]
    async fn test_disconnect_fails_queued_operations() {
        let (transport, mock) = MockTransport::new();
        mock.fail_connect(Some(Error::network("refused")));
        let client = builder(transport).start().unwrap();
        wait_for(|| client.state() == ClientState::Retrying).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let send_tx = tx.clone();
        client
            .send(
                "t",
                "m",
                SendOptions::default(),
                Some(Box::new(move |result, _| {
                    let _ = send_tx.send(result);
                })),
            )
            .unwrap();
        client
            .subscribe(
                "s",
                SubscribeOptions::default(),
                Some(Box::new(move |result, _| {
                    let _ = tx.send(result);
                })),
            )
            .unwrap();

        client.disconnect_async().await.unwrap();
        assert!(matches!(next(&mut rx).await, Err(Error::Stopped { .. })));
        assert!(matches!(next(&mut rx).await, Err(Error::Stopped { .. })));
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_connect_while_stopping_is_deferred() {
        let (client, mock) = started_client().await;
        mock.set_stop_polls(5);

        client.disconnect(None);
        assert_eq!(client.state(), ClientState::Stopping);
        client.connect_async().await.unwrap();
        assert_eq!(client.state(), ClientState::Started);
    }

    #[tokio::test]
    async fn test_connect_when_started_completes_immediately() {
        let (client, mock) = started_client().await;
        client.connect_async().await.unwrap();
        assert_eq!(mock.connect_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_emits_restarted_and_resubscribes() {
        let (client, mock) = started_client().await;
        let mut restarted = event_channel(&client, EventKind::Restarted);
        let options = SubscribeOptions::default().with_qos(Qos::AtLeastOnce).with_credit(10);
        client.subscribe("a/b", options, None).unwrap();

        force_reconnect(&client, Error::network("connection reset"));
        assert!(matches!(next(&mut restarted).await, ClientEvent::Restarted));
        wait_for(|| mock.subscribe_count() == 2).await;

        let subscribes: Vec<_> = mock
            .calls()
            .into_iter()
            .filter(|call| matches!(call, MockCall::Subscribe { .. }))
            .collect();
        assert_eq!(subscribes[0], subscribes[1]);
        assert_eq!(client.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_collapse() {
        let (client, _mock) = started_client().await;
        let restarts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&restarts);
        client.on(EventKind::Restarted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        {
            let mut core = client.inner.core.lock();
            client.inner.reconnect(&mut core, Error::network("first"));
            client.inner.reconnect(&mut core, Error::network("second"));
        }
        wait_for(|| client.state() == ClientState::Started).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_reconnects() {
        let (transport, mock) = MockTransport::new();
        mock.set_remote_idle_timeout(Duration::from_millis(20));
        let client = builder(transport).connect().await.unwrap();
        let mut restarted = event_channel(&client, EventKind::Restarted);

        wait_for(|| mock.work_calls() > 0).await;
        mock.fail_next_work(Error::network("heartbeat failed"));

        assert!(matches!(next(&mut restarted).await, ClientEvent::Restarted));
    }

    #[tokio::test]
    async fn test_queued_subscribe_unsubscribe_cancel_out() {
        let (transport, mock) = MockTransport::new();
        mock.fail_connect(Some(Error::network("refused")));
        let client = builder(transport).start().unwrap();
        wait_for(|| client.state() == ClientState::Retrying).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub_tx = tx.clone();
        client
            .subscribe(
                "x",
                SubscribeOptions::default(),
                Some(Box::new(move |result, _| {
                    let _ = sub_tx.send(("subscribe", result));
                })),
            )
            .unwrap();
        client
            .unsubscribe(
                "x",
                UnsubscribeOptions::default(),
                Some(Box::new(move |result, _| {
                    let _ = tx.send(("unsubscribe", result));
                })),
            )
            .unwrap();

        mock.fail_connect(None);
        let first = next(&mut rx).await;
        let second = next(&mut rx).await;
        assert_eq!(first.0, "subscribe");
        assert!(first.1.is_ok());
        assert_eq!(second.0, "unsubscribe");
        assert!(second.1.is_ok());
        assert_eq!(mock.subscribe_count(), 0);
        assert_eq!(mock.unsubscribe_count(), 0);
    }

    fn retrying(client: &crate::Client, mock: &crate::transport::MockController) {
        mock.fail_connect(Some(Error::network("refused")));
        force_reconnect(client, Error::network("connection reset"));
        assert_eq!(client.state(), ClientState::Retrying);
    }

    fn call_names(calls: &[MockCall]) -> Vec<String> {
        let strip = |address: &str| address.trim_start_matches("amqp://host:5672/").to_string();
        calls
            .iter()
            .map(|call| match call {
                MockCall::Subscribe { address, .. } => format!("subscribe {}", strip(address)),
                MockCall::Unsubscribe { address, ttl_secs } => {
                    format!("unsubscribe {} ttl={ttl_secs}", strip(address))
                }
                MockCall::Flow { address, credit } => format!("flow {} {credit}", strip(address)),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unsubscribe_while_retrying_reaches_transport() {
        let (client, mock) = started_client().await;
        client
            .subscribe("durable", SubscribeOptions::default().with_ttl(60_000), None)
            .unwrap();
        retrying(&client, &mock);

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .unsubscribe(
                "durable",
                UnsubscribeOptions::default(),
                Some(Box::new(move |result, _| {
                    let _ = tx.send(result);
                })),
            )
            .unwrap();
        let err = client
            .unsubscribe("durable", UnsubscribeOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Unsubscribed { .. }));

        mock.fail_connect(None);
        assert!(next(&mut rx).await.is_ok());
        assert_eq!(
            mock.calls(),
            vec![
                MockCall::Subscribe {
                    address: "amqp://host:5672/private:durable".into(),
                    qos: Qos::AtMostOnce,
                    ttl_secs: 60,
                    credit: crate::client::DEFAULT_CREDIT,
                },
                MockCall::Subscribe {
                    address: "amqp://host:5672/private:durable".into(),
                    qos: Qos::AtMostOnce,
                    ttl_secs: 60,
                    credit: crate::client::DEFAULT_CREDIT,
                },
                MockCall::Unsubscribe {
                    address: "amqp://host:5672/private:durable".into(),
                    ttl_secs: 0,
                },
            ]
        );
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_while_retrying_is_rejected() {
        let (client, mock) = started_client().await;
        client.subscribe("a", SubscribeOptions::default(), None).unwrap();
        retrying(&client, &mock);

        let err = client.subscribe("a", SubscribeOptions::default(), None).unwrap_err();
        assert!(matches!(err, Error::Subscribed { .. }));

        mock.fail_connect(None);
        wait_for(|| mock.subscribe_count() == 2).await;
        assert_eq!(client.subscriptions(), vec![crate::client::Destination::new("a", None)]);
    }

    async fn replayed(order: crate::client::ReplayOrder) -> (Vec<String>, Vec<String>) {
        let (transport, mock) = MockTransport::new();
        let client = builder(transport).replay_order(order).connect().await.unwrap();
        client.subscribe("e", SubscribeOptions::default(), None).unwrap();
        retrying(&client, &mock);

        client.subscribe("a", SubscribeOptions::default(), None).unwrap();
        client.subscribe("b", SubscribeOptions::default(), None).unwrap();
        client.unsubscribe("e", UnsubscribeOptions::default(), None).unwrap();
        client.send("t", "m0", SendOptions::default(), None).unwrap();
        client.send("t", "m1", SendOptions::default(), None).unwrap();

        mock.fail_connect(None);
        wait_for(|| mock.sent().len() == 2).await;

        let calls = call_names(&mock.calls()[1..]);
        let bodies = mock
            .sent()
            .iter()
            .map(|put| String::from_utf8_lossy(&put.message.body).into_owned())
            .collect();
        (calls, bodies)
    }

    #[tokio::test]
    async fn test_replay_order_lifo() {
        let (calls, bodies) = replayed(crate::client::ReplayOrder::Lifo).await;
        assert_eq!(
            calls,
            vec![
                "subscribe private:b",
                "subscribe private:a",
                "subscribe private:e",
                "unsubscribe private:e ttl=0",
            ]
        );
        assert_eq!(bodies, vec!["m1", "m0"]);
    }

    #[tokio::test]
    async fn test_replay_order_fifo() {
        let (calls, bodies) = replayed(crate::client::ReplayOrder::Fifo).await;
        assert_eq!(
            calls,
            vec![
                "subscribe private:e",
                "subscribe private:a",
                "subscribe private:b",
                "unsubscribe private:e ttl=0",
            ]
        );
        assert_eq!(bodies, vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn test_subscribe_callbacks_fire_once_across_retry_and_stop() {
        let (transport, mock) = MockTransport::new();
        mock.fail_connect(Some(Error::network("refused")));
        let client = builder(transport).start().unwrap();
        wait_for(|| client.state() == ClientState::Retrying).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for label in ["first", "second"] {
            let tx = tx.clone();
            client
                .subscribe(
                    "a",
                    SubscribeOptions::default(),
                    Some(Box::new(move |result, _| {
                        let _ = tx.send((label, result));
                    })),
                )
                .unwrap();
        }
        let unsubscribe_tx = tx.clone();
        let err = client
            .unsubscribe(
                "b",
                UnsubscribeOptions::default(),
                Some(Box::new(move |result, _| {
                    let _ = unsubscribe_tx.send(("unsubscribe", result));
                })),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unsubscribed { .. }));

        let (label, result) = next(&mut rx).await;
        assert_eq!(label, "first");
        assert!(matches!(result, Err(Error::Subscribed { .. })));

        client.disconnect_async().await.unwrap();
        let (label, result) = next(&mut rx).await;
        assert_eq!(label, "second");
        assert!(matches!(result, Err(Error::Stopped { .. })));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
