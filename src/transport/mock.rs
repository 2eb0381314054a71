//! In-memory scripted transport.
//!
//! [`MockTransport`] behaves like a well-mannered messenger without any
//! network I/O. A [`MockController`] shares its state so tests can inject
//! failures and inbound messages and inspect every call the client made.
//!
//! Default behaviour:
//!
//! - hosts whose name starts with `bad` refuse connections;
//! - at-most-once sends report [`DeliveryStatus::Unknown`], at-least-once
//!   sends report [`DeliveryStatus::Accepted`];
//! - `stop` succeeds on the first call;
//! - the remote idle timeout is zero (no heartbeat).
//!
//! # Example
//!
//! ```ignore
//! let (transport, mock) = MockTransport::new();
//! let client = Client::builder()
//!     .service("amqp://host")
//!     .transport(transport)
//!     .start()?;
//! client.connect_async().await?;
//! assert_eq!(mock.connect_attempts(), vec!["amqp://host:5672"]);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use url::Url;

use super::{
    ConnectRequest, DeliveryStatus, InboundMessage, OutboundMessage, Payload, Qos, Transport,
};
use crate::error::{Error, Result};
use crate::identifiers::DeliveryTag;
use crate::service::Credentials;

// ============================================================================
// Constants
// ============================================================================

/// Host name prefix that makes the mock refuse a connection.
const REFUSED_HOST_PREFIX: &str = "bad";

// ============================================================================
// Types
// ============================================================================

/// A transport call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `subscribe(address, qos, ttl_secs, credit)`.
    Subscribe {
        /// Link address.
        address: String,
        /// Requested qos.
        qos: Qos,
        /// Link ttl in seconds.
        ttl_secs: u64,
        /// Initial credit.
        credit: u32,
    },
    /// `unsubscribe(address, ttl_secs)`.
    Unsubscribe {
        /// Link address.
        address: String,
        /// Link ttl in seconds.
        ttl_secs: u64,
    },
    /// `flow(address, credit)`.
    Flow {
        /// Link address.
        address: String,
        /// Credit granted.
        credit: u32,
    },
}

/// A message accepted by [`Transport::put`].
#[derive(Debug, Clone, PartialEq)]
pub struct PutRecord {
    /// Tag returned to the client.
    pub tag: DeliveryTag,
    /// The message as handed over.
    pub message: OutboundMessage,
    /// Requested qos.
    pub qos: Qos,
}

/// One-shot failures, consumed by the next matching call.
#[derive(Debug, Default)]
struct Failures {
    put: Option<Error>,
    status: Option<Error>,
    subscribe: Option<Error>,
    unsubscribe: Option<Error>,
    accept: Option<Error>,
    settle: Option<Error>,
    flow: Option<Error>,
    receive: Option<Error>,
    work: Option<Error>,
}

#[derive(Debug)]
struct MockState {
    connected: bool,
    connected_url: Option<String>,
    connect_attempts: Vec<String>,
    last_credentials: Option<Credentials>,
    connect_error: Option<Error>,
    stop_polls_required: u32,
    stop_polls: u32,
    stop_calls: usize,
    next_tag: u64,
    sent: Vec<PutRecord>,
    status_overrides: FxHashMap<DeliveryTag, (DeliveryStatus, Option<String>)>,
    block_completion: bool,
    completion: (DeliveryStatus, Option<String>),
    failures: Failures,
    inbound: VecDeque<InboundMessage>,
    calls: Vec<MockCall>,
    accepted: Vec<DeliveryTag>,
    settled: Vec<DeliveryTag>,
    work_calls: usize,
    remote_idle_timeout: Duration,
    last_error: Option<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connected: false,
            connected_url: None,
            connect_attempts: Vec::new(),
            last_credentials: None,
            connect_error: None,
            stop_polls_required: 1,
            stop_polls: 0,
            stop_calls: 0,
            next_tag: 1,
            sent: Vec::new(),
            status_overrides: FxHashMap::default(),
            block_completion: false,
            completion: (DeliveryStatus::Accepted, None),
            failures: Failures::default(),
            inbound: VecDeque::new(),
            calls: Vec::new(),
            accepted: Vec::new(),
            settled: Vec::new(),
            work_calls: 0,
            remote_idle_timeout: Duration::ZERO,
            last_error: None,
        }
    }
}

impl MockState {
    fn allocate_tag(&mut self) -> DeliveryTag {
        let tag = DeliveryTag::new(self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn require_connected(&mut self, operation: &str) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            let message = format!("{operation}: not connected");
            self.last_error = Some(message.clone());
            Err(Error::network(message))
        }
    }

    fn fail(&mut self, error: Option<Error>) -> Result<()> {
        match error {
            Some(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
            None => Ok(()),
        }
    }
}

// ============================================================================
// MockTransport
// ============================================================================

/// In-memory [`Transport`].
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a transport and the controller that scripts it.
    #[must_use]
    pub fn new() -> (Self, MockController) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockController { state },
        )
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_attempts.push(request.url.to_string());
        state.last_credentials = request.credentials.cloned();

        if state.connected {
            return Err(Error::network("already connected"));
        }
        if let Some(err) = state.connect_error.clone() {
            state.last_error = Some(err.to_string());
            return Err(err);
        }

        let refused = Url::parse(request.url)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.starts_with(REFUSED_HOST_PREFIX)))
            .unwrap_or(true);
        if refused {
            let message = format!("connect ECONNREFUSED {}", request.url);
            state.last_error = Some(message.clone());
            return Err(Error::network(message));
        }

        state.connected = true;
        state.connected_url = Some(request.url.to_string());
        state.stop_polls = 0;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        state.stop_polls += 1;
        if state.stop_polls >= state.stop_polls_required {
            state.connected = false;
            state.connected_url = None;
            state.stop_polls = 0;
            true
        } else {
            false
        }
    }

    fn put(&mut self, message: OutboundMessage, qos: Qos) -> Result<DeliveryTag> {
        let mut state = self.state.lock();
        state.require_connected("put")?;
        let failure = state.failures.put.take();
        state.fail(failure)?;

        let tag = state.allocate_tag();
        state.sent.push(PutRecord { tag, message, qos });
        Ok(tag)
    }

    fn send_pending(&mut self) -> Result<()> {
        self.state.lock().require_connected("send")
    }

    fn status(&mut self, tag: DeliveryTag) -> Result<DeliveryStatus> {
        let mut state = self.state.lock();
        let failure = state.failures.status.take();
        state.fail(failure)?;

        if let Some((status, _)) = state.status_overrides.get(&tag) {
            return Ok(*status);
        }
        let qos = state
            .sent
            .iter()
            .find(|sent| sent.tag == tag)
            .map(|sent| sent.qos)
            .ok_or_else(|| Error::invalid_argument(format!("unknown delivery tag {tag}")))?;

        Ok(match qos {
            Qos::AtMostOnce => DeliveryStatus::Unknown,
            Qos::AtLeastOnce if state.block_completion => DeliveryStatus::Pending,
            Qos::AtLeastOnce => state.completion.0,
        })
    }

    fn status_error(&mut self, tag: DeliveryTag) -> Option<String> {
        let state = self.state.lock();
        match state.status_overrides.get(&tag) {
            Some((_, reason)) => reason.clone(),
            None => state.completion.1.clone(),
        }
    }

    fn accept(&mut self, tag: DeliveryTag) -> Result<()> {
        let mut state = self.state.lock();
        let failure = state.failures.accept.take();
        state.fail(failure)?;
        state.accepted.push(tag);
        Ok(())
    }

    fn settle(&mut self, tag: DeliveryTag) -> Result<()> {
        let mut state = self.state.lock();
        let failure = state.failures.settle.take();
        state.fail(failure)?;
        state.settled.push(tag);
        Ok(())
    }

    fn receive(&mut self, max: usize) -> Result<Vec<InboundMessage>> {
        let mut state = self.state.lock();
        let failure = state.failures.receive.take();
        state.fail(failure)?;
        if !state.connected {
            return Ok(Vec::new());
        }

        let count = max.min(state.inbound.len());
        Ok(state.inbound.drain(..count).collect())
    }

    fn subscribe(&mut self, address: &str, qos: Qos, ttl_secs: u64, credit: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.require_connected("subscribe")?;
        let failure = state.failures.subscribe.take();
        state.fail(failure)?;

        state.calls.push(MockCall::Subscribe {
            address: address.to_string(),
            qos,
            ttl_secs,
            credit,
        });
        Ok(())
    }

    fn unsubscribe(&mut self, address: &str, ttl_secs: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.require_connected("unsubscribe")?;
        let failure = state.failures.unsubscribe.take();
        state.fail(failure)?;

        state.calls.push(MockCall::Unsubscribe {
            address: address.to_string(),
            ttl_secs,
        });
        Ok(())
    }

    fn flow(&mut self, address: &str, credit: u32) -> Result<()> {
        let mut state = self.state.lock();
        let failure = state.failures.flow.take();
        state.fail(failure)?;
        state.calls.push(MockCall::Flow {
            address: address.to_string(),
            credit,
        });
        Ok(())
    }

    fn remote_idle_timeout(&mut self, _service: &str) -> Duration {
        self.state.lock().remote_idle_timeout
    }

    fn work(&mut self, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.work_calls += 1;
        let failure = state.failures.work.take();
        state.fail(failure)
    }

    fn last_error_text(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }
}

// ============================================================================
// MockController
// ============================================================================

/// Scripting and inspection handle for a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
}

// ============================================================================
// MockController - Scripting
// ============================================================================

impl MockController {
    /// Makes every connect fail with `error`; `None` restores the default.
    pub fn fail_connect(&self, error: Option<Error>) {
        self.state.lock().connect_error = error;
    }

    /// Number of `stop` calls needed before the transport reports stopped.
    pub fn set_stop_polls(&self, polls: u32) {
        self.state.lock().stop_polls_required = polls.max(1);
    }

    /// Keeps at-least-once sends pending until unblocked.
    pub fn block_send_completion(&self, blocked: bool) {
        self.state.lock().block_completion = blocked;
    }

    /// Terminal status reported for unblocked at-least-once sends.
    pub fn set_completion(&self, status: DeliveryStatus, reason: Option<&str>) {
        self.state.lock().completion = (status, reason.map(str::to_string));
    }

    /// Overrides the status of one outbound message.
    pub fn set_status(&self, tag: DeliveryTag, status: DeliveryStatus, reason: Option<&str>) {
        self.state
            .lock()
            .status_overrides
            .insert(tag, (status, reason.map(str::to_string)));
    }

    /// Fails the next `put`.
    pub fn fail_next_put(&self, error: Error) {
        self.state.lock().failures.put = Some(error);
    }

    /// Fails the next `status`.
    pub fn fail_next_status(&self, error: Error) {
        self.state.lock().failures.status = Some(error);
    }

    /// Fails the next `subscribe`.
    pub fn fail_next_subscribe(&self, error: Error) {
        self.state.lock().failures.subscribe = Some(error);
    }

    /// Fails the next `unsubscribe`.
    pub fn fail_next_unsubscribe(&self, error: Error) {
        self.state.lock().failures.unsubscribe = Some(error);
    }

    /// Fails the next `accept`.
    pub fn fail_next_accept(&self, error: Error) {
        self.state.lock().failures.accept = Some(error);
    }

    /// Fails the next `settle`.
    pub fn fail_next_settle(&self, error: Error) {
        self.state.lock().failures.settle = Some(error);
    }

    /// Fails the next `flow`.
    pub fn fail_next_flow(&self, error: Error) {
        self.state.lock().failures.flow = Some(error);
    }

    /// Fails the next `receive`.
    pub fn fail_next_receive(&self, error: Error) {
        self.state.lock().failures.receive = Some(error);
    }

    /// Fails the next `work`.
    pub fn fail_next_work(&self, error: Error) {
        self.state.lock().failures.work = Some(error);
    }

    /// Idle timeout the peer advertises.
    pub fn set_remote_idle_timeout(&self, timeout: Duration) {
        self.state.lock().remote_idle_timeout = timeout;
    }

    /// Queues an inbound message.
    pub fn push_inbound(&self, message: InboundMessage) {
        self.state.lock().inbound.push_back(message);
    }

    /// Queues an inbound message built from its parts and returns its tag.
    pub fn deliver(&self, address: &str, link_address: &str, payload: &Payload) -> DeliveryTag {
        let mut state = self.state.lock();
        let tag = state.allocate_tag();
        let (body, content_type) = payload.encode();
        state.inbound.push_back(InboundMessage {
            tag,
            address: address.to_string(),
            link_address: link_address.to_string(),
            body,
            content_type: content_type.map(str::to_string),
            ttl: 0,
            delivery_annotations: Vec::new(),
        });
        tag
    }

    /// Drops the connection as if the peer went away.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.connected_url = None;
    }
}

// ============================================================================
// MockController - Inspection
// ============================================================================

impl MockController {
    /// URLs passed to `connect`, in call order.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<String> {
        self.state.lock().connect_attempts.clone()
    }

    /// URL of the current connection.
    #[must_use]
    pub fn connected_url(&self) -> Option<String> {
        self.state.lock().connected_url.clone()
    }

    /// Returns `true` while connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Credentials passed to the most recent `connect`.
    #[must_use]
    pub fn last_credentials(&self) -> Option<Credentials> {
        self.state.lock().last_credentials.clone()
    }

    /// Messages accepted by `put`.
    #[must_use]
    pub fn sent(&self) -> Vec<PutRecord> {
        self.state.lock().sent.clone()
    }

    /// Subscribe, unsubscribe and flow calls, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of `subscribe` calls.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Subscribe { .. }))
    }

    /// Number of `unsubscribe` calls.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Unsubscribe { .. }))
    }

    /// Credits granted by `flow`, in call order.
    #[must_use]
    pub fn flows(&self) -> Vec<u32> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Flow { credit, .. } => Some(*credit),
                _ => None,
            })
            .collect()
    }

    /// Tags passed to `accept`.
    #[must_use]
    pub fn accepted(&self) -> Vec<DeliveryTag> {
        self.state.lock().accepted.clone()
    }

    /// Tags passed to `settle`.
    #[must_use]
    pub fn settled(&self) -> Vec<DeliveryTag> {
        self.state.lock().settled.clone()
    }

    /// Number of `work` calls.
    #[must_use]
    pub fn work_calls(&self) -> usize {
        self.state.lock().work_calls
    }

    /// Number of `stop` calls.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    /// Number of inbound messages not yet received.
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.state.lock().inbound.len()
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| predicate(call)).count()
    }
}

// ============================================================================
// Tests
// ============================================================================
