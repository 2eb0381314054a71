//! Message types exchanged with the transport.
//!
//! Outbound messages carry an encoded [`Payload`]; inbound messages arrive
//! as raw bytes plus content type and are decoded by the dispatch loop.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::DeliveryTag;
use crate::service::Credentials;

// ============================================================================
// Constants
// ============================================================================

/// Content type of [`Payload::Text`] bodies.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Content type of [`Payload::Json`] bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

// ============================================================================
// Qos
// ============================================================================

/// Delivery guarantee level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Qos {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Confirmed delivery; the message may be delivered more than once.
    AtLeastOnce,
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(crate::error::Error::invalid_argument(format!(
                "qos value '{other}' is invalid must evaluate to 0 or 1"
            ))),
        }
    }
}

// ============================================================================
// DeliveryStatus
// ============================================================================

/// Transport status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// No tracking information; reported for at-most-once sends.
    Unknown,
    /// Still in flight.
    Pending,
    /// Accepted by the peer.
    Accepted,
    /// Rejected by the peer.
    Rejected,
    /// Released by the peer without being processed.
    Released,
    /// Modified by the peer.
    Modified,
    /// Aborted locally.
    Aborted,
    /// Settled by the peer.
    Settled,
}

impl DeliveryStatus {
    /// Returns `true` once no further status change is expected.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Unknown)
    }

    /// Returns `true` for the successful terminal statuses.
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Accepted | Self::Settled)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Released => "released",
            Self::Modified => "modified",
            Self::Aborted => "aborted",
            Self::Settled => "settled",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text, sent as `text/plain`.
    Text(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// JSON value, sent as `application/json`.
    Json(Value),
}

impl Payload {
    /// Encodes the payload into body bytes and an optional content type.
    #[must_use]
    pub fn encode(&self) -> (Vec<u8>, Option<&'static str>) {
        match self {
            Self::Text(text) => (text.as_bytes().to_vec(), Some(CONTENT_TYPE_TEXT)),
            Self::Bytes(bytes) => (bytes.clone(), None),
            Self::Json(value) => (value.to_string().into_bytes(), Some(CONTENT_TYPE_JSON)),
        }
    }

    /// Decodes body bytes according to their content type.
    ///
    /// Text that is not UTF-8 and JSON that does not parse fall back to
    /// [`Payload::Bytes`].
    #[must_use]
    pub fn decode(body: Vec<u8>, content_type: Option<&str>) -> Self {
        match content_type {
            Some(CONTENT_TYPE_TEXT) => match String::from_utf8(body) {
                Ok(text) => Self::Text(text),
                Err(err) => Self::Bytes(err.into_bytes()),
            },
            Some(CONTENT_TYPE_JSON) => match serde_json::from_slice(&body) {
                Ok(value) => Self::Json(value),
                Err(_) => Self::Bytes(body),
            },
            _ => Self::Bytes(body),
        }
    }

    /// Returns the text if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// ============================================================================
// OutboundMessage
// ============================================================================

/// Message handed to [`Transport::put`](super::Transport::put).
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Full address: `service + '/' + topic`.
    pub address: String,
    /// Encoded body.
    pub body: Vec<u8>,
    /// Content type of the body, if any.
    pub content_type: Option<String>,
    /// Time to live in milliseconds; 0 means no expiry.
    pub ttl: u32,
}

impl OutboundMessage {
    /// Creates a message for `address` from a payload.
    #[must_use]
    pub fn new(address: impl Into<String>, payload: &Payload) -> Self {
        let (body, content_type) = payload.encode();
        Self {
            address: address.into(),
            body,
            content_type: content_type.map(str::to_string),
            ttl: 0,
        }
    }

    /// Sets the time to live in milliseconds.
    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

// ============================================================================
// InboundMessage
// ============================================================================

/// Delivery annotation value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationValue {
    /// AMQP symbol.
    Symbol(String),
    /// AMQP string.
    String(String),
    /// AMQP signed integer.
    Int(i64),
}

impl AnnotationValue {
    /// Returns the textual value of a symbol or string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) | Self::String(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// Returns the value as an integer, parsing text if needed.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Symbol(s) | Self::String(s) => s.trim().parse().ok(),
        }
    }
}

/// Delivery annotation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Annotation key, e.g. `x-opt-message-malformed-condition`.
    pub key: String,
    /// Annotation value.
    pub value: AnnotationValue,
}

impl Annotation {
    /// Creates an annotation.
    #[must_use]
    pub fn new(key: impl Into<String>, value: AnnotationValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Message returned by [`Transport::receive`](super::Transport::receive).
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Transport handle used to accept and settle the message.
    pub tag: DeliveryTag,
    /// Full address the message was published to.
    pub address: String,
    /// Address of the link it arrived on (`private:..` or `share:..:..`).
    pub link_address: String,
    /// Raw body.
    pub body: Vec<u8>,
    /// Content type of the body, if any.
    pub content_type: Option<String>,
    /// Time to live in milliseconds; 0 means none.
    pub ttl: u64,
    /// Delivery annotations.
    pub delivery_annotations: Vec<Annotation>,
}

// ============================================================================
// ConnectRequest
// ============================================================================

/// TLS settings applied to `amqps` connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM file of trusted certificates.
    pub trust_certificate: Option<PathBuf>,
    /// Whether the server certificate must match the host name.
    pub verify_name: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            trust_certificate: None,
            verify_name: true,
        }
    }
}

/// Arguments of [`Transport::connect`](super::Transport::connect).
#[derive(Debug, Clone)]
pub struct ConnectRequest<'a> {
    /// Normalised endpoint URL without credentials.
    pub url: &'a str,
    /// Credentials agreed by the service resolver.
    pub credentials: Option<&'a Credentials>,
    /// TLS settings.
    pub tls: &'a TlsOptions,
}

// ============================================================================
// Tests
// ============================================================================
