//! Error types for the MQ Light client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use mqlight::{Client, Result, SendOptions};
//!
//! fn example(client: &Client) -> Result<()> {
//!     client.send("greetings", "hello", SendOptions::default(), None)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Surfaces through |
//! |----------|----------|------------------|
//! | Caller input | [`Error::InvalidArgument`], [`Error::Stopped`], [`Error::Subscribed`], [`Error::Unsubscribed`], [`Error::Config`] | returned synchronously |
//! | Connectivity | [`Error::Network`], [`Error::Security`], [`Error::ServiceLookup`] | `error` event, retry |
//! | Delivery outcome | [`Error::Delivery`] | send callback |
//! | Internal | [`Error::Internal`], [`Error::Listener`] | `error` event |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Url`], [`Error::ChannelClosed`] | wherever they occur |
//!
//! [`Error`] is `Clone` so a single failure can complete every callback
//! waiting on the same operation.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::transport::DeliveryStatus;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Caller Input Errors
    // ========================================================================
    /// Client configuration error.
    ///
    /// Returned when the builder is missing a required setting.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Operation attempted on a stopped or stopping client.
    #[error("Client stopped: {message}")]
    Stopped {
        /// Description of the rejected operation.
        message: String,
    },

    /// The client is already subscribed, or has a queued subscription.
    #[error("Already subscribed: {message}")]
    Subscribed {
        /// Description of the conflicting subscription.
        message: String,
    },

    /// Unsubscribe from a destination that has no subscription.
    #[error("Not subscribed: {message}")]
    Unsubscribed {
        /// Description of the missing subscription.
        message: String,
    },

    // ========================================================================
    // Connectivity Errors
    // ========================================================================
    /// Transport level network failure.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// Authentication or TLS failure.
    ///
    /// Not retried: the same credentials would fail again.
    #[error("Security error: {message}")]
    Security {
        /// Description of the security failure.
        message: String,
    },

    /// Remote or file based service lookup failed.
    #[error("Service lookup failed: {message}")]
    ServiceLookup {
        /// Description of the lookup failure.
        message: String,
    },

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// A sent message reached a non-success terminal status.
    #[error("Delivery {status}: {message}")]
    Delivery {
        /// Terminal status reported by the transport.
        status: DeliveryStatus,
        /// Reason text reported by the transport.
        message: String,
    },

    // ========================================================================
    // Internal Errors
    // ========================================================================
    /// Internal consistency violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// An application listener panicked.
    #[error("Listener panicked: {message}")]
    Listener {
        /// Panic payload, when it was a string.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(Arc<IoError>),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Conversions
// ============================================================================

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a stopped error.
    #[inline]
    pub fn stopped(message: impl Into<String>) -> Self {
        Self::Stopped {
            message: message.into(),
        }
    }

    /// Creates a subscribed error.
    #[inline]
    pub fn subscribed(message: impl Into<String>) -> Self {
        Self::Subscribed {
            message: message.into(),
        }
    }

    /// Creates an unsubscribed error.
    #[inline]
    pub fn unsubscribed(message: impl Into<String>) -> Self {
        Self::Unsubscribed {
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a security error.
    #[inline]
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security {
            message: message.into(),
        }
    }

    /// Creates a service lookup error.
    #[inline]
    pub fn service_lookup(message: impl Into<String>) -> Self {
        Self::ServiceLookup {
            message: message.into(),
        }
    }

    /// Creates a delivery error.
    #[inline]
    pub fn delivery(status: DeliveryStatus, message: impl Into<String>) -> Self {
        Self::Delivery {
            status,
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a listener error.
    #[inline]
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error was caused by the caller's arguments.
    ///
    /// Input errors are never retried and never trigger a reconnect.
    #[inline]
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidArgument { .. }
                | Self::Stopped { .. }
                | Self::Subscribed { .. }
                | Self::Unsubscribed { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Security { .. } | Self::ServiceLookup { .. } | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::ServiceLookup { .. } | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::network("connect ECONNREFUSED");
        assert_eq!(err.to_string(), "Network error: connect ECONNREFUSED");
    }

    #[test]
    fn test_delivery_error_display() {
        let err = Error::delivery(DeliveryStatus::Rejected, "bad message");
        assert_eq!(err.to_string(), "Delivery rejected: bad message");
    }

    #[test]
    fn test_is_input_error() {
        assert!(Error::invalid_argument("qos").is_input_error());
        assert!(Error::stopped("send").is_input_error());
        assert!(Error::subscribed("/kittens").is_input_error());
        assert!(Error::unsubscribed("/kittens").is_input_error());
        assert!(!Error::network("down").is_input_error());
        assert!(!Error::internal("bad").is_input_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::network("test").is_connection_error());
        assert!(Error::security("test").is_connection_error());
        assert!(Error::service_lookup("test").is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::network("test").is_recoverable());
        assert!(!Error::security("test").is_recoverable());
        assert!(!Error::delivery(DeliveryStatus::Released, "x").is_recoverable());
    }

    #[test]
    fn test_error_is_clone() {
        let err: Error = IoError::new(ErrorKind::NotFound, "file not found").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("ce n'est pas une uri").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
