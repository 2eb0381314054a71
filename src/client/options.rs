//! Per-operation options.
//!
//! Each operation takes one options struct; defaults match the service's
//! defaults so `Default::default()` is always a valid choice.
//!
//! # Example
//!
//! ```ignore
//! use mqlight::{Qos, SendOptions, SubscribeOptions};
//!
//! let send = SendOptions::default().with_qos(Qos::AtLeastOnce).with_ttl(60_000);
//! let subscribe = SubscribeOptions::default()
//!     .with_share("workers")
//!     .with_qos(Qos::AtLeastOnce)
//!     .with_auto_confirm(false)
//!     .with_credit(10);
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Qos;

// ============================================================================
// Constants
// ============================================================================

/// Default subscription credit.
pub const DEFAULT_CREDIT: u32 = 1024;

/// Largest message time to live in milliseconds.
pub const MAX_TTL: u64 = u32::MAX as u64;

// ============================================================================
// ReplayOrder
// ============================================================================

/// Order in which queued operations are replayed after a connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayOrder {
    /// Most recently queued first.
    #[default]
    Lifo,
    /// Submission order.
    Fifo,
}

// ============================================================================
// SendOptions
// ============================================================================

/// Options for `Client::send`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Delivery guarantee. At-least-once requires a callback.
    pub qos: Qos,
    /// Time to live in milliseconds. Must be positive; capped at
    /// [`MAX_TTL`].
    pub ttl: Option<u64>,
}

impl SendOptions {
    /// Sets the qos.
    #[inline]
    #[must_use]
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the time to live in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Validates the options and returns the ttl to put on the message.
    pub(crate) fn validate(&self, has_callback: bool) -> Result<u32> {
        if self.qos == Qos::AtLeastOnce && !has_callback {
            return Err(Error::invalid_argument(
                "a callback must be specified when qos is at-least-once",
            ));
        }

        match self.ttl {
            None => Ok(0),
            Some(0) => Err(Error::invalid_argument(
                "ttl must be greater than zero milliseconds",
            )),
            Some(ttl) => Ok(u32::try_from(ttl.min(MAX_TTL)).unwrap_or(u32::MAX)),
        }
    }
}

// ============================================================================
// SubscribeOptions
// ============================================================================

/// Options for `Client::subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Share name; `None` subscribes privately.
    pub share: Option<String>,
    /// Delivery guarantee.
    pub qos: Qos,
    /// Confirm at-least-once messages automatically.
    pub auto_confirm: bool,
    /// How long the destination outlives the subscription, in milliseconds.
    pub ttl: u64,
    /// Unconfirmed messages the service may have in flight.
    pub credit: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            share: None,
            qos: Qos::AtMostOnce,
            auto_confirm: true,
            ttl: 0,
            credit: DEFAULT_CREDIT,
        }
    }
}

impl SubscribeOptions {
    /// Sets the share name.
    #[inline]
    #[must_use]
    pub fn with_share(mut self, share: impl Into<String>) -> Self {
        self.share = Some(share.into());
        self
    }

    /// Sets the qos.
    #[inline]
    #[must_use]
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Enables or disables automatic confirmation.
    #[inline]
    #[must_use]
    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    /// Sets the destination ttl in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the credit.
    #[inline]
    #[must_use]
    pub fn with_credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    /// ttl rounded half up to whole seconds.
    #[inline]
    pub(crate) fn ttl_secs(&self) -> u64 {
        self.ttl.saturating_add(500) / 1000
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_share(self.share.as_deref())
    }
}

// ============================================================================
// UnsubscribeOptions
// ============================================================================

/// Options for `Client::unsubscribe`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeOptions {
    /// Share name used when subscribing.
    pub share: Option<String>,
    /// Only `0` is accepted: the destination is discarded on unsubscribe.
    pub ttl: Option<u64>,
}

impl UnsubscribeOptions {
    /// Sets the share name.
    #[inline]
    #[must_use]
    pub fn with_share(mut self, share: impl Into<String>) -> Self {
        self.share = Some(share.into());
        self
    }

    /// Sets the ttl.
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_share(self.share.as_deref())?;
        match self.ttl {
            None | Some(0) => Ok(()),
            Some(ttl) => Err(Error::invalid_argument(format!(
                "ttl value '{ttl}' is invalid, only 0 is supported on unsubscribe"
            ))),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validates a topic or topic pattern.
pub(crate) fn validate_topic(kind: &str, topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::invalid_argument(format!("{kind} requires a non-empty topic")));
    }
    Ok(())
}

fn validate_share(share: Option<&str>) -> Result<()> {
    match share {
        Some("") => Err(Error::invalid_argument("share name must not be empty")),
        Some(share) if share.contains(':') => Err(Error::invalid_argument(format!(
            "share argument value '{share}' is invalid because it contains a colon (:) character"
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_callback_for_at_least_once() {
        let options = SendOptions::default().with_qos(Qos::AtLeastOnce);
        assert!(options.validate(false).is_err());
        assert!(options.validate(true).is_ok());
    }

    #[test]
    fn test_send_ttl() {
        assert_eq!(SendOptions::default().validate(false).unwrap(), 0);
        assert_eq!(SendOptions::default().with_ttl(1).validate(false).unwrap(), 1);
        assert!(SendOptions::default().with_ttl(0).validate(false).is_err());
        assert_eq!(
            SendOptions::default().with_ttl(u64::MAX).validate(false).unwrap(),
            u32::MAX
        );
    }

    #[test]
    fn test_subscribe_defaults() {
        let options = SubscribeOptions::default();
        assert_eq!(options.credit, DEFAULT_CREDIT);
        assert!(options.auto_confirm);
        assert_eq!(options.qos, Qos::AtMostOnce);
        assert_eq!(options.ttl_secs(), 0);
    }

    #[test]
    fn test_subscribe_ttl_rounding() {
        for (ms, secs) in [(0, 0), (499, 0), (500, 1), (1000, 1), (66_149, 66), (u64::MAX, u64::MAX / 1000)] {
            assert_eq!(SubscribeOptions::default().with_ttl(ms).ttl_secs(), secs, "{ms}");
        }
    }

    #[test]
    fn test_share_validation() {
        assert!(SubscribeOptions::default().with_share("ok").validate().is_ok());
        assert!(SubscribeOptions::default().with_share("bad:share").validate().is_err());
        assert!(SubscribeOptions::default().with_share("").validate().is_err());
    }

    #[test]
    fn test_unsubscribe_ttl() {
        assert!(UnsubscribeOptions::default().validate().is_ok());
        assert!(UnsubscribeOptions::default().with_ttl(0).validate().is_ok());
        assert!(UnsubscribeOptions::default().with_ttl(1).validate().is_err());
    }

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("send", "").is_err());
        assert!(validate_topic("send", "a/b").is_ok());
    }

    #[test]
    fn test_replay_order_serde() {
        let order: ReplayOrder = serde_json::from_str("\"fifo\"").unwrap();
        assert_eq!(order, ReplayOrder::Fifo);
        assert_eq!(ReplayOrder::default(), ReplayOrder::Lifo);
    }
}
