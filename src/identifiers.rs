//! Type-safe identifiers for client entities.
//!
//! Newtype wrappers keep client ids, transport delivery tags and listener
//! registrations from being mixed up.
//!
//! | Type | Source | Format |
//! |------|--------|--------|
//! | [`ClientId`] | user or generated | `[A-Za-z0-9%./_]{1,48}` |
//! | [`DeliveryTag`] | transport | opaque `u64` |
//! | [`ListenerId`] | process-wide counter | `u64` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Maximum length of a client id.
pub const MAX_CLIENT_ID_LEN: usize = 48;

/// Prefix of generated client ids.
const AUTO_ID_PREFIX: &str = "AUTO_";

/// Number of random characters appended to [`AUTO_ID_PREFIX`].
const AUTO_ID_RANDOM_LEN: usize = 7;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// ClientId
// ============================================================================

/// Identifier the client presents to the messaging service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Validates and wraps a user supplied id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the id is empty, longer than
    /// [`MAX_CLIENT_ID_LEN`] or contains characters outside `[A-Za-z0-9%./_]`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::invalid_argument("Client identifier must not be empty"));
        }
        if id.len() > MAX_CLIENT_ID_LEN {
            return Err(Error::invalid_argument(format!(
                "Client identifier '{id}' is longer than the maximum ID length of {MAX_CLIENT_ID_LEN}"
            )));
        }
        if let Some(bad) = id.chars().find(|c| !is_id_char(*c)) {
            return Err(Error::invalid_argument(format!(
                "Client identifier '{id}' contains invalid char: {bad}"
            )));
        }

        Ok(Self(id))
    }

    /// Generates an `AUTO_xxxxxxx` id.
    #[must_use]
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{AUTO_ID_PREFIX}{}", &random[..AUTO_ID_RANDOM_LEN]))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[inline]
fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '%' | '.' | '/' | '_')
}

// ============================================================================
// DeliveryTag
// ============================================================================

/// Transport handle for a message in flight, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Wraps a raw transport tag.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw tag.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ListenerId
// ============================================================================

/// Registration handle returned by `Client::on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates the next process-unique id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
