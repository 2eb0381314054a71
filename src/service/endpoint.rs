//! Endpoint URL validation and credentials.
//!
//! A candidate URL must be `amqp://` or `amqps://`, name a host and carry
//! no path, query or fragment. The normalised form is
//! `scheme://host:port` in lowercase, with the default port filled in and
//! any embedded `user:password@` moved into [`Credentials`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default port of `amqp://` endpoints.
pub const AMQP_PORT: u16 = 5672;

/// Default port of `amqps://` endpoints.
pub const AMQPS_PORT: u16 = 5671;

/// Replacement for passwords shown in messages.
const PASSWORD_MASK: &str = "****";

// ============================================================================
// Credentials
// ============================================================================

/// User name and password presented to the service.
///
/// The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Returns the user name.
    #[inline]
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the password.
    #[inline]
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &PASSWORD_MASK)
            .finish()
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A validated service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    host: String,
    port: u16,
    secure: bool,
}

impl Endpoint {
    /// Parses a candidate URL, returning the endpoint and any embedded
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the URL is malformed, uses a
    /// scheme other than `amqp`/`amqps`, has no host, has a path, or embeds
    /// only one of user and password.
    pub fn parse(raw: &str) -> Result<(Self, Option<Credentials>)> {
        let masked = mask_password(raw);
        let url = Url::parse(raw).map_err(|e| {
            Error::invalid_argument(format!("Unsupported URL, '{masked}' is not a valid URL: {e}"))
        })?;

        let secure = match url.scheme() {
            "amqp" => false,
            "amqps" => true,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "Unsupported URL, '{masked}' specified for service. \
                     Only the amqp or amqps protocol are supported."
                )));
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "Unsupported URL, '{masked}' must specify a host name"
                )));
            }
        };

        if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
            return Err(Error::invalid_argument(format!(
                "Unsupported URL, '{masked}' paths ({}) can't be part of a service URL",
                url.path()
            )));
        }

        let credentials = embedded_credentials(&url, &masked)?;
        let port = url.port().unwrap_or(if secure { AMQPS_PORT } else { AMQP_PORT });
        let scheme = if secure { "amqps" } else { "amqp" };

        Ok((
            Self {
                url: format!("{scheme}://{host}:{port}"),
                host,
                port,
                secure,
            },
            credentials,
        ))
    }

    /// Normalised URL, `scheme://host:port`.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lowercase host name.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulted from the scheme when absent.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` for `amqps` endpoints.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn embedded_credentials(url: &Url, masked: &str) -> Result<Option<Credentials>> {
    let user = urlencoding::decode(url.username())
        .map_err(|e| Error::invalid_argument(format!("Unsupported URL, '{masked}': {e}")))?;
    let password = url
        .password()
        .map(urlencoding::decode)
        .transpose()
        .map_err(|e| Error::invalid_argument(format!("Unsupported URL, '{masked}': {e}")))?;

    match (user.is_empty(), password) {
        (true, None) => Ok(None),
        (false, Some(password)) if !password.is_empty() => {
            Ok(Some(Credentials::new(user.into_owned(), password.into_owned())))
        }
        (false, _) => Err(Error::invalid_argument(format!(
            "URL '{masked}' user name specified without a password"
        ))),
        (true, Some(_)) => Err(Error::invalid_argument(format!(
            "URL '{masked}' password specified without a user name"
        ))),
    }
}

/// Replaces the password of a URL with `****`.
///
/// Strings that do not parse as URLs are returned unchanged.
#[must_use]
pub fn mask_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some(PASSWORD_MASK)).is_ok() {
                url.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}

/// Checks that embedded credentials agree across a list and with the
/// explicit options, returning the credentials to connect with.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] on any disagreement.
pub fn agree_credentials(
    embedded: &[Option<Credentials>],
    explicit: Option<&Credentials>,
) -> Result<Option<Credentials>> {
    let first = embedded.first().cloned().flatten();
    if embedded.iter().any(|c| *c != first) {
        return Err(Error::invalid_argument(
            "User name and password embedded in service URLs must match for every URL",
        ));
    }

    match (first, explicit) {
        (Some(url_creds), Some(option_creds)) if url_creds != *option_creds => {
            Err(Error::invalid_argument(
                "User name and password embedded in the service URL do not match \
                 the user and password options",
            ))
        }
        (Some(url_creds), _) => Ok(Some(url_creds)),
        (None, option_creds) => Ok(option_creds.cloned()),
    }
}

// ============================================================================
// Tests
// ============================================================================
