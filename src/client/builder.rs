//! Client configuration.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::builder()
//!     .service(vec!["amqp://primary", "amqp://backup"])
//!     .id("orders_1")
//!     .user("alice")
//!     .password("secret")
//!     .transport(transport)
//!     .connect()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::service::{Credentials, Service, ServiceResolver};
use crate::transport::{TlsOptions, Transport};

use super::core::{Client, ClientCore, ClientInner, CompletionCallback};
use super::events::{Listeners, Notifier};
use super::options::ReplayOrder;

// ============================================================================
// Constants
// ============================================================================

/// Default pause between connect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Default period of the dispatch, tracker and stop loops.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for a [`Client`].
///
/// Use [`Client::builder()`] to create one. `service` and `transport` are
/// required.
pub struct ClientBuilder {
    service: Option<Service>,
    id: Option<String>,
    user: Option<String>,
    password: Option<String>,
    trust_certificate: Option<PathBuf>,
    verify_name: bool,
    transport: Option<Box<dyn Transport>>,
    retry_interval: Duration,
    poll_interval: Duration,
    replay_order: ReplayOrder,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            service: None,
            id: None,
            user: None,
            password: None,
            trust_certificate: None,
            verify_name: true,
            transport: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            replay_order: ReplayOrder::default(),
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("service", &self.service)
            .field("id", &self.id)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("trust_certificate", &self.trust_certificate)
            .field("verify_name", &self.verify_name)
            .field("retry_interval", &self.retry_interval)
            .field("replay_order", &self.replay_order)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service: one URL, a list tried in order, or a lookup.
    ///
    /// `http(s)://` and `file://` URLs are fetched on every connect attempt
    /// and must yield a JSON document with a `service` field.
    #[inline]
    #[must_use]
    pub fn service(mut self, service: impl Into<Service>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the client id. Generated as `AUTO_xxxxxxx` when unset.
    #[inline]
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the user name; requires [`ClientBuilder::password`].
    #[inline]
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password; requires [`ClientBuilder::user`].
    #[inline]
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets a PEM file of certificates trusted for `amqps` connections.
    #[inline]
    #[must_use]
    pub fn ssl_trust_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_certificate = Some(path.into());
        self
    }

    /// Whether the server certificate must match the host name (default `true`).
    #[inline]
    #[must_use]
    pub fn ssl_verify_name(mut self, verify: bool) -> Self {
        self.verify_name = verify;
        self
    }

    /// Sets the transport the client drives.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Sets the pause between connect attempts.
    #[inline]
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the period of the polling loops.
    #[inline]
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the order queued operations replay in.
    #[inline]
    #[must_use]
    pub fn replay_order(mut self, order: ReplayOrder) -> Self {
        self.replay_order = order;
        self
    }

    /// Creates the client and starts connecting.
    ///
    /// Must be called within a tokio runtime. Listeners attached right
    /// after this call still observe the `started` event.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `service` or `transport` is missing, or there
    ///   is no tokio runtime
    /// - [`Error::InvalidArgument`] for a bad id, service URL, credentials
    ///   or certificate path
    pub fn start(self) -> Result<Client> {
        self.build(None)
    }

    /// Like [`ClientBuilder::start`], calling `callback` once the first
    /// connect completes.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::start`].
    pub fn start_with(self, callback: CompletionCallback) -> Result<Client> {
        self.build(Some(callback))
    }

    /// Creates the client and waits until it has connected.
    ///
    /// # Errors
    ///
    /// The errors of [`ClientBuilder::start`], plus any error the first
    /// connect completes with.
    pub async fn connect(self) -> Result<Client> {
        let (tx, rx) = oneshot::channel();
        let client = self.build(Some(Box::new(move |result| {
            let _ = tx.send(result);
        })))?;
        rx.await??;
        Ok(client)
    }

    fn build(mut self, callback: Option<CompletionCallback>) -> Result<Client> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("a client must be started within a tokio runtime"))?;
        let id = self.validate_id()?;
        let credentials = self.validate_credentials()?;
        let tls = self.validate_tls()?;
        let service = self.service.take().ok_or_else(|| {
            Error::config(
                "service is required. Use .service() to set it.\n\
                 Example: Client::builder().service(\"amqp://localhost\")",
            )
        })?;
        let transport = self.transport.take().ok_or_else(|| {
            Error::config("transport is required. Use .transport() to set it.")
        })?;
        let resolver = ServiceResolver::new(service, credentials)?;

        let inner = Arc::new(ClientInner {
            notifier: Notifier::spawn(&runtime, id.clone()),
            id,
            resolver,
            tls,
            retry_interval: self.retry_interval,
            poll_interval: self.poll_interval,
            replay_order: self.replay_order,
            runtime,
            core: Mutex::new(ClientCore::new(transport)),
            listeners: Arc::new(Listeners::default()),
        });
        inner.request_connect(callback);

        Ok(Client { inner })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_id(&self) -> Result<ClientId> {
        match &self.id {
            Some(id) => ClientId::new(id.as_str()),
            None => Ok(ClientId::generate()),
        }
    }

    fn validate_credentials(&self) -> Result<Option<Credentials>> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Ok(Some(Credentials::new(user, password))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::invalid_argument(
                "a password must be specified when a user is given",
            )),
            (None, Some(_)) => Err(Error::invalid_argument(
                "a user must be specified when a password is given",
            )),
        }
    }

    fn validate_tls(&self) -> Result<TlsOptions> {
        if let Some(path) = &self.trust_certificate
            && !path.is_file()
        {
            let reason = if path.exists() { "is not a regular file" } else { "does not exist" };
            return Err(Error::invalid_argument(format!(
                "ssl trust certificate '{}' {reason}",
                path.display()
            )));
        }

        Ok(TlsOptions {
            trust_certificate: self.trust_certificate.clone(),
            verify_name: self.verify_name,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
