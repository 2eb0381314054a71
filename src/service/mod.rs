//! Service resolution.
//!
//! Turns the configured [`Service`] into an ordered list of validated
//! [`Endpoint`]s plus the credentials to present.
//!
//! # Sources
//!
//! | Form | Resolved |
//! |------|----------|
//! | `amqp://host` / `amqps://host` | once, when the client is built |
//! | list of `amqp(s)` URLs | once, when the client is built |
//! | `http(s)://..` | GET on every connection attempt |
//! | `file://..` | file read on every connection attempt |
//! | [`Service::lookup`] function | called on every connection attempt |
//!
//! # Example
//!
//! ```ignore
//! use mqlight::Service;
//!
//! let fixed = Service::from(vec!["amqp://bad1", "amqp://goodhost:5672"]);
//! let dynamic = Service::lookup(|| async { Ok(vec!["amqp://host".to_string()]) });
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Endpoint URL validation and credentials.
pub mod endpoint;

/// HTTP and file lookups.
pub mod lookup;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Re-exports
// ============================================================================

pub use endpoint::{AMQP_PORT, AMQPS_PORT, Credentials, Endpoint, mask_password};
pub use lookup::HTTP_LOOKUP_TIMEOUT;

// ============================================================================
// Types
// ============================================================================

/// User supplied service lookup, invoked on every connection attempt.
pub type ServiceFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync>;

// ============================================================================
// Service
// ============================================================================

/// Where the client finds its messaging service.
#[derive(Clone)]
pub enum Service {
    /// A single URL: `amqp(s)`, `http(s)` lookup or `file` lookup.
    Url(String),
    /// Candidate `amqp(s)` URLs, tried in order.
    List(Vec<String>),
    /// A lookup function.
    Lookup(ServiceFn),
}

impl Service {
    /// Wraps an async function producing candidate URLs.
    pub fn lookup<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
    {
        Self::Lookup(Arc::new(move || f().boxed()))
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(&mask_password(url)).finish(),
            Self::List(urls) => f
                .debug_tuple("List")
                .field(&urls.iter().map(|u| mask_password(u)).collect::<Vec<_>>())
                .finish(),
            Self::Lookup(_) => f.write_str("Lookup(<fn>)"),
        }
    }
}

impl From<&str> for Service {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for Service {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Vec<String>> for Service {
    fn from(urls: Vec<String>) -> Self {
        Self::List(urls)
    }
}

impl From<Vec<&str>> for Service {
    fn from(urls: Vec<&str>) -> Self {
        Self::List(urls.into_iter().map(str::to_string).collect())
    }
}

// ============================================================================
// ResolvedService
// ============================================================================

/// Output of one resolution: candidates in order plus credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Candidate endpoints, tried in order.
    pub endpoints: Vec<Endpoint>,
    /// Credentials to present, if any.
    pub credentials: Option<Credentials>,
}

// ============================================================================
// ServiceResolver
// ============================================================================

enum Source {
    Static(ResolvedService),
    Http(Url),
    File(PathBuf),
    Function(ServiceFn),
}

/// Resolves a [`Service`] into candidate endpoints.
pub struct ServiceResolver {
    source: Source,
    credentials: Option<Credentials>,
}

impl fmt::Debug for ServiceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Static(resolved) => format!("{:?}", resolved.endpoints),
            Source::Http(url) => url.to_string(),
            Source::File(path) => path.display().to_string(),
            Source::Function(_) => "<fn>".to_string(),
        };
        f.debug_struct("ServiceResolver")
            .field("source", &source)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl ServiceResolver {
    /// Creates a resolver, validating static services immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a static URL is invalid, the
    /// embedded credentials disagree, the list is empty, or a `file://`
    /// URL names a remote host.
    pub fn new(service: Service, credentials: Option<Credentials>) -> Result<Self> {
        let source = match service {
            Service::Url(raw) => match Url::parse(&raw).map(|u| (u.scheme().to_string(), u)) {
                Ok((scheme, url)) if scheme == "http" || scheme == "https" => Source::Http(url),
                Ok((scheme, url)) if scheme == "file" => Source::File(lookup::file_path(&url)?),
                _ => Source::Static(validate(&[raw], credentials.as_ref())?),
            },
            Service::List(urls) => Source::Static(validate(&urls, credentials.as_ref())?),
            Service::Lookup(f) => Source::Function(f),
        };

        Ok(Self {
            source,
            credentials,
        })
    }

    /// Produces the candidate list for one connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceLookup`] if a lookup fails, or
    /// [`Error::InvalidArgument`] if the looked up URLs are invalid.
    pub async fn resolve(&self) -> Result<ResolvedService> {
        let urls = match &self.source {
            Source::Static(resolved) => return Ok(resolved.clone()),
            Source::Http(url) => lookup::http(url).await?,
            Source::File(path) => lookup::file(path).await?,
            Source::Function(f) => f().await?,
        };
        trace!(count = urls.len(), "Service lookup returned candidates");
        validate(&urls, self.credentials.as_ref())
    }
}

/// Validates candidate URLs and agrees their credentials.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an empty list, an invalid URL or
/// disagreeing credentials.
pub fn validate(urls: &[String], explicit: Option<&Credentials>) -> Result<ResolvedService> {
    if urls.is_empty() {
        return Err(Error::invalid_argument("service list must not be empty"));
    }

    let (endpoints, embedded): (Vec<_>, Vec<_>) = urls
        .iter()
        .map(|raw| Endpoint::parse(raw))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();

    let credentials = endpoint::agree_credentials(&embedded, explicit)?;
    Ok(ResolvedService {
        endpoints,
        credentials,
    })
}

// ============================================================================
// Tests
// ============================================================================
