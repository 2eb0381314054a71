//! Remote and file based service lookups.
//!
//! Both sources return a JSON document of the form
//! `{"service": ["amqp://host1", "amqp://host2"]}`; a single string is
//! accepted in place of the array.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the HTTP lookup request.
pub const HTTP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ServiceDocument {
    service: ServiceField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServiceField {
    One(String),
    Many(Vec<String>),
}

impl From<ServiceField> for Vec<String> {
    fn from(field: ServiceField) -> Self {
        match field {
            ServiceField::One(url) => vec![url],
            ServiceField::Many(urls) => urls,
        }
    }
}

// ============================================================================
// HTTP Lookup
// ============================================================================

/// Fetches the service list from an `http(s)` URL.
///
/// # Errors
///
/// Returns [`Error::ServiceLookup`] on timeout, transport failure, a non
/// 200 status or an unparseable body.
pub async fn http(url: &Url) -> Result<Vec<String>> {
    debug!(url = %url, "Looking up service over HTTP");

    let client = reqwest::Client::builder()
        .timeout(HTTP_LOOKUP_TIMEOUT)
        .build()
        .map_err(|e| Error::service_lookup(format!("http client setup failed: {e}")))?;

    let response = client.get(url.clone()).send().await.map_err(|e| {
        if e.is_timeout() {
            Error::service_lookup(format!(
                "http request to {url} timed out after {} milliseconds",
                HTTP_LOOKUP_TIMEOUT.as_millis()
            ))
        } else {
            Error::service_lookup(format!("http request to {url} failed: {e}"))
        }
    })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(Error::service_lookup(format!(
            "http request to {url} failed with a status code of {}",
            status.as_u16()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::service_lookup(format!("http request to {url} failed: {e}")))?;

    parse_document(&body).map_err(|e| {
        Error::service_lookup(format!("http request to {url} returned unparseable JSON: {e}"))
    })
}

// ============================================================================
// File Lookup
// ============================================================================

/// Converts a `file://` URL into a local path.
///
/// Only an empty host or `localhost` is accepted. Windows drive paths
/// (`file:///D:/dir/file.json`) lose their leading slash.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for any other host.
pub fn file_path(url: &Url) -> Result<PathBuf> {
    match url.host_str() {
        None | Some("") | Some("localhost") => {}
        Some(host) => {
            return Err(Error::invalid_argument(format!(
                "Unsupported URL, '{url}' file URLs must be for localhost, not '{host}'"
            )));
        }
    }

    let decoded = urlencoding::decode(url.path())
        .map_err(|e| Error::invalid_argument(format!("Unsupported URL, '{url}': {e}")))?;

    let path = match decoded.as_bytes() {
        [b'/', drive, b':', b'/', ..] if drive.is_ascii_alphabetic() => &decoded[1..],
        _ => &decoded[..],
    };
    Ok(PathBuf::from(path))
}

/// Reads the service list from a local file.
///
/// # Errors
///
/// Returns [`Error::ServiceLookup`] if the file cannot be read or parsed.
pub async fn file(path: &Path) -> Result<Vec<String>> {
    debug!(path = %path.display(), "Looking up service from file");

    let body = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::service_lookup(format!("attempt to read {} failed: {e}", path.display()))
    })?;

    parse_document(&body).map_err(|e| {
        Error::service_lookup(format!(
            "the content read from {} contained unparseable JSON: {e}",
            path.display()
        ))
    })
}

fn parse_document(body: &str) -> serde_json::Result<Vec<String>> {
    let document: ServiceDocument = serde_json::from_str(body)?;
    Ok(document.service.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: String) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        Url::parse(&format!("http://{addr}/service")).unwrap()
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn test_parse_document() {
        assert_eq!(
            parse_document(r#"{"service": ["amqp://a", "amqp://b"]}"#).unwrap(),
            vec!["amqp://a", "amqp://b"]
        );
        assert_eq!(
            parse_document(r#"{"service": "amqp://a"}"#).unwrap(),
            vec!["amqp://a"]
        );
        assert!(parse_document("{oops").is_err());
        assert!(parse_document(r#"{"services": []}"#).is_err());
    }

    #[test]
    fn test_file_path() {
        let local = Url::parse("file:///tmp/service.json").unwrap();
        assert_eq!(file_path(&local).unwrap(), PathBuf::from("/tmp/service.json"));

        let localhost = Url::parse("file://localhost/tmp/service.json").unwrap();
        assert_eq!(file_path(&localhost).unwrap(), PathBuf::from("/tmp/service.json"));

        let drive = Url::parse("file:///D:/test/path/file.json").unwrap();
        assert_eq!(file_path(&drive).unwrap(), PathBuf::from("D:/test/path/file.json"));

        let remote = Url::parse("file://remote.example.com/tmp/service.json").unwrap();
        assert!(matches!(
            file_path(&remote).unwrap_err(),
            Error::InvalidArgument { .. }
        ));
    }

    #[tokio::test]
    async fn test_http_lookup() {
        let url = serve_once(http_response("200 OK", r#"{"service":["amqp://remote"]}"#)).await;
        assert_eq!(http(&url).await.unwrap(), vec!["amqp://remote"]);
    }

    #[tokio::test]
    async fn test_http_lookup_bad_status() {
        let url = serve_once(http_response("404 Not Found", "")).await;
        let err = http(&url).await.unwrap_err();
        assert!(err.to_string().contains("status code of 404"), "{err}");
    }

    #[tokio::test]
    async fn test_http_lookup_bad_json() {
        let url = serve_once(http_response("200 OK", "{not json")).await;
        let err = http(&url).await.unwrap_err();
        assert!(err.to_string().contains("unparseable JSON"), "{err}");
    }

    #[tokio::test]
    async fn test_file_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"service": ["amqp://from-file:1234"]}}"#).unwrap();

        let services = super::file(file.path()).await.unwrap();
        assert_eq!(services, vec!["amqp://from-file:1234"]);
    }

    #[tokio::test]
    async fn test_file_lookup_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = super::file(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("unparseable JSON"));
    }

    #[tokio::test]
    async fn test_file_lookup_missing() {
        let err = super::file(Path::new("/definitely/not/here.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceLookup { .. }));
    }
}
