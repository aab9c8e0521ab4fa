//! Reserved routing keys and the transfer route-key codec.
//!
//! A routing key is an opaque string addressing a message or channel to a
//! logical endpoint on the receiver. Transfer metadata rides inside the key
//! itself; this module is the only place that builds or parses those keys so
//! the encoding cannot drift between call sites.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Channel route prefix for managed file transfers:
/// `<prefix><url-encoded-name>/<byte-length>/<request-id>`.
pub const FILE_ROUTE_PREFIX: &str = "/tether/transfer/file/";

/// Channel route prefix for raw stream transfers: `<prefix><request-id>`.
pub const STREAM_ROUTE_PREFIX: &str = "/tether/transfer/stream/";

/// Message route for remote app-launch requests.
pub const LAUNCH_ROUTE: &str = "/tether/launch-app";

/// Message route carrying relayed HTTP requests.
pub const HTTP_REQUEST_ROUTE: &str = "/tether/http-request";

/// Message route carrying relayed HTTP responses.
pub const HTTP_RESPONSE_ROUTE: &str = "/tether/http-response";

/// Characters escaped in the name segment. Everything non-alphanumeric except
/// a small safe set, so the embedded name can never produce a spurious `/`.
const NAME_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route {0:?} does not carry the expected prefix")]
    WrongPrefix(String),
    #[error("route {0:?} is missing segments")]
    MissingSegments(String),
    #[error("invalid byte length in route: {0}")]
    BadLength(String),
}

/// Metadata of a file-mode transfer, flattened into the route key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRoute {
    /// Logical name of the file on the sender side.
    pub name: Option<String>,
    /// Advertised byte length, verified by the receiver.
    pub length: u64,
    /// Correlates the transfer with its completion callbacks.
    pub request_id: String,
}

impl FileRoute {
    pub fn new(name: &str, length: u64, request_id: impl Into<String>) -> Self {
        Self {
            name: Some(name.to_owned()),
            length,
            request_id: request_id.into(),
        }
    }

    /// Builds the channel route key for this transfer.
    pub fn encode(&self) -> String {
        let name = self.name.as_deref().unwrap_or_default();
        let encoded = utf8_percent_encode(name, NAME_SEGMENT);
        format!(
            "{FILE_ROUTE_PREFIX}{encoded}/{}/{}",
            self.length, self.request_id
        )
    }

    /// Reverses [`encode`](Self::encode). A name that fails percent-decoding
    /// is dropped (logged) rather than failing the transfer.
    pub fn decode(route: &str) -> Result<Self, RouteError> {
        let rest = route
            .strip_prefix(FILE_ROUTE_PREFIX)
            .ok_or_else(|| RouteError::WrongPrefix(route.to_owned()))?;
        let mut pieces = rest.splitn(3, '/');
        let raw_name = pieces
            .next()
            .ok_or_else(|| RouteError::MissingSegments(route.to_owned()))?;
        let raw_length = pieces
            .next()
            .ok_or_else(|| RouteError::MissingSegments(route.to_owned()))?;
        let request_id = pieces
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RouteError::MissingSegments(route.to_owned()))?;

        let length: u64 = raw_length
            .parse()
            .map_err(|_| RouteError::BadLength(raw_length.to_owned()))?;

        let name = match percent_decode_str(raw_name).decode_utf8() {
            Ok(name) => Some(name.into_owned()),
            Err(e) => {
                tracing::warn!(route, error = %e, "failed to decode transfer name");
                None
            }
        };

        Ok(Self {
            name,
            length,
            request_id: request_id.to_owned(),
        })
    }
}

/// Builds the route key for a raw stream transfer.
pub fn stream_route(request_id: &str) -> String {
    format!("{STREAM_ROUTE_PREFIX}{request_id}")
}

/// Extracts the request id from a stream route key.
pub fn decode_stream_route(route: &str) -> Result<String, RouteError> {
    let id = route
        .strip_prefix(STREAM_ROUTE_PREFIX)
        .ok_or_else(|| RouteError::WrongPrefix(route.to_owned()))?;
    if id.is_empty() {
        return Err(RouteError::MissingSegments(route.to_owned()));
    }
    Ok(id.to_owned())
}

/// Generates a request id: unix millis plus a random suffix, unique enough to
/// key concurrent outstanding requests across an unreliable link.
pub fn request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{millis}-{:016x}", rand::random::<u64>())
}
