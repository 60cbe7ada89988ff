//! Seam between the exchange and the HTTP transport layer.

use std::time::Instant;

use http::header::{ACCEPT_ENCODING, COOKIE};
use http::{HeaderMap, Method, StatusCode, Uri};

/// Final response handed back to the transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers, including `set-cookie` and `content-type`.
    pub headers: HeaderMap,
    /// Body bytes, or `None` for "no content".
    pub body: Option<Vec<u8>>,
}

/// Per-request view of the transport.
///
/// The transport parses the request and owns the connection. The exchange
/// only reads request metadata and writes exactly one response (or closes
/// the connection).
pub trait Transport: Send {
    /// Request method.
    fn method(&self) -> &Method;

    /// Request URI.
    fn uri(&self) -> &Uri;

    /// Request headers.
    fn headers(&self) -> &HeaderMap;

    /// When the transport accepted the request. Queueing delay before the
    /// exchange existed counts against the deadline.
    fn start_time(&self) -> Instant;

    /// Write the final response.
    fn send(&mut self, response: TransportResponse);

    /// Drop the connection without a response.
    fn close_connection(&mut self);

    /// Value of the cookie `name` from the `cookie` header.
    fn cookie(&self, name: &str) -> Option<String> {
        self.headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_owned())
    }

    /// First value of the query parameter `name`. No percent-decoding.
    fn query_param(&self, name: &str) -> Option<String> {
        self.uri()
            .query()?
            .split('&')
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_owned())
    }

    /// Whether the client accepts a compressed response.
    fn accepts_compression(&self) -> bool {
        self.headers()
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|coding| coding.split(';').next().unwrap_or("").trim())
            .any(|coding| matches!(coding, "gzip" | "deflate" | "br" | "zstd"))
    }
}
