//! In-memory transport for tests and local development.

use std::sync::Arc;
use std::time::Instant;

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;

use crate::core::{Transport, TransportResponse};

#[derive(Debug, Default)]
struct Recorded {
    responses: Vec<TransportResponse>,
    closed: bool,
}

/// Transport backed by plain values; responses land in a [`ResponseProbe`].
#[derive(Debug)]
pub struct InMemoryTransport {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    start: Instant,
    recorded: Arc<Mutex<Recorded>>,
}

impl InMemoryTransport {
    /// Request with the given method and URI, started now.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> (Self, ResponseProbe) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let transport = Self {
            method,
            uri,
            headers: HeaderMap::new(),
            start: Instant::now(),
            recorded: Arc::clone(&recorded),
        };
        (transport, ResponseProbe { recorded })
    }

    /// `GET` request for `uri`. An unparsable URI falls back to `/`.
    #[must_use]
    pub fn get(uri: &str) -> (Self, ResponseProbe) {
        Self::new(Method::GET, uri.parse().unwrap_or_default())
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Override the request start time.
    #[must_use]
    pub const fn with_start_time(mut self, start: Instant) -> Self {
        self.start = start;
        self
    }
}

impl Transport for InMemoryTransport {
    fn method(&self) -> &Method {
        &self.method
    }

    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn start_time(&self) -> Instant {
        self.start
    }

    fn send(&mut self, response: TransportResponse) {
        self.recorded.lock().responses.push(response);
    }

    fn close_connection(&mut self) {
        self.recorded.lock().closed = true;
    }
}

/// Observer for what an [`InMemoryTransport`] was asked to do.
#[derive(Debug, Clone)]
pub struct ResponseProbe {
    recorded: Arc<Mutex<Recorded>>,
}

impl ResponseProbe {
    /// First response sent, if any.
    #[must_use]
    pub fn response(&self) -> Option<TransportResponse> {
        self.recorded.lock().responses.first().cloned()
    }

    /// Status of the first response sent, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.recorded.lock().responses.first().map(|r| r.status)
    }

    /// Number of responses sent.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.recorded.lock().responses.len()
    }

    /// Whether the connection was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.recorded.lock().closed
    }
}
