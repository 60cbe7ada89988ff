//! Mapping from terminal outcomes to transport responses.

use http::StatusCode;
use tracing::{debug, error, warn};

use crate::core::Exchange;

/// One method per terminal outcome; each writes the transport response.
///
/// `Exchange::dispatch` calls exactly one of these, exactly once per
/// exchange. Every method has a default, so custom listeners override only
/// what they need.
pub trait Listener: Send + Sync {
    /// Handler finished normally: send whatever it set up.
    fn on_done(&self, exchange: &mut Exchange) {
        exchange.send_response();
    }

    /// Deadline exhausted.
    fn on_timeout(&self, exchange: &mut Exchange) {
        debug!(
            exchange_id = exchange.id(),
            handler = exchange.handler_name(),
            "exchange timed out"
        );
        exchange.send_status(StatusCode::BAD_GATEWAY);
    }

    /// Unhandled handler failure.
    fn on_exception(&self, exchange: &mut Exchange) {
        if let Some(cause) = exchange.failure_cause() {
            error!(
                exchange_id = exchange.id(),
                handler = exchange.handler_name(),
                error = %cause,
                "handler failed"
            );
        }
        exchange.send_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// Request payload did not fit the request buffer.
    fn on_request_overflow(&self, exchange: &mut Exchange) {
        exchange.send_status(StatusCode::BAD_REQUEST);
    }

    /// Response payload did not fit the response buffer.
    fn on_response_overflow(&self, exchange: &mut Exchange) {
        warn!(
            exchange_id = exchange.id(),
            handler = exchange.handler_name(),
            capacity = exchange.response_buffer().capacity(),
            "response buffer overflow"
        );
        exchange.send_status(StatusCode::BAD_GATEWAY);
    }

    /// Pool could not admit the work.
    fn on_rejected(&self, exchange: &mut Exchange) {
        exchange.send_status(StatusCode::TOO_MANY_REQUESTS);
    }

    /// Client went away; nothing to send.
    fn on_connection_closed(&self, exchange: &mut Exchange) {
        exchange.close_connection();
    }

    /// Execution unit interrupted. Treated like an unknown outcome.
    fn on_interrupted(&self, exchange: &mut Exchange) {
        self.on_unknown(exchange);
    }

    /// Dispatched without any terminal outcome.
    fn on_unknown(&self, exchange: &mut Exchange) {
        exchange.send_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}

/// Listener using every default mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultListener;

impl Listener for DefaultListener {}
