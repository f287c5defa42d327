//! Instance lifecycle events
//!
//! Every [`Integration`](crate::Integration) owns a broadcast channel. Sends
//! never block and are dropped silently when nobody is subscribed.

use serde::Serialize;
use uuid::Uuid;

/// Event published on an adapter instance's channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdapterEvent {
    /// Emitted right before a request is transmitted
    Request {
        /// Correlates the request with its response
        request_id: Uuid,
        /// Adapter name
        adapter: String,
        /// HTTP method
        method: String,
        /// Absolute URL
        url: String,
    },
    /// Emitted once response headers arrive, whatever the status
    Response {
        /// Matches the preceding `Request`
        request_id: Uuid,
        /// Adapter name
        adapter: String,
        /// HTTP method
        method: String,
        /// Absolute URL
        url: String,
        /// HTTP status
        status: u16,
    },
    /// Releasing a lock failed; the lease will still expire on its own
    UnlockError {
        /// Adapter name
        adapter: String,
        /// Namespaced lock key
        key: String,
        /// Store error
        error: String,
    },
}
