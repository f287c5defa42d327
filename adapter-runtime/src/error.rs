//! Error types for adapters

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status marker carried by messages received on a channel the adapter does not accept
pub const MESSAGE_SENT_CLIENT_SIDE: &str = "MESSAGE_SENT_CLIENT_SIDE";

/// Machine-readable error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Static configuration defect (missing or empty required setting)
    InvalidSettings,
    /// Destination returned an error status or the transport failed
    BadRequest,
    /// A single message lacks something it needs
    MessageRejected,
    /// Lock contention
    ResourceLocked,
}

impl ErrorKind {
    /// Wire code for the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidSettings => "INVALID_SETTINGS",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::MessageRejected => "MESSAGE_REJECTED",
            ErrorKind::ResourceLocked => "RESOURCE_LOCKED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks errors raised by the request pipeline, as opposed to validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// The destination (or the path to it) produced the failure
    Destination,
}

/// Transport failure code, named after the classic errno identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportCode {
    /// ECONNRESET
    ConnectionReset,
    /// ECONNREFUSED
    ConnectionRefused,
    /// ECONNABORTED (also used for request timeouts)
    ConnectionAborted,
    /// ETIMEDOUT
    TimedOut,
    /// EAI_AGAIN
    AddressResolution,
    /// EHOSTUNREACH
    HostUnreachable,
    /// ENOTFOUND
    NameNotFound,
    /// Anything else
    Other,
}

const EHOSTUNREACH: i32 = 113;

impl TransportCode {
    /// Errno-style code
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::ConnectionReset => "ECONNRESET",
            TransportCode::ConnectionRefused => "ECONNREFUSED",
            TransportCode::ConnectionAborted => "ECONNABORTED",
            TransportCode::TimedOut => "ETIMEDOUT",
            TransportCode::AddressResolution => "EAI_AGAIN",
            TransportCode::HostUnreachable => "EHOSTUNREACH",
            TransportCode::NameNotFound => "ENOTFOUND",
            TransportCode::Other => "EUNKNOWN",
        }
    }

    /// Classify a transport failure.
    ///
    /// Timeouts always normalize to `ECONNABORTED`.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportCode::ConnectionAborted;
        }

        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if let Some(code) = Self::from_io(io) {
                    return code;
                }
            }

            let text = cause.to_string().to_lowercase();
            if text.contains("temporary failure in name resolution") || text.contains("try again") {
                return TransportCode::AddressResolution;
            }
            if text.contains("dns error") || text.contains("failed to lookup address") {
                return TransportCode::NameNotFound;
            }

            source = cause.source();
        }

        TransportCode::Other
    }

    fn from_io(io: &std::io::Error) -> Option<Self> {
        use std::io::ErrorKind as Io;

        match io.kind() {
            Io::ConnectionReset => Some(TransportCode::ConnectionReset),
            Io::ConnectionRefused => Some(TransportCode::ConnectionRefused),
            Io::ConnectionAborted => Some(TransportCode::ConnectionAborted),
            Io::TimedOut => Some(TransportCode::TimedOut),
            _ if io.raw_os_error() == Some(EHOSTUNREACH) => Some(TransportCode::HostUnreachable),
            _ => None,
        }
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or empty required setting; never retryable
    #[error("{integration}: {message}")]
    Validation {
        /// Adapter name
        integration: String,
        /// Reason
        message: String,
    },

    /// Message dropped because it lacks a required attribute or is disabled
    #[error("{integration}: {message}")]
    Rejected {
        /// Adapter name
        integration: String,
        /// Reason
        message: String,
    },

    /// Destination returned a non-2xx status or the transport failed
    #[error("{integration}: {message}")]
    BadRequest {
        /// Adapter name
        integration: String,
        /// Reason
        message: String,
        /// HTTP status code
        status: Option<u16>,
        /// Response body
        body: Option<String>,
        /// Transport failure code
        code: Option<TransportCode>,
        /// Set for errors raised by the request pipeline
        origin: Option<Origin>,
    },

    /// Lock held by someone else; always retryable
    #[error("{integration}: {message}")]
    ResourceLocked {
        /// Adapter name
        integration: String,
        /// Reason
        message: String,
    },

    /// Message arrived on a channel the adapter does not accept
    #[error("{integration}: this message was sent client side")]
    UnsupportedChannel {
        /// Adapter name
        integration: String,
        /// Channel the message arrived on
        channel: Option<String>,
    },

    /// Caller cancelled an in-flight request
    #[error("{integration}: request cancelled")]
    Cancelled {
        /// Adapter name
        integration: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Validation error for `integration`
    pub fn validation(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            integration: integration.into(),
            message: message.into(),
        }
    }

    /// Rejection for `integration`
    pub fn rejected(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Rejected {
            integration: integration.into(),
            message: message.into(),
        }
    }

    /// Bad request without HTTP context
    pub fn bad_request(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BadRequest {
            integration: integration.into(),
            message: message.into(),
            status: None,
            body: None,
            code: None,
            origin: None,
        }
    }

    /// Bad request carrying the destination's status and body
    pub fn http_status(
        integration: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        let integration = integration.into();
        Error::BadRequest {
            message: format!("Failed {} request: {}", integration, status),
            integration,
            status: Some(status),
            body: Some(body.into()),
            code: None,
            origin: Some(Origin::Destination),
        }
    }

    /// Transport failure from the request pipeline
    pub fn transport(integration: impl Into<String>, code: TransportCode, message: impl Into<String>) -> Self {
        Error::BadRequest {
            integration: integration.into(),
            message: message.into(),
            status: None,
            body: None,
            code: Some(code),
            origin: Some(Origin::Destination),
        }
    }

    /// Lock contention
    pub fn resource_locked(integration: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ResourceLocked {
            integration: integration.into(),
            message: message.into(),
        }
    }

    /// Machine-readable kind, if this error belongs to the public taxonomy
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Validation { .. } => Some(ErrorKind::InvalidSettings),
            Error::Rejected { .. } => Some(ErrorKind::MessageRejected),
            Error::BadRequest { .. } => Some(ErrorKind::BadRequest),
            Error::ResourceLocked { .. } => Some(ErrorKind::ResourceLocked),
            _ => None,
        }
    }

    /// Adapter name the error was raised for
    pub fn integration(&self) -> Option<&str> {
        match self {
            Error::Validation { integration, .. }
            | Error::Rejected { integration, .. }
            | Error::BadRequest { integration, .. }
            | Error::ResourceLocked { integration, .. }
            | Error::UnsupportedChannel { integration, .. }
            | Error::Cancelled { integration } => Some(integration),
            _ => None,
        }
    }

    /// HTTP-style status. Validation and rejections report 400.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Validation { .. } | Error::Rejected { .. } => Some(400),
            Error::BadRequest { status, .. } => *status,
            _ => None,
        }
    }

    /// Non-numeric status marker
    pub fn status_marker(&self) -> Option<&'static str> {
        match self {
            Error::UnsupportedChannel { .. } => Some(MESSAGE_SENT_CLIENT_SIDE),
            _ => None,
        }
    }

    /// Response body returned by the destination
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::BadRequest { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// Transport failure code
    pub fn transport_code(&self) -> Option<TransportCode> {
        match self {
            Error::BadRequest { code, .. } => *code,
            _ => None,
        }
    }

    /// Origin marker
    pub fn origin(&self) -> Option<Origin> {
        match self {
            Error::BadRequest { origin, .. } => *origin,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_prefixed_with_integration() {
        let err = Error::rejected("Segment", "message attribute \"userId\" is required");
        assert_eq!(
            err.to_string(),
            "Segment: message attribute \"userId\" is required"
        );
        assert_eq!(err.kind(), Some(ErrorKind::MessageRejected));
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_http_status_error() {
        let err = Error::http_status("Segment", 503, "unavailable");
        assert_eq!(err.kind().map(|k| k.as_str()), Some("BAD_REQUEST"));
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.body(), Some("unavailable"));
        assert_eq!(err.origin(), Some(Origin::Destination));
        assert_eq!(err.to_string(), "Segment: Failed Segment request: 503");
    }

    #[test]
    fn test_unsupported_channel_marker() {
        let err = Error::UnsupportedChannel {
            integration: "Segment".to_string(),
            channel: Some("client".to_string()),
        };
        assert_eq!(err.kind(), None);
        assert_eq!(err.status(), None);
        assert_eq!(err.status_marker(), Some(MESSAGE_SENT_CLIENT_SIDE));
    }

    #[test]
    fn test_io_classification() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(
            TransportCode::from_io(&refused),
            Some(TransportCode::ConnectionRefused)
        );

        let unreachable = std::io::Error::from_raw_os_error(EHOSTUNREACH);
        assert_eq!(
            TransportCode::from_io(&unreachable),
            Some(TransportCode::HostUnreachable)
        );

        let other = std::io::Error::from(std::io::ErrorKind::InvalidData);
        assert_eq!(TransportCode::from_io(&other), None);
    }
}
