//! Retry classification
//!
//! The runtime never schedules retries itself. Callers hand a failed call's
//! error to [`RetryClassifier::retry`] and resubmit when it answers `true`.

use crate::error::{Error, ErrorKind, TransportCode};
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether an error is worth retrying
pub type RetryCheck = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Statuses caused by destination-side trouble
const SERVER_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Rate limiting
const TOO_MANY_REQUESTS: u16 = 429;

/// Transport failures that usually heal on their own
const RETRYABLE_CODES: [TransportCode; 7] = [
    TransportCode::ConnectionReset,
    TransportCode::ConnectionRefused,
    TransportCode::ConnectionAborted,
    TransportCode::TimedOut,
    TransportCode::AddressResolution,
    TransportCode::HostUnreachable,
    TransportCode::NameNotFound,
];

/// Server errors (500, 502, 503, 504)
pub fn server_error(err: &Error) -> bool {
    matches!(err, Error::BadRequest { status: Some(s), .. } if SERVER_STATUSES.contains(s))
}

/// Rate limited by the destination (429)
pub fn rate_limited(err: &Error) -> bool {
    matches!(err, Error::BadRequest { status: Some(TOO_MANY_REQUESTS), .. })
}

/// Connection-level failures
pub fn transport(err: &Error) -> bool {
    err.transport_code()
        .map(|code| RETRYABLE_CODES.contains(&code))
        .unwrap_or(false)
}

/// Lock contention
pub fn resource_locked(err: &Error) -> bool {
    err.kind() == Some(ErrorKind::ResourceLocked)
}

/// Ordered set of retry predicates
#[derive(Clone)]
pub struct RetryClassifier {
    checks: Vec<RetryCheck>,
}

impl RetryClassifier {
    /// Classifier with the default predicates
    pub fn new() -> Self {
        Self {
            checks: vec![
                Arc::new(server_error),
                Arc::new(rate_limited),
                Arc::new(transport),
                Arc::new(resource_locked),
            ],
        }
    }

    /// Append a predicate; evaluated after the existing ones
    pub fn push(&mut self, check: RetryCheck) {
        self.checks.push(check);
    }

    /// True when any predicate accepts the error
    pub fn retry(&self, err: &Error) -> bool {
        self.checks.iter().any(|check| check(err))
    }

    /// Number of registered predicates
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Never true in practice; the defaults are always present
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryClassifier")
            .field("checks", &self.checks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Error {
        Error::http_status("test", code, "")
    }

    #[test]
    fn test_retryable_statuses() {
        let classifier = RetryClassifier::new();

        for code in [429, 500, 502, 503, 504] {
            assert!(classifier.retry(&status(code)), "status {} should retry", code);
        }
        for code in [400, 401, 404, 422, 501] {
            assert!(!classifier.retry(&status(code)), "status {} should not retry", code);
        }
    }

    #[test]
    fn test_transport_codes() {
        let classifier = RetryClassifier::new();

        for code in RETRYABLE_CODES {
            let err = Error::transport("test", code, "boom");
            assert!(classifier.retry(&err), "{} should retry", code);
        }

        let err = Error::transport("test", TransportCode::Other, "boom");
        assert!(!classifier.retry(&err));
    }

    #[test]
    fn test_resource_locked_and_taxonomy() {
        let classifier = RetryClassifier::new();

        assert!(classifier.retry(&Error::resource_locked("test", "key `test:k` is locked")));
        assert!(!classifier.retry(&Error::validation("test", "setting \"apiKey\" is required")));
        assert!(!classifier.retry(&Error::rejected("test", "nope")));
        assert!(!classifier.retry(&Error::UnsupportedChannel {
            integration: "test".to_string(),
            channel: None,
        }));
    }

    #[test]
    fn test_custom_check_is_appended() {
        let mut classifier = RetryClassifier::new();
        assert_eq!(classifier.len(), 4);
        assert!(!classifier.retry(&status(409)));

        classifier.push(Arc::new(|err: &Error| err.status() == Some(409)));
        assert_eq!(classifier.len(), 5);
        assert!(classifier.retry(&status(409)));
    }
}
