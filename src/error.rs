//! # Error Handling Module
//!
//! Structured error types for the timeline forwarding service. Mirrors the
//! shape of errors used by the rest of the stack: each variant carries the
//! context a caller needs to decide whether to retry, drop, or surface the
//! error as a metric.

use thiserror::Error;

/// Main error type for the timeline forwarding service.
#[derive(Error, Debug)]
pub enum TimelineError {
    /// Invalid or missing configuration; fatal at `start`.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Transient network failure talking to the Timeline Server. Always
    /// retryable; the poster backs off linearly and pushes the entity back
    /// to the front of the posting queue.
    #[error("network error posting to timeline server: {message}")]
    Network {
        message: String,
        endpoint: Option<String>,
        status_code: Option<u16>,
    },

    /// The Timeline Server accepted the HTTP request but returned one or
    /// more per-event errors in the response body. Permanent: never
    /// retried.
    #[error("timeline server rejected entity: {message}")]
    Rejection { message: String, errors: Vec<String> },

    /// Domain (ACL namespace) setup failed. Non-fatal: the service
    /// continues posting entities without a domain id.
    #[error("domain setup failed: {message}")]
    Domain { message: String },

    /// The worker was cancelled/interrupted and must unwind.
    #[error("timeline poster cancelled")]
    Cancelled,

    /// JSON (de)serialization failure of an entity, event, or domain.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Internal invariant violation: should not happen in correct usage.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TimelineError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn domain<S: Into<String>>(message: S) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error category for metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            TimelineError::Configuration { .. } => "configuration",
            TimelineError::Network { .. } => "network",
            TimelineError::Rejection { .. } => "rejection",
            TimelineError::Domain { .. } => "domain",
            TimelineError::Cancelled => "cancelled",
            TimelineError::Serialization { .. } => "serialization",
            TimelineError::Internal { .. } => "internal",
        }
    }

    /// Whether the poster should retry this error by pushing the entity
    /// back to the head of the posting queue. Rejections are permanent;
    /// everything network-shaped is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TimelineError::Network { .. })
    }
}

impl From<serde_json::Error> for TimelineError {
    fn from(err: serde_json::Error) -> Self {
        TimelineError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for TimelineError {
    fn from(err: reqwest::Error) -> Self {
        TimelineError::Network {
            message: err.to_string(),
            endpoint: err.url().map(|u| u.to_string()),
            status_code: err.status().map(|s| s.as_u16()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TimelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_retryable() {
        let err = TimelineError::Network {
            message: "connect refused".into(),
            endpoint: None,
            status_code: None,
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), "network");
    }

    #[test]
    fn rejections_are_not_retryable() {
        let err = TimelineError::Rejection {
            message: "bad entity".into(),
            errors: vec!["TIMELINE_ERROR".into()],
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "rejection");
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = TimelineError::configuration("batch size must be positive");
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "configuration");
    }
}
