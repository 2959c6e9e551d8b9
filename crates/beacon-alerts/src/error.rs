//! Error types for the beacon-alerts crate.

use thiserror::Error;

/// Errors that can occur while evaluating thresholds or managing alert state.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid alert configuration.
    #[error("invalid alert config: {reason}")]
    InvalidConfig {
        /// The reason the config is invalid.
        reason: String,
    },

    /// No alert configuration exists for the service.
    #[error("alert config not found: {service}")]
    ConfigNotFound {
        /// The service that has no configuration.
        service: String,
    },

    /// Violation with the given ID was not found.
    #[error("violation not found: {id}")]
    ViolationNotFound {
        /// The violation ID that was not found.
        id: String,
    },

    /// The backing store failed.
    #[error("alert store error: {reason}")]
    Store {
        /// The reason the store failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors returned by notification channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The email recipient is not a valid address. Never retried.
    #[error("invalid email recipient {address:?}: {reason}")]
    InvalidRecipient {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The webhook URL is malformed or not http(s). Never retried.
    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The channel is named by the alert config but not set up in this process.
    #[error("{channel} channel is not configured")]
    ChannelUnavailable {
        /// The missing channel.
        channel: &'static str,
    },

    /// A single delivery attempt failed; eligible for retry.
    #[error("transport error: {reason}")]
    Transport {
        /// The reason the attempt failed.
        reason: String,
    },

    /// Every attempt failed.
    #[error("{channel} delivery failed after {attempts} attempts: {reason}")]
    Delivery {
        /// The channel that failed.
        channel: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The last attempt's failure.
        reason: String,
    },

    /// Delivery was cancelled before it completed.
    #[error("{channel} delivery cancelled after {attempts} attempts")]
    Cancelled {
        /// The channel that was cancelled.
        channel: &'static str,
        /// Number of attempts started before cancellation.
        attempts: u32,
    },
}

impl NotifyError {
    /// Creates a transient transport failure.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// True for failures caused by configuration rather than the remote end.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRecipient { .. }
                | Self::InvalidUrl { .. }
                | Self::ChannelUnavailable { .. }
        )
    }

    /// True if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True if delivery stopped because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_config() {
        let err = AlertError::InvalidConfig {
            reason: "service name is empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert config: service name is empty");
    }

    #[test]
    fn error_display_config_not_found() {
        let err = AlertError::ConfigNotFound {
            service: "billing".to_string(),
        };
        assert_eq!(err.to_string(), "alert config not found: billing");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: AlertError = json_err.into();
        assert!(matches!(err, AlertError::SerializationError(_)));
    }

    #[test]
    fn notify_error_classification() {
        let invalid = NotifyError::InvalidUrl {
            url: "ftp://x".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        assert!(invalid.is_config_error());
        assert!(!invalid.is_retryable());

        let transient = NotifyError::transport("connection refused");
        assert!(transient.is_retryable());
        assert!(!transient.is_config_error());

        let cancelled = NotifyError::Cancelled {
            channel: "webhook",
            attempts: 1,
        };
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn notify_error_display_delivery() {
        let err = NotifyError::Delivery {
            channel: "email",
            attempts: 3,
            reason: "smtp timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "email delivery failed after 3 attempts: smtp timeout"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AlertError>();
        assert_send_sync::<NotifyError>();
    }
}
