use crate::intent::TransmitIntent;
use crate::message::ActorAddress;

/// Errors surfaced to callers of the transmit queue.
///
/// Terminal delivery failures (overload, timeout, transport failure) are
/// never returned here; they are reported through the intent's
/// [`SendStatus`](crate::SendStatus).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransmitError {
    #[error("Address not yet transmissible: {target}")]
    Unresolved { target: ActorAddress },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Invalid configuration for {field}: {message}")]
    Config { field: String, message: String },
}

impl TransmitError {
    /// Create an unresolved-address error
    pub fn unresolved(target: ActorAddress) -> Self {
        TransmitError::Unresolved { target }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        TransmitError::Serialization {
            message: message.into(),
        }
    }

    /// Create an invalid config error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        TransmitError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if the caller may resubmit the same intent later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransmitError::Unresolved { .. } | TransmitError::Serialization { .. }
        )
    }
}

/// An intent handed back to the caller because it could not be prepared.
///
/// The caller owns the intent again and decides when to resubmit it.
/// Dropping a `Rejected` completes the intent as abandoned.
#[derive(Debug, thiserror::Error)]
#[error("Transmit {intent} rejected: {error}")]
pub struct Rejected {
    pub intent: TransmitIntent,
    #[source]
    pub error: TransmitError,
}

impl Rejected {
    pub fn new(intent: TransmitIntent, error: TransmitError) -> Self {
        Self { intent, error }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }

    /// Take the intent back for a later retry
    pub fn into_intent(self) -> TransmitIntent {
        self.intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unresolved = TransmitError::unresolved(ActorAddress::new("local-only"));
        assert!(unresolved.is_retryable());
        assert_eq!(
            unresolved.to_string(),
            "Address not yet transmissible: local-only"
        );

        let ser = TransmitError::serialization("bad payload");
        assert!(ser.is_retryable());

        let cfg = TransmitError::config("max_pending_transmits", "must be greater than 0");
        assert!(!cfg.is_retryable());
        assert!(cfg.to_string().contains("max_pending_transmits"));
    }
}
