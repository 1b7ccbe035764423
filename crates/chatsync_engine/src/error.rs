//! Error types for the synchronization engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Typed failure of a difference fetch.
///
/// Transports return these instead of panicking; the coordinator decides
/// between retrying with backoff and escalating to the owner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether retrying can plausibly succeed.
        retryable: bool,
    },

    /// The request timed out.
    #[error("difference request timed out")]
    Timeout,

    /// The remote cannot enumerate a gap this large; the stream's local
    /// state must be reloaded wholesale.
    #[error("remote cannot enumerate the gap")]
    GapTooLarge,

    /// The response violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FetchError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying this fetch can plausibly succeed.
    ///
    /// Non-retryable failures escalate to the owner the same way an
    /// unenumerable gap does: the stream's state must be reloaded.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { retryable, .. } => *retryable,
            FetchError::Timeout => true,
            FetchError::GapTooLarge => false,
            FetchError::Protocol(_) => false,
        }
    }
}

/// Errors surfaced by the engine's public handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine's loop has stopped; commands can no longer be delivered.
    #[error("engine is not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FetchError::transport_retryable("connection reset").is_retryable());
        assert!(!FetchError::transport_fatal("bad certificate").is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(!FetchError::GapTooLarge.is_retryable());
        assert!(!FetchError::Protocol("wrong stream".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            FetchError::GapTooLarge.to_string(),
            "remote cannot enumerate the gap"
        );
        assert_eq!(
            FetchError::transport_retryable("dns failure").to_string(),
            "transport error: dns failure"
        );
    }
}
