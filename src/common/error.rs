//! Common Error Types
//!
//! Crate-wide error taxonomy. Every fallible operation surfaces which
//! guard or verification step rejected it.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::traits::StorageError;

/// Root error type for the swap core
#[derive(Debug, Error)]
pub enum SwapError {
    /// Network/RPC failure, safe to retry with backoff
    #[error("transient error: {0}")]
    Transient(String),

    /// Signature or authorization rejected. Fatal for that authorization
    /// only: the caller must obtain a fresh one.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// A state-machine guard rejected the operation. Not retried.
    #[error("precondition violated ({guard}): {reason}")]
    PreconditionViolated {
        guard: &'static str,
        reason: String,
    },

    /// SPV proof did not match the committed header. Indicates fraud or
    /// relay corruption; must never be silently retried as success.
    #[error("proof mismatch: {0}")]
    ProofMismatch(String),

    /// Cooperative cancellation. Distinct from failure.
    #[error("operation cancelled")]
    Cancelled,

    /// Unknown swap / record
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input or decoded data
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SwapError {
    /// Create a transient (retryable) error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a signature error
    pub fn signature(msg: impl Into<String>) -> Self {
        Self::SignatureInvalid(msg.into())
    }

    /// Create a guard rejection naming the guard that failed
    pub fn precondition(guard: &'static str, reason: impl Into<String>) -> Self {
        Self::PreconditionViolated {
            guard,
            reason: reason.into(),
        }
    }

    /// Create a proof mismatch error
    pub fn proof_mismatch(msg: impl Into<String>) -> Self {
        Self::ProofMismatch(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this error is safe to retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapError::Transient(_) | SwapError::Storage(StorageError::Connection(_))
        )
    }
}

/// Result type alias using SwapError
pub type Result<T> = std::result::Result<T, SwapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SwapError::transient("rpc timed out").is_retryable());
        assert!(!SwapError::signature("bad key").is_retryable());
        assert!(!SwapError::proof_mismatch("root differs").is_retryable());
        assert!(!SwapError::Cancelled.is_retryable());
        assert!(!SwapError::precondition("commit", "not in CREATED").is_retryable());
    }

    #[test]
    fn test_guard_named_in_message() {
        let err = SwapError::precondition("claim", "escrow expired");
        assert!(err.to_string().contains("claim"));
        assert!(err.to_string().contains("escrow expired"));
    }
}
