//! Error types for threshold signing operations

use thiserror::Error;

/// Result type alias for signing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a threshold signature
#[derive(Debug, Error)]
pub enum Error {
    /// Party or nonce could not be resolved
    #[error("Key resolution failed: {0}")]
    KeyResolution(String),

    /// Independent recomputation disagrees with the claimed result
    #[error("Result mismatch: {0}")]
    ResultMismatch(String),

    /// Remote call to a partner failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Signature verification failed
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Nonce already consumed by a different message
    #[error("Nonce {0} already used for a different message")]
    NonceReuse(String),

    /// Claimed owner does not match the embedded public key
    #[error("Owner mismatch: claimed {claimed}, derived {derived}")]
    OwnerMismatch { claimed: String, derived: String },

    /// Signer is not a member of the request's party
    #[error("Unknown signer: {0}")]
    UnknownSigner(String),

    /// Malformed signature encoding
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// Request not found
    #[error("Request not found: {0}")]
    RequestNotFound(String),

    /// No handler registered for an RPC method
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Failure reported by a remote node that has no local equivalent
    #[error("Remote error ({kind}): {message}")]
    Remote { kind: String, message: String },
}

impl Error {
    /// Stable identifier used when an error crosses the RPC boundary
    pub fn kind(&self) -> &str {
        match self {
            Error::KeyResolution(_) => "key_resolution",
            Error::ResultMismatch(_) => "result_mismatch",
            Error::Transport(_) => "transport",
            Error::VerificationFailed(_) => "verification_failed",
            Error::NonceReuse(_) => "nonce_reuse",
            Error::OwnerMismatch { .. } => "owner_mismatch",
            Error::UnknownSigner(_) => "unknown_signer",
            Error::InvalidSignature(_) => "invalid_signature",
            Error::Crypto(_) => "crypto",
            Error::Store(_) => "store",
            Error::RequestNotFound(_) => "request_not_found",
            Error::UnknownMethod(_) => "unknown_method",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Serialization(_) => "serialization",
            Error::Deserialization(_) => "deserialization",
            Error::Remote { kind, .. } => kind,
        }
    }

    /// Rebuild an error reported by a remote node
    pub fn from_remote(kind: &str, message: String) -> Self {
        match kind {
            "key_resolution" => Error::KeyResolution(message),
            "result_mismatch" => Error::ResultMismatch(message),
            "nonce_reuse" => Error::NonceReuse(message),
            "unknown_method" => Error::UnknownMethod(message),
            "verification_failed" => Error::VerificationFailed(message),
            _ => Error::Remote {
                kind: kind.to_string(),
                message,
            },
        }
    }

    /// Whether the partner declined to sign, as opposed to being unreachable
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::ResultMismatch(_) | Error::NonceReuse(_) | Error::KeyResolution(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_round_trip_keeps_rejections() {
        let err = Error::ResultMismatch("price drifted".into());
        let rebuilt = Error::from_remote(err.kind(), "price drifted".into());

        assert!(matches!(rebuilt, Error::ResultMismatch(_)));
        assert!(rebuilt.is_rejection());
    }

    #[test]
    fn test_unknown_remote_kind() {
        let rebuilt = Error::from_remote("store", "disk full".into());
        assert_eq!(rebuilt.kind(), "store");
        assert!(!rebuilt.is_rejection());
    }
}
