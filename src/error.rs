use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::keystore::KeyStoreError;
use crate::directive::DirectiveType;

impl From<serde_json::Error> for BarkError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageError(format!("JSON serialization error: {}", err))
    }
}

impl From<KeyStoreError> for BarkError {
    fn from(err: KeyStoreError) -> Self {
        Self::KeyUnavailable(err.to_string())
    }
}

/// Why a directive's signature was rejected.
///
/// Forensic tooling needs to tell an absent or unparsable signature apart
/// from one that parses but does not match the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureFault {
    Missing,
    Malformed(String),
    Mismatch,
}

impl fmt::Display for SignatureFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureFault::Missing => write!(f, "signature is missing"),
            SignatureFault::Malformed(reason) => write!(f, "signature is malformed ({})", reason),
            SignatureFault::Mismatch => write!(f, "signature does not match payload"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),
}

#[derive(Error, Debug)]
pub enum BarkError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(SignatureFault),

    #[error("Directive expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Directive dimensions {0:?} are not permitted")]
    UnauthorizedDimension(Vec<String>),

    #[error("Unsupported directive type: {0}")]
    UnsupportedType(DirectiveType),

    #[error("Key material unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Directive not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Nonce {0} has already been consumed")]
    NonceReplay(u64),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Expiration of {requested}s exceeds maximum of {max}s")]
    ExpirationTooLong { requested: i64, max: i64 },

    #[error("Expiration offset of {0}s is outside the representable range")]
    ExpirationOutOfRange(i64),

    #[error("Nonce space exhausted")]
    NonceExhausted,

    #[error("Directive handler failed: {0}")]
    HandlerFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BarkError {
    /// True for the authorization failures that are never retried or downgraded.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            BarkError::InvalidSignature(_)
                | BarkError::Expired(_)
                | BarkError::UnauthorizedDimension(_)
                | BarkError::UnsupportedType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BarkError>;
