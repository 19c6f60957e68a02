//! Error types for `VitalVault` operations.

use std::fmt;
use uuid::Uuid;

/// Main error type for `VitalVault` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key material could not be derived (missing or unusable secret)
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption operation failed (malformed nonce or plaintext)
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Authentication tag verification failed (data may be corrupted or tampered)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Another stored patient already carries the same legal ID
    #[error("a patient with this legal ID already exists")]
    DuplicateRecord,

    /// No patient or import job with the given id
    #[error("record not found: {0}")]
    NotFound(Uuid),

    /// A required attribute is missing or an attribute value is not recognised
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending attribute
        field: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// A stored lookup digest could not be parsed
    #[error("invalid lookup digest: {0}")]
    InvalidDigest(String),

    /// Storage backend operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl Error {
    /// Returns `true` for errors raised while opening a ciphertext.
    #[must_use]
    pub const fn is_decryption(&self) -> bool {
        matches!(self, Self::DecryptionFailed(_) | Self::AuthenticationFailed)
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors returned by [`RecordStore`](crate::store::RecordStore) backends.
#[derive(Debug)]
pub enum StoreError {
    /// Backend query or connection failure
    Backend(String),

    /// A uniqueness constraint rejected the write
    UniqueViolation(String),

    /// A stored value could not be converted to or from its column shape
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "backend failure: {msg}"),
            Self::UniqueViolation(what) => write!(f, "unique constraint violated: {what}"),
            Self::Serialization(msg) => write!(f, "serialization failure: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
