//! Error types for the end-to-end encryption engine.

use thiserror::Error;

/// Errors raised by key management and message encryption.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Platform cryptography is unavailable or a primitive failed outright.
    #[error("Crypto capability unavailable: {0}")]
    Capability(String),

    /// No local identity key pair has been initialized.
    #[error("No local identity key pair")]
    NoLocalIdentity,

    /// No key has been provisioned for the room.
    #[error("No room key for: {0}")]
    NoRoomKey(String),

    /// A peer public key was required but none was supplied.
    #[error("Peer public key is required")]
    MissingPeerKey,

    /// Authentication failed - wrong key or tampered ciphertext.
    #[error("Authentication failed - wrong key or data may be tampered")]
    Authentication,

    /// Envelope is structurally invalid (too short, empty).
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Malformed base64 or UTF-8.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Key material could not be imported.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Durable store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CryptoError {
    /// True for missing-key conditions a caller can fix by provisioning
    /// (initializing an identity, joining a room's key flow, fetching a peer key).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CryptoError::NoLocalIdentity | CryptoError::NoRoomKey(_) | CryptoError::MissingPeerKey
        )
    }

    /// True when decryption was rejected by the AEAD tag check.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CryptoError::Authentication)
    }
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
