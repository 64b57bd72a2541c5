//! Key handles.
//!
//! Handles carry exported key material in its interchange form: SPKI DER for
//! public keys, PKCS8 DER for private keys, raw bytes for symmetric keys.
//! Handles are only constructed by a [`CryptoProvider`](crate::provider::CryptoProvider)
//! import or generation, so holding one means the bytes were validated.
//!
//! # Security
//!
//! - Private and symmetric keys are zeroized on drop
//! - `Debug` output never contains secret bytes

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::{base64_decode, base64_encode};
use crate::defaults::KEY_LEN;
use crate::error::{CryptoError, CryptoResult};

/// Elliptic-curve public key (SPKI DER).
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub(crate) fn from_spki_der(der: Vec<u8>) -> Self {
        Self(der)
    }

    /// SPKI DER bytes.
    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    /// Portable text form (base64 SPKI), as sent to peers.
    pub fn to_portable(&self) -> String {
        base64_encode(&self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tail = &self.0[self.0.len().saturating_sub(8)..];
        write!(f, "PublicKey({})", hex::encode(tail))
    }
}

/// Elliptic-curve private key (PKCS8 DER) with automatic zeroization.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub(crate) fn from_pkcs8_der(der: Vec<u8>) -> Self {
        Self(der)
    }

    /// PKCS8 DER bytes.
    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    /// Portable text form (base64 PKCS8) for durable storage.
    pub fn to_portable(&self) -> String {
        base64_encode(&self.0)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// The device's identity key pair.
///
/// The two halves always travel together: they are generated, persisted,
/// loaded and cleared as one unit.
#[derive(Clone)]
pub struct IdentityKeyPair {
    /// The public key (can be shared).
    pub public: PublicKey,
    /// The private key (must be kept secret).
    pub private: PrivateKey,
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// AES-256 key, used for pairwise (derived) and room keys alike.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Expected {} byte symmetric key, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes of the key.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Export as portable text (base64 of the raw key).
    pub fn to_portable(&self) -> String {
        base64_encode(&self.0)
    }

    /// Import from portable text.
    pub fn from_portable(text: &str) -> CryptoResult<Self> {
        let mut bytes = base64_decode(text)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
