//! Human-comparable public key fingerprints.
//!
//! `SHA-256(SPKI DER)`, first 8 bytes, upper-case hex, `:`-separated:
//!
//! ```text
//! 3F:A2:07:9C:41:DE:88:10
//! ```
//!
//! Used only for out-of-band verification between users; never an input to
//! any key derivation.

use std::fmt;

use crate::codec::base64_decode;
use crate::defaults::{FINGERPRINT_BYTES, FINGERPRINT_SEPARATOR};
use crate::error::{CryptoError, CryptoResult};
use crate::provider::CryptoProvider;

/// A short digest of a public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a portable (base64 SPKI) public key.
    pub fn of_portable_key(crypto: &dyn CryptoProvider, public_key: &str) -> CryptoResult<Self> {
        if public_key.trim().is_empty() {
            return Err(CryptoError::MissingPeerKey);
        }
        let der = base64_decode(public_key)?;
        Ok(Self::of_bytes(crypto, &der))
    }

    /// Fingerprint of raw exported key bytes.
    pub fn of_bytes(crypto: &dyn CryptoProvider, key_bytes: &[u8]) -> Self {
        let digest = crypto.hash(key_bytes);
        let groups: Vec<String> = digest[..FINGERPRINT_BYTES]
            .iter()
            .map(|b| hex::encode_upper([*b]))
            .collect();
        Self(groups.join(FINGERPRINT_SEPARATOR))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint string of a portable public key.
pub fn generate_fingerprint(crypto: &dyn CryptoProvider, public_key: &str) -> CryptoResult<String> {
    Fingerprint::of_portable_key(crypto, public_key).map(|fp| fp.0)
}
