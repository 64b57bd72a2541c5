//! AES-256-GCM envelopes.
//!
//! An envelope is `base64(nonce || ciphertext || tag)`:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┬──────────────┐
//! │ Nonce (12 B) │ Ciphertext (len(plain))  │ Tag (16 B)   │
//! └──────────────┴──────────────────────────┴──────────────┘
//! ```
//!
//! A fresh random nonce is drawn for every encryption. No associated data.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::codec::{base64_decode, base64_encode, bytes_to_text, text_to_bytes};
use crate::defaults::{NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::provider::CryptoProvider;

/// Stateless envelope encryption over a [`CryptoProvider`].
#[derive(Clone)]
pub struct AeadCipher {
    crypto: Arc<dyn CryptoProvider>,
}

impl AeadCipher {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Encrypt bytes into a portable envelope.
    pub fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        self.crypto.random_bytes(&mut nonce)?;

        let ciphertext = self.crypto.aead_encrypt(key, &nonce, plaintext)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(base64_encode(&combined))
    }

    /// Encrypt UTF-8 text into a portable envelope.
    pub fn encrypt_text(&self, plaintext: &str, key: &SymmetricKey) -> CryptoResult<String> {
        let bytes = Zeroizing::new(text_to_bytes(plaintext));
        self.encrypt(&bytes, key)
    }

    /// Decrypt a portable envelope into bytes.
    ///
    /// Any tag mismatch is reported as [`CryptoError::Authentication`].
    pub fn decrypt(&self, envelope: &str, key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
        let combined = base64_decode(envelope)?;
        let (nonce, ciphertext) = split_envelope(&combined)?;
        self.crypto.aead_decrypt(key, nonce, ciphertext)
    }

    /// Decrypt a portable envelope into UTF-8 text.
    pub fn decrypt_text(&self, envelope: &str, key: &SymmetricKey) -> CryptoResult<String> {
        bytes_to_text(self.decrypt(envelope, key)?)
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher").finish_non_exhaustive()
    }
}

fn split_envelope(combined: &[u8]) -> CryptoResult<(&[u8; NONCE_LEN], &[u8])> {
    if combined.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidEnvelope(format!(
            "Envelope too short: {} bytes (minimum {})",
            combined.len(),
            NONCE_LEN + TAG_LEN
        )));
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = nonce
        .try_into()
        .map_err(|_| CryptoError::InvalidEnvelope("Invalid nonce".into()))?;
    Ok((nonce, ciphertext))
}
