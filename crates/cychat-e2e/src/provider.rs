//! Cryptographic primitive provider.
//!
//! Every component reaches the primitives through [`CryptoProvider`], never
//! through a concrete library, so the engine can be driven by another
//! backend (a hardware keystore, a WebCrypto bridge) or by seeded randomness
//! in unit tests.
//!
//! # Primitives
//!
//! - **Key agreement**: ECDH on P-256, keys exported as SPKI / PKCS8 DER
//! - **Derived key**: the raw 32-byte ECDH x-coordinate used directly as an
//!   AES-256 key, which is what WebCrypto's `deriveKey(ECDH -> AES-GCM)` does
//! - **Symmetric cipher**: AES-256-GCM, 12-byte nonce, 16-byte tag
//! - **Hash**: SHA-256
//! - **Random generation**: operating system CSPRNG

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::codec::base64_decode;
use crate::defaults::{KEY_LEN, NONCE_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{IdentityKeyPair, PrivateKey, PublicKey, SymmetricKey};

/// The capability set the engine needs from a crypto backend.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh P-256 identity key pair.
    fn generate_key_pair(&self) -> CryptoResult<IdentityKeyPair>;

    /// Generate a fresh random AES-256 key.
    fn generate_symmetric_key(&self) -> CryptoResult<SymmetricKey>;

    /// ECDH between our private key and their public key.
    ///
    /// Deterministic: the same pair always yields the same key, and
    /// `derive(a.private, b.public) == derive(b.private, a.public)`.
    fn derive_symmetric_key(
        &self,
        private: &PrivateKey,
        public: &PublicKey,
    ) -> CryptoResult<SymmetricKey>;

    /// AES-256-GCM encrypt. Returns ciphertext with the 16-byte tag appended.
    fn aead_encrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    /// AES-256-GCM decrypt. Fails with [`CryptoError::Authentication`] when
    /// the tag does not verify.
    fn aead_decrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    /// SHA-256 digest.
    fn hash(&self, data: &[u8]) -> [u8; 32];

    /// Import an SPKI DER public key.
    fn import_public_key(&self, spki_der: &[u8]) -> CryptoResult<PublicKey>;

    /// Import a PKCS8 DER private key.
    fn import_private_key(&self, pkcs8_der: &[u8]) -> CryptoResult<PrivateKey>;

    /// Fill `out` from a cryptographically secure source.
    fn random_bytes(&self, out: &mut [u8]) -> CryptoResult<()>;

    /// Export a public key as SPKI DER.
    fn export_public_key(&self, key: &PublicKey) -> Vec<u8> {
        key.as_der().to_vec()
    }

    /// Export a private key as PKCS8 DER.
    fn export_private_key(&self, key: &PrivateKey) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(key.as_der().to_vec())
    }

    /// Import a public key from its portable (base64 SPKI) form.
    fn import_public_portable(&self, text: &str) -> CryptoResult<PublicKey> {
        if text.trim().is_empty() {
            return Err(CryptoError::MissingPeerKey);
        }
        let der = base64_decode(text)?;
        self.import_public_key(&der)
    }

    /// Import a private key from its portable (base64 PKCS8) form.
    fn import_private_portable(&self, text: &str) -> CryptoResult<PrivateKey> {
        let der = Zeroizing::new(base64_decode(text)?);
        self.import_private_key(&der)
    }
}

enum Randomness {
    Os,
    #[cfg(test)]
    Seeded(std::sync::Mutex<rand::rngs::StdRng>),
}

/// Native provider backed by RustCrypto (`p256`, `aes-gcm`, `sha2`).
pub struct NativeCrypto {
    randomness: Randomness,
}

impl NativeCrypto {
    /// Provider drawing all randomness from the operating system.
    pub fn new() -> Self {
        Self {
            randomness: Randomness::Os,
        }
    }

    /// Deterministic provider for unit tests.
    #[cfg(test)]
    pub(crate) fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            randomness: Randomness::Seeded(std::sync::Mutex::new(
                rand::rngs::StdRng::seed_from_u64(seed),
            )),
        }
    }

    fn random_secret(&self) -> CryptoResult<p256::SecretKey> {
        match &self.randomness {
            Randomness::Os => Ok(p256::SecretKey::random(&mut OsRng)),
            #[cfg(test)]
            Randomness::Seeded(rng) => {
                let mut rng = rng
                    .lock()
                    .map_err(|_| CryptoError::Capability("RNG lock poisoned".into()))?;
                Ok(p256::SecretKey::random(&mut *rng))
            }
        }
    }
}

impl Default for NativeCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NativeCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCrypto").finish_non_exhaustive()
    }
}

impl CryptoProvider for NativeCrypto {
    fn generate_key_pair(&self) -> CryptoResult<IdentityKeyPair> {
        let secret = self.random_secret()?;

        let private_der = secret
            .to_pkcs8_der()
            .map_err(|e| CryptoError::Capability(format!("PKCS8 export failed: {}", e)))?;
        let public_der = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::Capability(format!("SPKI export failed: {}", e)))?;

        Ok(IdentityKeyPair {
            public: PublicKey::from_spki_der(public_der.as_bytes().to_vec()),
            private: PrivateKey::from_pkcs8_der(private_der.as_bytes().to_vec()),
        })
    }

    fn generate_symmetric_key(&self) -> CryptoResult<SymmetricKey> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        self.random_bytes(bytes.as_mut_slice())?;
        Ok(SymmetricKey::from_bytes(*bytes))
    }

    fn derive_symmetric_key(
        &self,
        private: &PrivateKey,
        public: &PublicKey,
    ) -> CryptoResult<SymmetricKey> {
        let secret = p256::SecretKey::from_pkcs8_der(private.as_der())
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid PKCS8 private key: {}", e)))?;
        let peer = p256::PublicKey::from_public_key_der(public.as_der())
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid SPKI public key: {}", e)))?;

        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        SymmetricKey::from_slice(shared.raw_secret_bytes().as_slice())
    }

    fn aead_encrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Capability(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Capability("AES-GCM encryption failed".into()))
    }

    fn aead_decrypt(
        &self,
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Capability(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Authentication)
    }

    fn hash(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn import_public_key(&self, spki_der: &[u8]) -> CryptoResult<PublicKey> {
        p256::PublicKey::from_public_key_der(spki_der)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid SPKI public key: {}", e)))?;
        Ok(PublicKey::from_spki_der(spki_der.to_vec()))
    }

    fn import_private_key(&self, pkcs8_der: &[u8]) -> CryptoResult<PrivateKey> {
        p256::SecretKey::from_pkcs8_der(pkcs8_der)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid PKCS8 private key: {}", e)))?;
        Ok(PrivateKey::from_pkcs8_der(pkcs8_der.to_vec()))
    }

    fn random_bytes(&self, out: &mut [u8]) -> CryptoResult<()> {
        match &self.randomness {
            Randomness::Os => OsRng
                .try_fill_bytes(out)
                .map_err(|e| CryptoError::Capability(format!("OS RNG unavailable: {}", e))),
            #[cfg(test)]
            Randomness::Seeded(rng) => {
                rng.lock()
                    .map_err(|_| CryptoError::Capability("RNG lock poisoned".into()))?
                    .fill_bytes(out);
                Ok(())
            }
        }
    }
}
