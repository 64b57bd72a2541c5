//! Room key distribution.
//!
//! A room key only ever crosses the relay wrapped for one recipient: it is
//! encrypted under the pairwise key between sender and recipient, so the
//! relay sees an envelope it cannot open.
//!
//! # Protocol
//!
//! Sender (room initiator):
//! 1. key = ECDH(sender_private, recipient_public)
//! 2. envelope = AES-256-GCM(key, base64(room_key))
//!
//! Recipient:
//! 1. key = ECDH(recipient_private, sender_public)
//! 2. base64(room_key) = open(envelope)
//!
//! Pairwise keys used here are derived fresh each time and not cached.

use std::sync::Arc;

use tracing::{error, instrument};

use crate::cipher::AeadCipher;
use crate::error::CryptoResult;
use crate::keys::SymmetricKey;
use crate::shared::SharedKeyDeriver;

/// Wraps and unwraps room keys for individual members.
pub struct RoomKeyDistributor {
    deriver: Arc<SharedKeyDeriver>,
    cipher: AeadCipher,
}

impl RoomKeyDistributor {
    pub fn new(deriver: Arc<SharedKeyDeriver>, cipher: AeadCipher) -> Self {
        Self { deriver, cipher }
    }

    /// Wrap a room key (portable text) for the holder of `recipient_public_key`.
    #[instrument(skip_all, fields(subsystem = "e2e", component = "distributor", op = "wrap"))]
    pub async fn encrypt_room_key_for_user(
        &self,
        room_key: &str,
        recipient_public_key: &str,
    ) -> CryptoResult<String> {
        let key = self.deriver.derive(recipient_public_key).await?;
        self.cipher.encrypt_text(room_key, &key)
    }

    /// Unwrap a room key sent by the holder of `sender_public_key`.
    ///
    /// Returns the room key's portable text; storing it is up to the caller.
    /// Tampering or a wrong sender key fails with
    /// [`CryptoError::Authentication`](crate::CryptoError::Authentication).
    #[instrument(skip_all, fields(subsystem = "e2e", component = "distributor", op = "unwrap"))]
    pub async fn decrypt_room_key(
        &self,
        envelope: &str,
        sender_public_key: &str,
    ) -> CryptoResult<String> {
        let key = self.deriver.derive(sender_public_key).await?;
        let room_key = self.cipher.decrypt_text(envelope, &key).inspect_err(|e| {
            if e.is_integrity_failure() {
                error!("Wrapped room key failed authentication");
            }
        })?;

        // An authenticated payload that is not a key means the sender wrapped garbage
        SymmetricKey::from_portable(&room_key)?;
        Ok(room_key)
    }
}

impl std::fmt::Debug for RoomKeyDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomKeyDistributor").finish_non_exhaustive()
    }
}
