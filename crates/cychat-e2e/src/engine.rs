//! Engine facade wiring every component over one store and one provider.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::cipher::AeadCipher;
use crate::config::EngineConfig;
use crate::defaults::PUBLIC_KEY_PREVIEW_LEN;
use crate::distributor::RoomKeyDistributor;
use crate::error::{CryptoError, CryptoResult};
use crate::fingerprint::generate_fingerprint;
use crate::identity::{IdentityKeyStore, InitOutcome};
use crate::provider::{CryptoProvider, NativeCrypto};
use crate::room::RoomKeyStore;
use crate::shared::SharedKeyDeriver;
use crate::store::KeyValueStore;

/// Snapshot of engine state for diagnostics. Contains no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineState {
    pub has_keys: bool,
    pub public_key_preview: Option<String>,
    pub derived_keys_count: usize,
    pub room_keys_count: usize,
}

/// The end-to-end encryption engine for one device session.
pub struct E2eEngine {
    crypto: Arc<dyn CryptoProvider>,
    cipher: AeadCipher,
    identity: Arc<IdentityKeyStore>,
    shared: Arc<SharedKeyDeriver>,
    rooms: Arc<RoomKeyStore>,
    distributor: RoomKeyDistributor,
}

impl E2eEngine {
    /// Engine over `store` using the native provider and default record names.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_provider(store, Arc::new(NativeCrypto::new()), EngineConfig::default())
    }

    /// Engine over an explicit provider and configuration.
    pub fn with_provider(
        store: Arc<dyn KeyValueStore>,
        crypto: Arc<dyn CryptoProvider>,
        config: EngineConfig,
    ) -> Self {
        let cipher = AeadCipher::new(crypto.clone());
        let rooms = Arc::new(RoomKeyStore::new(
            store.clone(),
            crypto.clone(),
            config.room_keys_storage.clone(),
        ));
        let identity = Arc::new(IdentityKeyStore::new(
            store,
            crypto.clone(),
            config,
            rooms.clone(),
        ));
        let shared = Arc::new(SharedKeyDeriver::new(identity.clone()));
        let distributor = RoomKeyDistributor::new(shared.clone(), cipher.clone());

        Self {
            crypto,
            cipher,
            identity,
            shared,
            rooms,
            distributor,
        }
    }

    pub fn identity(&self) -> &IdentityKeyStore {
        &self.identity
    }

    pub fn shared_keys(&self) -> &SharedKeyDeriver {
        &self.shared
    }

    pub fn rooms(&self) -> &RoomKeyStore {
        &self.rooms
    }

    pub fn distributor(&self) -> &RoomKeyDistributor {
        &self.distributor
    }

    pub fn cipher(&self) -> &AeadCipher {
        &self.cipher
    }

    /// Load or create the device identity.
    pub async fn initialize(&self) -> CryptoResult<InitOutcome> {
        self.identity.initialize().await
    }

    /// Wipe identity, derived keys and room keys.
    pub async fn clear_keys(&self) -> CryptoResult<()> {
        self.identity.clear().await
    }

    /// Fingerprint of a portable public key.
    pub fn fingerprint(&self, public_key: &str) -> CryptoResult<String> {
        generate_fingerprint(self.crypto.as_ref(), public_key)
    }

    /// Encrypt a direct message for the holder of `recipient_public_key`.
    pub async fn encrypt_for(
        &self,
        message: &str,
        recipient_public_key: &str,
        cache_key: Option<&str>,
    ) -> CryptoResult<String> {
        if recipient_public_key.trim().is_empty() {
            return Err(CryptoError::MissingPeerKey);
        }
        let key = self
            .shared
            .get_shared_key(recipient_public_key, cache_key)
            .await?;
        self.cipher.encrypt_text(message, &key)
    }

    /// Decrypt a direct message from the holder of `sender_public_key`.
    pub async fn decrypt_from(
        &self,
        envelope: &str,
        sender_public_key: &str,
        cache_key: Option<&str>,
    ) -> CryptoResult<String> {
        if sender_public_key.trim().is_empty() {
            return Err(CryptoError::MissingPeerKey);
        }
        if envelope.is_empty() {
            return Err(CryptoError::InvalidEnvelope("Ciphertext is required".into()));
        }
        let key = self
            .shared
            .get_shared_key(sender_public_key, cache_key)
            .await?;
        self.cipher.decrypt_text(envelope, &key).inspect_err(|e| {
            if e.is_integrity_failure() {
                error!(cache_key, "Direct message failed authentication");
            }
        })
    }

    /// Generate and store a key for a new room. Returns its portable form.
    #[instrument(skip(self), fields(subsystem = "e2e", component = "engine", op = "create_room_key"))]
    pub async fn create_room_key(&self, room_name: &str) -> CryptoResult<String> {
        let key = self.rooms.generate_room_key()?;
        self.rooms.store_room_key(room_name, &key).await?;
        info!("Room key created");
        Ok(key.to_portable())
    }

    /// Wrap the stored key of `room_name` for one member.
    pub async fn share_room_key(
        &self,
        room_name: &str,
        recipient_public_key: &str,
    ) -> CryptoResult<String> {
        let room_key = self
            .rooms
            .get_room_key_portable(room_name)
            .await?
            .ok_or_else(|| CryptoError::NoRoomKey(room_name.to_string()))?;
        self.distributor
            .encrypt_room_key_for_user(&room_key, recipient_public_key)
            .await
    }

    /// Unwrap a received room key and store it for `room_name`.
    #[instrument(skip(self, envelope, sender_public_key), fields(subsystem = "e2e", component = "engine", op = "accept_room_key"))]
    pub async fn accept_room_key(
        &self,
        room_name: &str,
        envelope: &str,
        sender_public_key: &str,
    ) -> CryptoResult<()> {
        let portable = self
            .distributor
            .decrypt_room_key(envelope, sender_public_key)
            .await?;
        let key = crate::keys::SymmetricKey::from_portable(&portable)?;
        self.rooms.store_room_key(room_name, &key).await?;
        info!("Room key accepted");
        Ok(())
    }

    /// Round-trip a message between two throwaway identities.
    ///
    /// Touches neither the store nor any cache.
    pub fn self_test(&self) -> CryptoResult<bool> {
        let alice = self.crypto.generate_key_pair()?;
        let bob = self.crypto.generate_key_pair()?;

        let alice_key = self.crypto.derive_symmetric_key(&alice.private, &bob.public)?;
        let bob_key = self.crypto.derive_symmetric_key(&bob.private, &alice.public)?;

        let message = "Cychat self test";
        let envelope = self.cipher.encrypt_text(message, &alice_key)?;
        let decrypted = self.cipher.decrypt_text(&envelope, &bob_key)?;

        let passed = decrypted == message;
        if passed {
            info!("Self test passed");
        } else {
            error!("Self test failed: message mismatch");
        }
        Ok(passed)
    }

    /// Diagnostic snapshot.
    pub async fn debug_state(&self) -> CryptoResult<EngineState> {
        let public_key_preview = self
            .identity
            .stored_public_key()
            .await?
            .map(|k| k.chars().take(PUBLIC_KEY_PREVIEW_LEN).collect());

        Ok(EngineState {
            has_keys: self.identity.has_keys().await?,
            public_key_preview,
            derived_keys_count: self.shared.cached_count().await,
            room_keys_count: self.rooms.cached_count().await,
        })
    }
}

impl std::fmt::Debug for E2eEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2eEngine")
            .field("identity", &self.identity)
            .field("rooms", &self.rooms)
            .finish_non_exhaustive()
    }
}
