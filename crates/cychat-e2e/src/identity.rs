//! Device identity key pair lifecycle.
//!
//! The identity pair is created once per device and then reused: a cached
//! copy serves repeated calls within a session, and the durable store serves
//! restarts. Both halves are written, read and removed together.
//!
//! Clearing the identity also drops every secret derived from it, so nothing
//! computed under the old identity stays reachable.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{IdentityKeyPair, PublicKey};
use crate::provider::CryptoProvider;
use crate::room::RoomKeyStore;
use crate::shared::DerivedKeyCache;
use crate::store::KeyValueStore;

/// Result of [`IdentityKeyStore::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitOutcome {
    /// Portable (base64 SPKI) public key to publish to the server.
    pub public_key: String,
    /// True when the key pair was generated by this call.
    pub is_new: bool,
}

/// Owner of the device's identity key pair.
pub struct IdentityKeyStore {
    store: Arc<dyn KeyValueStore>,
    crypto: Arc<dyn CryptoProvider>,
    config: EngineConfig,
    cached: RwLock<Option<IdentityKeyPair>>,
    init_lock: Mutex<()>,
    derived: Arc<DerivedKeyCache>,
    room_keys: Arc<RoomKeyStore>,
}

impl IdentityKeyStore {
    /// Create an identity store.
    ///
    /// `room_keys` is cleared together with the identity.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        crypto: Arc<dyn CryptoProvider>,
        config: EngineConfig,
        room_keys: Arc<RoomKeyStore>,
    ) -> Self {
        Self {
            store,
            crypto,
            config,
            cached: RwLock::new(None),
            init_lock: Mutex::new(()),
            derived: Arc::new(DerivedKeyCache::default()),
            room_keys,
        }
    }

    pub(crate) fn derived_cache(&self) -> Arc<DerivedKeyCache> {
        self.derived.clone()
    }

    pub(crate) fn crypto(&self) -> Arc<dyn CryptoProvider> {
        self.crypto.clone()
    }

    /// Load the identity, generating and persisting one if none exists.
    ///
    /// Concurrent callers are serialized so at most one key pair is ever
    /// generated. Generation failures surface as [`CryptoError::Capability`].
    #[instrument(skip(self), fields(subsystem = "e2e", component = "identity", op = "initialize"))]
    pub async fn initialize(&self) -> CryptoResult<InitOutcome> {
        let _guard = self.init_lock.lock().await;

        if let Some(pair) = self.load_locked().await? {
            return Ok(InitOutcome {
                public_key: self.export_public_key(&pair.public),
                is_new: false,
            });
        }

        info!("Generating new identity key pair");
        let pair = self.crypto.generate_key_pair()?;
        self.persist(&pair).await?;

        let public_key = self.export_public_key(&pair.public);
        *self.cached.write().await = Some(pair);

        Ok(InitOutcome {
            public_key,
            is_new: true,
        })
    }

    /// The cached or persisted identity, or `None`. Never generates.
    ///
    /// A half-present or undecodable stored pair is logged and reported as
    /// absent. The durable read and cache fill run under `init_lock`, so a
    /// concurrent [`clear`](Self::clear) cannot be undone by a late fill.
    #[instrument(skip(self), fields(subsystem = "e2e", component = "identity", op = "load"))]
    pub async fn load(&self) -> CryptoResult<Option<IdentityKeyPair>> {
        if let Some(pair) = self.cached.read().await.as_ref() {
            return Ok(Some(pair.clone()));
        }

        let _guard = self.init_lock.lock().await;
        self.load_locked().await
    }

    /// Cache, then durable store. Caller holds `init_lock`.
    async fn load_locked(&self) -> CryptoResult<Option<IdentityKeyPair>> {
        if let Some(pair) = self.cached.read().await.as_ref() {
            return Ok(Some(pair.clone()));
        }

        let private = self.store.get(&self.config.private_key_storage).await?;
        let public = self.store.get(&self.config.public_key_storage).await?;

        let (private, public) = match (private, public) {
            (Some(private), Some(public)) => (private, public),
            (None, None) => {
                debug!("No stored identity");
                return Ok(None);
            }
            _ => {
                warn!("Stored identity is missing one half, treating as absent");
                return Ok(None);
            }
        };

        let pair = match self.import_pair(&private, &public) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Stored identity is malformed, treating as absent");
                return Ok(None);
            }
        };

        debug!("Identity loaded from durable store");
        *self.cached.write().await = Some(pair.clone());
        Ok(Some(pair))
    }

    /// Whether an identity exists in cache or durable store.
    pub async fn has_keys(&self) -> CryptoResult<bool> {
        if self.cached.read().await.is_some() {
            return Ok(true);
        }
        let private = self.store.get(&self.config.private_key_storage).await?;
        let public = self.store.get(&self.config.public_key_storage).await?;
        Ok(private.is_some() && public.is_some())
    }

    /// The persisted public key text, without importing it.
    pub async fn stored_public_key(&self) -> CryptoResult<Option<String>> {
        self.store.get(&self.config.public_key_storage).await
    }

    /// Wipe the identity and everything derived from it.
    ///
    /// Removes both halves from the durable store, the cached pair, all
    /// derived pairwise keys and all room keys. Safe to call when nothing
    /// is stored.
    #[instrument(skip(self), fields(subsystem = "e2e", component = "identity", op = "clear"))]
    pub async fn clear(&self) -> CryptoResult<()> {
        let _guard = self.init_lock.lock().await;

        *self.cached.write().await = None;
        self.derived.clear().await;

        self.store.remove(&self.config.private_key_storage).await?;
        self.store.remove(&self.config.public_key_storage).await?;
        self.room_keys.clear_all_room_keys().await?;

        info!("Identity and derived keys cleared");
        Ok(())
    }

    /// Portable (base64 SPKI) text of a public key.
    pub fn export_public_key(&self, key: &PublicKey) -> String {
        crate::codec::base64_encode(&self.crypto.export_public_key(key))
    }

    fn import_pair(&self, private: &str, public: &str) -> CryptoResult<IdentityKeyPair> {
        Ok(IdentityKeyPair {
            private: self.crypto.import_private_portable(private)?,
            public: self.crypto.import_public_portable(public)?,
        })
    }

    async fn persist(&self, pair: &IdentityKeyPair) -> CryptoResult<()> {
        let private = crate::codec::base64_encode(&self.crypto.export_private_key(&pair.private));
        let public = self.export_public_key(&pair.public);

        self.store
            .set(&self.config.private_key_storage, &private)
            .await?;
        if let Err(e) = self.store.set(&self.config.public_key_storage, &public).await {
            // Never leave a private key without its public half
            if let Err(cleanup) = self.store.remove(&self.config.private_key_storage).await {
                warn!(error = %cleanup, "Failed to roll back private key after partial write");
            }
            return Err(CryptoError::Storage(format!(
                "Failed to persist identity: {}",
                e
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for IdentityKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
