//! Pairwise shared keys.
//!
//! A pairwise key is ECDH(our identity private key, peer public key). It is
//! deterministic for a fixed pair, so the cache here only saves the curve
//! operation: evicting an entry and deriving again yields the same key.
//! Derived keys are never persisted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{CryptoError, CryptoResult};
use crate::identity::IdentityKeyStore;
use crate::keys::SymmetricKey;

/// In-memory cache of derived pairwise keys, keyed by caller-chosen id.
///
/// Every eviction bumps a generation counter. A derivation that started
/// before an eviction carries the old generation and its insert is dropped.
#[derive(Default)]
pub struct DerivedKeyCache {
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    keys: HashMap<String, SymmetricKey>,
    generation: u64,
}

impl DerivedKeyCache {
    pub(crate) async fn get(&self, cache_key: &str) -> Option<SymmetricKey> {
        self.state.read().await.keys.get(cache_key).cloned()
    }

    pub(crate) async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Insert unless the cache was evicted since `generation` was read.
    pub(crate) async fn insert_if_current(
        &self,
        cache_key: &str,
        key: SymmetricKey,
        generation: u64,
    ) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return false;
        }
        state.keys.insert(cache_key.to_string(), key);
        true
    }

    pub(crate) async fn remove(&self, cache_key: &str) {
        let mut state = self.state.write().await;
        state.keys.remove(cache_key);
        state.generation += 1;
    }

    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        state.keys.clear();
        state.generation += 1;
    }

    pub(crate) async fn len(&self) -> usize {
        self.state.read().await.keys.len()
    }
}

/// Derives pairwise keys from the local identity and peer public keys.
pub struct SharedKeyDeriver {
    identity: Arc<IdentityKeyStore>,
    cache: Arc<DerivedKeyCache>,
}

impl SharedKeyDeriver {
    pub fn new(identity: Arc<IdentityKeyStore>) -> Self {
        let cache = identity.derived_cache();
        Self { identity, cache }
    }

    /// Pairwise key with the holder of `peer_public_key` (portable SPKI).
    ///
    /// With a `cache_key` (typically the peer's user id) a cached key is
    /// returned when present, and a freshly derived key is cached.
    ///
    /// Fails with [`CryptoError::NoLocalIdentity`] when no identity has been
    /// initialized and [`CryptoError::MissingPeerKey`] for an empty peer key.
    #[instrument(skip(self, peer_public_key), fields(subsystem = "e2e", component = "shared", op = "get"))]
    pub async fn get_shared_key(
        &self,
        peer_public_key: &str,
        cache_key: Option<&str>,
    ) -> CryptoResult<SymmetricKey> {
        if let Some(cache_key) = cache_key {
            if let Some(key) = self.cache.get(cache_key).await {
                debug!("Derived key cache hit");
                return Ok(key);
            }
        }

        let generation = self.cache.generation().await;
        let key = self.derive(peer_public_key).await?;

        if let Some(cache_key) = cache_key {
            if self
                .cache
                .insert_if_current(cache_key, key.clone(), generation)
                .await
            {
                debug!("Derived key cached");
            } else {
                debug!("Derived key cache evicted during derivation, not caching");
            }
        }
        Ok(key)
    }

    /// Derive without consulting or populating the cache.
    pub async fn derive(&self, peer_public_key: &str) -> CryptoResult<SymmetricKey> {
        let pair = self
            .identity
            .load()
            .await?
            .ok_or(CryptoError::NoLocalIdentity)?;

        let crypto = self.identity.crypto();
        let peer = crypto.import_public_portable(peer_public_key)?;
        crypto.derive_symmetric_key(&pair.private, &peer)
    }

    /// Evict one cached key. No-op when absent.
    pub async fn clear_derived_key(&self, cache_key: &str) {
        self.cache.remove(cache_key).await;
    }

    /// Evict every cached key.
    pub async fn clear_all_derived_keys(&self) {
        self.cache.clear().await;
    }

    /// Number of cached keys.
    pub async fn cached_count(&self) -> usize {
        self.cache.len().await
    }
}

impl std::fmt::Debug for SharedKeyDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyDeriver").finish_non_exhaustive()
    }
}
