//! Per-room symmetric keys.
//!
//! Room keys live in two places: an in-memory cache keyed by room name, and a
//! single durable record holding a JSON object `{ room name: base64 key }`.
//! The cache is write-through: every durable write updates the cache in the
//! same call and every clear removes both.
//!
//! The durable record is shared by all rooms, so each read-modify-write runs
//! under `record_lock`, together with the matching cache update. Two
//! concurrent `store_room_key` calls for different rooms therefore both land
//! in the record. Cache fills on a miss take the same lock, so a clear is
//! never undone by a load that started before it.
//!
//! Entries that are not strings are preserved on write and read as absent.
//! A record that is not a JSON object fails every write with
//! [`CryptoError::Storage`] rather than being overwritten.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::cipher::AeadCipher;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::provider::CryptoProvider;
use crate::store::KeyValueStore;

type RoomRecord = serde_json::Map<String, serde_json::Value>;

/// Room key cache backed by the durable room-keys record.
pub struct RoomKeyStore {
    store: Arc<dyn KeyValueStore>,
    crypto: Arc<dyn CryptoProvider>,
    cipher: AeadCipher,
    record_key: String,
    cache: RwLock<HashMap<String, SymmetricKey>>,
    record_lock: Mutex<()>,
}

impl RoomKeyStore {
    /// Create a room key store persisting into `record_key`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        crypto: Arc<dyn CryptoProvider>,
        record_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cipher: AeadCipher::new(crypto.clone()),
            crypto,
            record_key: record_key.into(),
            cache: RwLock::new(HashMap::new()),
            record_lock: Mutex::new(()),
        }
    }

    /// Generate a new random room key. Not stored until [`store_room_key`](Self::store_room_key).
    pub fn generate_room_key(&self) -> CryptoResult<SymmetricKey> {
        self.crypto.generate_symmetric_key()
    }

    /// Cache and persist a room key, replacing any previous key for the room.
    #[instrument(skip(self, key), fields(subsystem = "e2e", component = "room_keys", op = "store"))]
    pub async fn store_room_key(&self, room_name: &str, key: &SymmetricKey) -> CryptoResult<()> {
        let _guard = self.record_lock.lock().await;

        let mut record = self.read_record_for_update().await?;
        record.insert(
            room_name.to_string(),
            serde_json::Value::String(key.to_portable()),
        );
        self.write_record(&record).await?;

        self.cache
            .write()
            .await
            .insert(room_name.to_string(), key.clone());

        debug!(rooms = record.len(), "Room key persisted");
        Ok(())
    }

    /// Cached key, else the persisted key (which is then cached), else `None`.
    ///
    /// A corrupt record or undecodable entry is logged and treated as absent.
    #[instrument(skip(self), fields(subsystem = "e2e", component = "room_keys", op = "get"))]
    pub async fn get_room_key(&self, room_name: &str) -> CryptoResult<Option<SymmetricKey>> {
        if let Some(key) = self.cache.read().await.get(room_name) {
            return Ok(Some(key.clone()));
        }

        let _guard = self.record_lock.lock().await;
        if let Some(key) = self.cache.read().await.get(room_name) {
            return Ok(Some(key.clone()));
        }

        let record = self.read_record().await?;
        let Some(entry) = record.get(room_name) else {
            debug!("No room key stored");
            return Ok(None);
        };
        let Some(encoded) = entry.as_str() else {
            warn!("Stored room key is not a string, treating as absent");
            return Ok(None);
        };

        match SymmetricKey::from_portable(encoded) {
            Ok(key) => {
                self.cache
                    .write()
                    .await
                    .insert(room_name.to_string(), key.clone());
                debug!("Room key loaded from durable store");
                Ok(Some(key))
            }
            Err(e) => {
                warn!(error = %e, "Stored room key is malformed, treating as absent");
                Ok(None)
            }
        }
    }

    /// Whether a key exists for the room, in cache or durable store.
    pub async fn has_room_key(&self, room_name: &str) -> CryptoResult<bool> {
        if self.cache.read().await.contains_key(room_name) {
            return Ok(true);
        }
        let record = self.read_record().await?;
        Ok(stored_entry(&record, room_name).is_some())
    }

    /// Portable (base64) form of the room key, for wrapping and transmission.
    pub async fn get_room_key_portable(&self, room_name: &str) -> CryptoResult<Option<String>> {
        if let Some(key) = self.cache.read().await.get(room_name) {
            return Ok(Some(key.to_portable()));
        }
        let record = self.read_record().await?;
        Ok(stored_entry(&record, room_name).map(str::to_string))
    }

    /// Remove one room's key from cache and durable store.
    #[instrument(skip(self), fields(subsystem = "e2e", component = "room_keys", op = "clear"))]
    pub async fn clear_room_key(&self, room_name: &str) -> CryptoResult<()> {
        let _guard = self.record_lock.lock().await;
        self.cache.write().await.remove(room_name);

        let mut record = self.read_record_for_update().await?;
        if record.remove(room_name).is_some() {
            self.write_record(&record).await?;
            info!("Room key cleared");
        }
        Ok(())
    }

    /// Remove every room key from cache and durable store.
    #[instrument(skip(self), fields(subsystem = "e2e", component = "room_keys", op = "clear_all"))]
    pub async fn clear_all_room_keys(&self) -> CryptoResult<()> {
        let _guard = self.record_lock.lock().await;
        self.cache.write().await.clear();
        self.store.remove(&self.record_key).await?;
        info!("All room keys cleared");
        Ok(())
    }

    /// Encrypt a message under the room's key.
    ///
    /// Fails with [`CryptoError::NoRoomKey`] when the room has not been
    /// provisioned; keys are never created implicitly here.
    pub async fn encrypt_for_room(&self, message: &str, room_name: &str) -> CryptoResult<String> {
        let key = self.require_room_key(room_name).await?;
        self.cipher.encrypt_text(message, &key)
    }

    /// Decrypt a room message envelope.
    pub async fn decrypt_from_room(&self, envelope: &str, room_name: &str) -> CryptoResult<String> {
        let key = self.require_room_key(room_name).await?;
        self.cipher.decrypt_text(envelope, &key).inspect_err(|e| {
            if e.is_integrity_failure() {
                error!(room = room_name, "Room message failed authentication");
            }
        })
    }

    /// Number of keys currently cached in memory.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn require_room_key(&self, room_name: &str) -> CryptoResult<SymmetricKey> {
        self.get_room_key(room_name)
            .await?
            .ok_or_else(|| CryptoError::NoRoomKey(room_name.to_string()))
    }

    /// Record for lookups. A corrupt record reads as empty.
    async fn read_record(&self) -> CryptoResult<RoomRecord> {
        match self.parse_record().await? {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(error = %e, "Room key record is corrupt, treating as empty");
                Ok(RoomRecord::new())
            }
        }
    }

    /// Record for read-modify-write. A corrupt record is an error, so other
    /// rooms' keys are never overwritten.
    async fn read_record_for_update(&self) -> CryptoResult<RoomRecord> {
        self.parse_record().await?.map_err(|e| {
            error!(error = %e, "Room key record is corrupt, refusing to overwrite");
            CryptoError::Storage(format!("Corrupt room key record: {}", e))
        })
    }

    async fn parse_record(&self) -> CryptoResult<Result<RoomRecord, serde_json::Error>> {
        let Some(raw) = self.store.get(&self.record_key).await? else {
            return Ok(Ok(RoomRecord::new()));
        };
        Ok(serde_json::from_str::<RoomRecord>(&raw))
    }

    async fn write_record(&self, record: &RoomRecord) -> CryptoResult<()> {
        let json = serde_json::to_string(record)?;
        self.store.set(&self.record_key, &json).await
    }
}

fn stored_entry<'a>(record: &'a RoomRecord, room_name: &str) -> Option<&'a str> {
    record
        .get(room_name)
        .and_then(serde_json::Value::as_str)
        .filter(|v| !v.is_empty())
}

impl std::fmt::Debug for RoomKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomKeyStore")
            .field("record_key", &self.record_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::ROOM_KEYS_STORAGE;
    use crate::provider::NativeCrypto;
    use crate::store::MemoryStore;

    fn room_store(store: Arc<MemoryStore>) -> RoomKeyStore {
        RoomKeyStore::new(store, Arc::new(NativeCrypto::new()), ROOM_KEYS_STORAGE)
    }

    /// Store whose writes always fail.
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> CryptoResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: &str) -> CryptoResult<()> {
            Err(CryptoError::Storage("disk full".into()))
        }

        async fn remove(&self, key: &str) -> CryptoResult<()> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_store_and_get_room_key() {
        let store = Arc::new(MemoryStore::new());
        let rooms = room_store(store.clone());

        let key = rooms.generate_room_key().unwrap();
        rooms.store_room_key("general", &key).await.unwrap();

        let loaded = rooms.get_room_key("general").await.unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());
        assert!(rooms.has_room_key("general").await.unwrap());
        assert_eq!(
            rooms.get_room_key_portable("general").await.unwrap(),
            Some(key.to_portable())
        );

        // Persisted as a JSON object of base64 keys
        let raw = store.get(ROOM_KEYS_STORAGE).await.unwrap().unwrap();
        let record: RoomRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            record.get("general").and_then(serde_json::Value::as_str),
            Some(key.to_portable().as_str())
        );
    }

    #[tokio::test]
    async fn test_get_room_key_absent() {
        let rooms = room_store(Arc::new(MemoryStore::new()));
        assert!(rooms.get_room_key("nowhere").await.unwrap().is_none());
        assert!(!rooms.has_room_key("nowhere").await.unwrap());
        assert!(rooms.get_room_key_portable("nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_from_durable_store() {
        let store = Arc::new(MemoryStore::new());
        let key = {
            let rooms = room_store(store.clone());
            let key = rooms.generate_room_key().unwrap();
            rooms.store_room_key("general", &key).await.unwrap();
            key
        };

        // Fresh instance, empty cache
        let rooms = room_store(store);
        assert_eq!(rooms.cached_count().await, 0);
        let loaded = rooms.get_room_key("general").await.unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());
        assert_eq!(rooms.cached_count().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_absent_not_error() {
        let store = Arc::new(MemoryStore::new());
        store.set(ROOM_KEYS_STORAGE, "{broken").await.unwrap();
        let rooms = room_store(store);

        assert!(rooms.get_room_key("general").await.unwrap().is_none());
        assert!(!rooms.has_room_key("general").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_absent() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(ROOM_KEYS_STORAGE, r#"{"general":"c2hvcnQ="}"#)
            .await
            .unwrap();
        let rooms = room_store(store);

        assert!(rooms.get_room_key("general").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_room_key() {
        let store = Arc::new(MemoryStore::new());
        let rooms = room_store(store.clone());

        let a = rooms.generate_room_key().unwrap();
        let b = rooms.generate_room_key().unwrap();
        rooms.store_room_key("a", &a).await.unwrap();
        rooms.store_room_key("b", &b).await.unwrap();

        rooms.clear_room_key("a").await.unwrap();
        assert!(rooms.get_room_key("a").await.unwrap().is_none());
        let loaded = rooms.get_room_key("b").await.unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), b.as_bytes());

        // Idempotent
        rooms.clear_room_key("a").await.unwrap();
        rooms.clear_room_key("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_all_room_keys() {
        let store = Arc::new(MemoryStore::new());
        let rooms = room_store(store.clone());

        let key = rooms.generate_room_key().unwrap();
        rooms.store_room_key("a", &key).await.unwrap();
        rooms.store_room_key("b", &key).await.unwrap();

        rooms.clear_all_room_keys().await.unwrap();
        assert_eq!(rooms.cached_count().await, 0);
        assert!(store.get(ROOM_KEYS_STORAGE).await.unwrap().is_none());
        assert!(!rooms.has_room_key("a").await.unwrap());

        rooms.clear_all_room_keys().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_stores_for_different_rooms_all_persist() {
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(room_store(store.clone()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let rooms = rooms.clone();
            handles.push(tokio::spawn(async move {
                let key = rooms.generate_room_key().unwrap();
                rooms.store_room_key(&format!("room-{}", i), &key).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let raw = store.get(ROOM_KEYS_STORAGE).await.unwrap().unwrap();
        let record: RoomRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.len(), 32);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_for_room() {
        let rooms = room_store(Arc::new(MemoryStore::new()));
        let key = rooms.generate_room_key().unwrap();
        rooms.store_room_key("general", &key).await.unwrap();

        let envelope = rooms.encrypt_for_room("hello room", "general").await.unwrap();
        let plaintext = rooms.decrypt_from_room(&envelope, "general").await.unwrap();
        assert_eq!(plaintext, "hello room");
    }

    #[tokio::test]
    async fn test_missing_room_key_is_precondition_error() {
        let rooms = room_store(Arc::new(MemoryStore::new()));

        let err = rooms.encrypt_for_room("hi", "general").await.unwrap_err();
        assert!(matches!(err, CryptoError::NoRoomKey(ref r) if r == "general"));

        let err = rooms.decrypt_from_room("AAAA", "general").await.unwrap_err();
        assert!(matches!(err, CryptoError::NoRoomKey(_)));
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_wrong_room_key_is_authentication_failure() {
        let rooms = room_store(Arc::new(MemoryStore::new()));
        let a = rooms.generate_room_key().unwrap();
        let b = rooms.generate_room_key().unwrap();
        rooms.store_room_key("a", &a).await.unwrap();
        rooms.store_room_key("b", &b).await.unwrap();

        let envelope = rooms.encrypt_for_room("for a only", "a").await.unwrap();
        let err = rooms.decrypt_from_room(&envelope, "b").await.unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_key_uncached() {
        let rooms = RoomKeyStore::new(
            Arc::new(ReadOnlyStore::default()),
            Arc::new(NativeCrypto::new()),
            ROOM_KEYS_STORAGE,
        );
        let key = rooms.generate_room_key().unwrap();

        let err = rooms.store_room_key("general", &key).await.unwrap_err();
        assert!(matches!(err, CryptoError::Storage(_)));

        assert_eq!(rooms.cached_count().await, 0);
        assert!(!rooms.has_room_key("general").await.unwrap());
        assert!(matches!(
            rooms.encrypt_for_room("hi", "general").await,
            Err(CryptoError::NoRoomKey(_))
        ));
    }

    #[tokio::test]
    async fn test_store_preserves_non_string_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(ROOM_KEYS_STORAGE, r#"{"old":"AAAA","bad":1}"#)
            .await
            .unwrap();
        let rooms = room_store(store.clone());

        let key = rooms.generate_room_key().unwrap();
        rooms.store_room_key("new", &key).await.unwrap();

        let raw = store.get(ROOM_KEYS_STORAGE).await.unwrap().unwrap();
        let record: RoomRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.get("old"), Some(&serde_json::json!("AAAA")));
        assert_eq!(record.get("bad"), Some(&serde_json::json!(1)));
        assert!(record.contains_key("new"));

        // Non-string entries read as absent
        assert!(rooms.get_room_key("bad").await.unwrap().is_none());
        assert!(!rooms.has_room_key("bad").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        store.set(ROOM_KEYS_STORAGE, "{broken").await.unwrap();
        let rooms = room_store(store.clone());

        let key = rooms.generate_room_key().unwrap();
        let err = rooms.store_room_key("general", &key).await.unwrap_err();
        assert!(matches!(err, CryptoError::Storage(_)));
        assert!(rooms.clear_room_key("general").await.is_err());

        assert_eq!(
            store.get(ROOM_KEYS_STORAGE).await.unwrap().as_deref(),
            Some("{broken")
        );
        assert_eq!(rooms.cached_count().await, 0);

        // Bulk clear still removes it
        rooms.clear_all_room_keys().await.unwrap();
        assert!(store.get(ROOM_KEYS_STORAGE).await.unwrap().is_none());
    }
}
