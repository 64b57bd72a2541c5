//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::defaults::{ENV_KEY_PREFIX, PRIVATE_KEY_STORAGE, PUBLIC_KEY_STORAGE, ROOM_KEYS_STORAGE};

/// Names of the durable-store records the engine owns.
///
/// The defaults match the browser client so both can share one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Record holding the base64 PKCS8 private key.
    pub private_key_storage: String,
    /// Record holding the base64 SPKI public key.
    pub public_key_storage: String,
    /// Record holding the JSON room name → room key map.
    pub room_keys_storage: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            private_key_storage: PRIVATE_KEY_STORAGE.to_string(),
            public_key_storage: PUBLIC_KEY_STORAGE.to_string(),
            room_keys_storage: ROOM_KEYS_STORAGE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Prefix every record name, e.g. to keep several accounts in one store.
    pub fn with_prefix(prefix: &str) -> Self {
        let defaults = Self::default();
        Self {
            private_key_storage: format!("{}{}", prefix, defaults.private_key_storage),
            public_key_storage: format!("{}{}", prefix, defaults.public_key_storage),
            room_keys_storage: format!("{}{}", prefix, defaults.room_keys_storage),
        }
    }

    /// Defaults, prefixed by `CYCHAT_E2E_KEY_PREFIX` when it is set.
    pub fn from_env() -> Self {
        match std::env::var(ENV_KEY_PREFIX) {
            Ok(prefix) if !prefix.is_empty() => Self::with_prefix(&prefix),
            _ => Self::default(),
        }
    }
}
