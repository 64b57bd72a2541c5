//! Default values shared across the engine and its CLI.

// =============================================================================
// STORAGE KEYS
// =============================================================================

/// Durable-store key for the PKCS8 private key (base64).
pub const PRIVATE_KEY_STORAGE: &str = "e2e_private_key";

/// Durable-store key for the SPKI public key (base64).
pub const PUBLIC_KEY_STORAGE: &str = "e2e_public_key";

/// Durable-store key for the room name → room key JSON record.
pub const ROOM_KEYS_STORAGE: &str = "e2e_room_keys";

// =============================================================================
// CRYPTO PARAMETERS
// =============================================================================

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Number of SHA-256 bytes shown in a fingerprint.
pub const FINGERPRINT_BYTES: usize = 8;

/// Separator between fingerprint byte groups.
pub const FINGERPRINT_SEPARATOR: &str = ":";

/// Characters of the public key shown in debug state.
pub const PUBLIC_KEY_PREVIEW_LEN: usize = 50;

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Prefix applied to every storage key name.
pub const ENV_KEY_PREFIX: &str = "CYCHAT_E2E_KEY_PREFIX";

/// Path of the CLI's file-backed store.
pub const ENV_STORE_PATH: &str = "CYCHAT_E2E_STORE";

/// Default path of the CLI's file-backed store.
pub const STORE_PATH: &str = "cychat-e2e.json";
