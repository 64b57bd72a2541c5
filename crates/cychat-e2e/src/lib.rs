//! # cychat-e2e
//!
//! End-to-end encryption engine for Cychat.
//!
//! Direct messages and room broadcasts are encrypted on the device so the
//! relaying server only ever sees opaque envelopes. This crate owns the key
//! material: the device identity, pairwise keys derived from it, per-room
//! keys, and the wrapping that moves room keys between members.
//!
//! ## Cryptographic Primitives
//!
//! - **Key exchange**: ECDH on P-256 (SPKI / PKCS8 export)
//! - **Symmetric cipher**: AES-256-GCM, 12-byte random nonce prefixed
//! - **Fingerprint**: SHA-256, first 8 bytes, `XX:XX:..` upper-case hex
//! - **Portable encoding**: standard base64
//!
//! All of it is wire-compatible with the browser client's WebCrypto
//! implementation.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`identity`] | Identity key pair: generate once, persist, load, clear |
//! | [`shared`] | Pairwise keys by ECDH, cached per peer |
//! | [`cipher`] | AES-GCM envelopes |
//! | [`room`] | Room keys: generate, persist, room encrypt/decrypt |
//! | [`distributor`] | Wrap/unwrap room keys for individual members |
//! | [`fingerprint`] | Out-of-band verification digests |
//!
//! ## Logging
//!
//! Operations emit `tracing` spans carrying `subsystem = "e2e"`, a
//! `component` and an `op`. Key material is never logged.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cychat_e2e::{E2eEngine, MemoryStore};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let alice = E2eEngine::new(Arc::new(MemoryStore::new()));
//! let bob = E2eEngine::new(Arc::new(MemoryStore::new()));
//!
//! let alice_pub = alice.initialize().await.unwrap().public_key;
//! let bob_pub = bob.initialize().await.unwrap().public_key;
//!
//! // Alice creates a room and hands its key to Bob
//! alice.create_room_key("general").await.unwrap();
//! let wrapped = alice.share_room_key("general", &bob_pub).await.unwrap();
//! bob.accept_room_key("general", &wrapped, &alice_pub).await.unwrap();
//!
//! let envelope = alice.rooms().encrypt_for_room("hello", "general").await.unwrap();
//! let plaintext = bob.rooms().decrypt_from_room(&envelope, "general").await.unwrap();
//! assert_eq!(plaintext, "hello");
//! # });
//! ```

pub mod cipher;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod distributor;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod keys;
pub mod provider;
pub mod room;
pub mod shared;
pub mod store;

// Re-export commonly used types
pub use cipher::AeadCipher;
pub use codec::{base64_decode, base64_encode};
pub use config::EngineConfig;
pub use distributor::RoomKeyDistributor;
pub use engine::{E2eEngine, EngineState};
pub use error::{CryptoError, CryptoResult};
pub use fingerprint::{generate_fingerprint, Fingerprint};
pub use identity::{IdentityKeyStore, InitOutcome};
pub use keys::{IdentityKeyPair, PrivateKey, PublicKey, SymmetricKey};
pub use provider::{CryptoProvider, NativeCrypto};
pub use room::RoomKeyStore;
pub use shared::SharedKeyDeriver;
pub use store::{FileStore, KeyValueStore, MemoryStore};
