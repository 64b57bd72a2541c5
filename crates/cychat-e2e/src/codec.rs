//! Portable text encoding for key material and envelopes.
//!
//! Everything that leaves the engine (exported keys, envelopes, wrapped room
//! keys) is standard base64 with padding, which is what browser peers produce
//! with `btoa`.

use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

/// Encode bytes as base64.
pub fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 string to bytes.
pub fn base64_decode(data: &str) -> CryptoResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| CryptoError::InvalidEncoding(format!("Invalid base64: {}", e)))
}

/// UTF-8 text to bytes.
pub fn text_to_bytes(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Bytes to UTF-8 text, rejecting invalid sequences.
pub fn bytes_to_text(bytes: Vec<u8>) -> CryptoResult<String> {
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::InvalidEncoding(format!("Invalid UTF-8: {}", e)))
}
