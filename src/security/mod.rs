//! Secure token generation and one-way hashing
//!
//! Opaque secrets (refresh tokens, CSRF state parameters) are random
//! URL-safe strings; only their SHA-256 hashes are ever stored or used as
//! lookup keys. The inputs are already high-entropy, so the hash is unsalted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Entropy used for OAuth2 state parameters
pub const STATE_TOKEN_BYTES: usize = 32;

/// Entropy used for refresh token secrets
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Generate a cryptographically secure random token
///
/// Returns a URL-safe base64 string (no padding) carrying `byte_len` bytes
/// of OS-sourced entropy.
#[must_use]
pub fn generate_secure_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token with SHA-256, returning the lowercase hex digest
#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// Generate an OAuth2 state parameter for CSRF protection
#[must_use]
pub fn generate_state_parameter() -> String {
    generate_secure_token(STATE_TOKEN_BYTES)
}

/// Check a raw state parameter against a stored hash
#[must_use]
pub fn verify_state_hash(state: &str, stored_hash: &str) -> bool {
    hash_token(state) == stored_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique() {
        let a = generate_secure_token(32);
        let b = generate_secure_token(32);
        assert_ne!(a, b);
    }

    #[test]
    fn token_length_scales_with_entropy() {
        // base64 without padding: ceil(n * 4 / 3) characters
        assert_eq!(generate_secure_token(32).len(), 43);
        assert_eq!(generate_secure_token(64).len(), 86);
    }

    #[test]
    fn tokens_are_url_safe() {
        let token = generate_secure_token(64);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn hash_is_deterministic_hex_sha256() {
        let digest = hash_token("fixed-input");
        assert_eq!(digest, hash_token("fixed-input"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        // Known vector
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn state_hash_round_trip() {
        let state = generate_state_parameter();
        let stored = hash_token(&state);
        assert!(verify_state_hash(&state, &stored));
        assert!(!verify_state_hash("different-state", &stored));
    }
}
