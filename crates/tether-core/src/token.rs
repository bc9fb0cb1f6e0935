//! Agent token generation and hashing
//!
//! Tokens are 32 random bytes, hex-encoded. The server only ever stores
//! the SHA-256 digest of a token; agents present the plaintext.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of a token in bytes (before hex encoding)
const TOKEN_BYTES: usize = 32;

/// Generate a new random token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Hex SHA-256 digest of a token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Whether a string looks like a digest produced by [`hash_token`]
pub fn is_token_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
