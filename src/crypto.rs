//! Digest primitives for TouristID

use sha2::{Digest, Sha256};

/// Sentinel stored as the hash of the genesis block.
pub const GENESIS_HASH: &str = "GENESIS";

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

pub type Sha256Hash = [u8; 32];

/// SHA-256 of `data`.
pub fn digest(data: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of `data`, lowercase hex encoded.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(digest(data))
}

/// True when `s` looks like a hex-encoded SHA-256 digest.
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
