// hasher.rs - SHA-256 helpers for the audit chain.
//
// Digests are 64-character lowercase hex strings so they sit naturally in
// JSON lines.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes into lowercase hex SHA-256.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}
