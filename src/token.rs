//! Signer Bearer Tokens
//!
//! 32 bytes of OS entropy, hex-encoded for the signing URL. Only the SHA-256
//! digest of the raw token is ever persisted; lookups digest the presented
//! value and compare digests in constant time.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Token lifetime from send (or reminder re-issue).
pub const TOKEN_EXPIRY_DAYS: i64 = 7;

/// Generate a fresh raw token. The caller hands it to the notifier for
/// delivery and must not retain it.
pub fn generate() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex SHA-256 digest of a raw token, the only form that is stored.
pub fn digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time digest comparison. Both sides are digests, so length is
/// fixed; the ct compare resists timing probes on the lookup path.
pub fn digest_matches(stored: &str, presented_digest: &str) -> bool {
    if stored.len() != presented_digest.len() {
        return false;
    }
    stored
        .as_bytes()
        .ct_eq(presented_digest.as_bytes())
        .into()
}
