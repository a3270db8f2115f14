//! Random tokens and timing-safe comparison

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// Returns 32 random bytes encoded as base64url without padding.
///
/// Used for OIDC `state` keys, nonces and PKCE verifiers. The 43-character
/// result carries 256 bits of entropy.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares two strings in time independent of where they differ.
///
/// Both inputs are hashed first, so the comparison always walks 32 bytes and
/// the running time does not reveal the length of either input.
///
/// # Examples
///
/// ```
/// use marquee_auth::secret::constant_time_eq;
///
/// assert!(constant_time_eq("admin", "admin"));
/// assert!(!constant_time_eq("admin", "Admin"));
/// assert!(!constant_time_eq("admin", "administrator"));
/// ```
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let left = Sha256::digest(a.as_bytes());
    let right = Sha256::digest(b.as_bytes());
    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
