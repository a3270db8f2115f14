//! PKCE S256 challenge generation (RFC 7636)
//!
//! The login flow generates a verifier, sends its SHA-256 challenge on the
//! authorization redirect, and presents the verifier at the token endpoint.
//! An attacker who intercepts the authorization code cannot redeem it
//! without the verifier, which never leaves the server.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use sha2::{Digest, Sha256};

use super::discovery::ProviderMetadata;
use crate::error::{AuthError, Result};

/// The only challenge method this crate emits.
pub const METHOD_S256: &str = "S256";

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE verifier and its derived S256 challenge.
///
/// # Examples
///
/// ```
/// use marquee_auth::oidc::pkce::PkceChallenge;
///
/// let pkce = PkceChallenge::generate();
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_eq!(pkce.challenge, PkceChallenge::challenge_for(&pkce.verifier));
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// 32 random bytes, base64url without padding (43 characters)
    pub verifier: String,

    /// `BASE64URL(SHA256(ASCII(verifier)))`
    pub challenge: String,
}

impl PkceChallenge {
    /// Generates a fresh verifier and its challenge.
    pub fn generate() -> Self {
        let verifier = crate::secret::random_token();
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Computes the S256 challenge for `verifier`.
    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }
}

/// Checks that the provider can accept S256 challenges.
///
/// Providers that omit `code_challenge_methods_supported` are accepted,
/// since many PKCE-capable providers do not advertise it. Providers that
/// advertise a list without `S256` are rejected, because they would only
/// accept the `plain` method.
///
/// # Errors
///
/// Returns `AuthError::Config` when the advertised list lacks `S256`.
pub fn verify_s256_support(metadata: &ProviderMetadata) -> Result<()> {
    match &metadata.code_challenge_methods_supported {
        None => Ok(()),
        Some(methods) if methods.iter().any(|m| m == METHOD_S256) => Ok(()),
        Some(methods) => Err(AuthError::Config(format!(
            "provider {} does not support PKCE S256 (advertises {:?})",
            metadata.issuer, methods
        ))),
    }
}
