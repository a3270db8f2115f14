//! Error types for marquee-auth
//!
//! Every fallible operation in the library returns [`AuthError`]. The enum is
//! closed and compared by value, so callers match on kinds directly instead of
//! inspecting messages. Underlying causes are carried as strings for logging.

use thiserror::Error;

/// Error kinds produced by the state stores and the authentication flows.
///
/// The store boundary distinguishes [`AuthError::NotFound`] from
/// [`AuthError::Expired`]; the OIDC flow collapses both into
/// [`AuthError::InvalidOrExpiredState`] so that a caller probing random state
/// values learns nothing about which ones exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed input: empty key, bad header, weak password
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid flow or application configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key or PIN is not known
    #[error("Entry not found")]
    NotFound,

    /// Key or PIN exists but its lifetime has elapsed
    #[error("Entry expired")]
    Expired,

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// The identity provider reported an error on the callback
    #[error("Provider denied authorization: {error}")]
    ProviderDenied {
        /// The `error` parameter returned by the provider
        error: String,
        /// The optional `error_description` parameter
        description: Option<String>,
    },

    /// The callback state is unknown, already used, or expired
    #[error("Invalid or expired state")]
    InvalidOrExpiredState,

    /// The provider rejected the PKCE code verifier
    #[error("PKCE verification failed: {0}")]
    PkceVerificationFailed(String),

    /// The ID token nonce does not match the one issued with the state
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// Code exchange or ID token verification failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The verified claims could not be mapped into a subject
    #[error("Claims mapping failed: {0}")]
    ClaimsMappingFailed(String),

    /// An upstream service was unreachable or answered unexpectedly
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The PIN was already exchanged for a subject
    #[error("PIN already consumed")]
    AlreadyConsumed,

    /// Credentials did not match
    #[error("Unauthorized")]
    Unauthorized,

    /// The operation was cancelled by its owner
    #[error("Operation cancelled")]
    Cancelled,
}

impl AuthError {
    /// Returns true for the two store-level "no usable entry" kinds.
    pub fn is_missing(&self) -> bool {
        matches!(self, AuthError::NotFound | AuthError::Expired)
    }
}

impl From<sled::Error> for AuthError {
    fn from(err: sled::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Result type alias for marquee-auth operations
pub type Result<T> = std::result::Result<T, AuthError>;
