//! OpenID Connect authorization-code login with PKCE and nonce binding
//!
//! A login attempt moves through three steps:
//!
//! 1. [`OidcFlow::begin_login`] generates a `state` key, a PKCE verifier and
//!    a nonce, stores them in the [`crate::state::StateStore`], and returns the
//!    provider authorization URL.
//! 2. The provider redirects the browser back with `state` and `code`.
//! 3. [`OidcFlow::handle_callback`] consumes the state entry, exchanges the
//!    code, verifies the ID token and maps its claims to an
//!    [`crate::subject::AuthSubject`].
//!
//! A state entry is consumed before the code is exchanged, so each login
//! attempt can complete at most once.

use std::time::Duration;

use url::Url;

use crate::error::{AuthError, Result};

pub mod claims;
pub mod discovery;
pub mod flow;
pub mod id_token;
pub mod pkce;

pub use claims::ClaimsMapping;
pub use discovery::ProviderMetadata;
pub use flow::{CallbackParams, LoginOutcome, LoginRequest, OidcFlow, TokenSet};

/// Default lifetime of a login attempt.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Largest tolerated clock difference between us and the provider.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

/// Scope every request carries regardless of configuration.
pub const OPENID_SCOPE: &str = "openid";

/// Settings for one OIDC client registration.
///
/// Validated when an [`OidcFlow`] is constructed; a flow never starts with an
/// invalid configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcFlowConfig {
    /// Issuer URL; discovery runs against it
    pub issuer_url: String,
    /// Client identifier registered with the provider
    pub client_id: String,
    /// Client secret for confidential clients
    pub client_secret: Option<String>,
    /// Callback URL registered with the provider
    pub redirect_url: String,
    /// Requested scopes; `openid` is added when missing
    pub scopes: Vec<String>,
    /// Send a PKCE S256 challenge
    pub pkce_enabled: bool,
    /// Bind a nonce into the ID token
    pub nonce_enabled: bool,
    /// How long a login attempt stays redeemable
    pub state_ttl: Duration,
    /// Leeway applied to `exp` and `nbf`
    pub clock_skew: Duration,
    /// How long fetched signing keys are trusted
    pub jwks_cache_ttl: Duration,
    /// Deadline for each request to the provider
    pub request_timeout: Duration,
    /// Claim candidates for subject fields
    pub claims: ClaimsMapping,
    /// Roles given to subjects whose token carries none
    pub default_roles: Vec<String>,
}

impl OidcFlowConfig {
    /// Creates a configuration with PKCE and nonce enabled and default
    /// timings.
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_url: redirect_url.into(),
            scopes: vec![
                OPENID_SCOPE.to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            pkce_enabled: true,
            nonce_enabled: true,
            state_ttl: DEFAULT_STATE_TTL,
            clock_skew: Duration::from_secs(60),
            jwks_cache_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            claims: ClaimsMapping::default(),
            default_roles: Vec::new(),
        }
    }

    /// Checks that the configuration can drive a login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        parse_http_url("issuer_url", &self.issuer_url)?;
        parse_http_url("redirect_url", &self.redirect_url)?;

        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("oidc client_id is required".to_string()));
        }
        if self.state_ttl.is_zero() {
            return Err(AuthError::Config("oidc state_ttl must be positive".to_string()));
        }
        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(AuthError::Config(format!(
                "oidc clock_skew must be at most {} seconds",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(AuthError::Config(
                "oidc request_timeout must be positive".to_string(),
            ));
        }
        if self.claims.subject.is_empty() {
            return Err(AuthError::Config(
                "oidc claims mapping needs at least one subject claim".to_string(),
            ));
        }
        Ok(())
    }

    /// Scopes to request: `openid` first, then the configured scopes without
    /// blanks or duplicates.
    pub fn effective_scopes(&self) -> Vec<String> {
        let mut scopes = vec![OPENID_SCOPE.to_string()];
        for scope in &self.scopes {
            let scope = scope.trim();
            if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }
}

pub(crate) fn parse_http_url(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| AuthError::Config(format!("{} {:?} is not a valid URL: {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AuthError::Config(format!(
            "{} must use http or https, got {}",
            field, other
        ))),
    }
}
