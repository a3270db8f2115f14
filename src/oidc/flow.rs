//! The OIDC login orchestrator

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::discovery::{ensure_issuer_matches, fetch_provider_metadata, ProviderMetadata};
use super::id_token::{IdTokenVerifier, JwksCache};
use super::pkce::{verify_s256_support, PkceChallenge, METHOD_S256};
use super::{parse_http_url, OidcFlowConfig};
use crate::error::{AuthError, Result};
use crate::secret::{constant_time_eq, random_token};
use crate::state::{key_prefix, StateEntry, StateStore};
use crate::subject::AuthSubject;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where to send the browser to start a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Provider authorization URL including all query parameters
    pub authorization_url: String,
    /// State key bound to this attempt
    pub state: String,
}

/// Parameters the provider appends to the redirect URL.
///
/// Deserializes directly from the callback query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    /// Echoed state key
    #[serde(default)]
    pub state: String,
    /// Authorization code
    #[serde(default)]
    pub code: String,
    /// Provider error code, present when the user or provider refused
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable error detail
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Tokens returned by the provider's token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: String,
    /// Refresh token, when issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Signed ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Result of a completed login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Verified identity
    pub subject: AuthSubject,
    /// Redirect target recorded when the login began
    pub post_login_redirect: String,
    /// Raw provider tokens, for callers that keep refresh tokens
    pub tokens: TokenSet,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// OidcFlow
// ---------------------------------------------------------------------------

/// Drives authorization-code logins against one OIDC provider.
///
/// The flow is cheap to share behind an `Arc`; all per-attempt state lives
/// in the [`StateStore`].
pub struct OidcFlow {
    config: OidcFlowConfig,
    metadata: ProviderMetadata,
    authorization_endpoint: Url,
    end_session_endpoint: Option<Url>,
    scope: String,
    store: Arc<dyn StateStore>,
    http: reqwest::Client,
    verifier: IdTokenVerifier,
}

impl fmt::Debug for OidcFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcFlow")
            .field("issuer", &self.metadata.issuer)
            .field("client_id", &self.config.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl OidcFlow {
    /// Validates `config`, discovers the provider and builds the flow.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` for invalid configuration or a provider
    /// that cannot satisfy it, and `AuthError::Upstream` when discovery
    /// fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use marquee_auth::oidc::{OidcFlow, OidcFlowConfig};
    /// use marquee_auth::state::MemoryStateStore;
    ///
    /// # async fn example() -> marquee_auth::error::Result<()> {
    /// let config = OidcFlowConfig::new(
    ///     "https://id.example.com",
    ///     "marquee",
    ///     "https://marquee.example.com/auth/oidc/callback",
    /// );
    /// let flow = OidcFlow::discover(config, Arc::new(MemoryStateStore::new())).await?;
    /// let login = flow.begin_login("/dashboard").await?;
    /// println!("redirect to {}", login.authorization_url);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn discover(config: OidcFlowConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        config.validate()?;
        let http = build_http_client()?;
        let issuer = parse_http_url("issuer_url", &config.issuer_url)?;
        let metadata = fetch_provider_metadata(&http, &issuer, config.request_timeout).await?;
        tracing::info!(issuer = %metadata.issuer, "discovered OIDC provider");
        Self::with_client(config, metadata, store, http)
    }

    /// Builds the flow from already-resolved provider metadata.
    ///
    /// # Errors
    ///
    /// Same configuration errors as [`OidcFlow::discover`].
    pub fn new(
        config: OidcFlowConfig,
        metadata: ProviderMetadata,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        Self::with_client(config, metadata, store, build_http_client()?)
    }

    /// Builds the flow with a caller-supplied HTTP client.
    pub fn with_client(
        config: OidcFlowConfig,
        metadata: ProviderMetadata,
        store: Arc<dyn StateStore>,
        http: reqwest::Client,
    ) -> Result<Self> {
        config.validate()?;
        let issuer = parse_http_url("issuer_url", &config.issuer_url)?;
        ensure_issuer_matches(&metadata, &issuer)?;
        if config.pkce_enabled {
            verify_s256_support(&metadata)?;
        }

        let authorization_endpoint =
            parse_http_url("authorization_endpoint", &metadata.authorization_endpoint)?;
        parse_http_url("token_endpoint", &metadata.token_endpoint)?;
        parse_http_url("jwks_uri", &metadata.jwks_uri)?;
        let end_session_endpoint = metadata
            .end_session_endpoint
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| parse_http_url("end_session_endpoint", s))
            .transpose()?;

        let jwks = JwksCache::new(
            http.clone(),
            metadata.jwks_uri.clone(),
            config.jwks_cache_ttl,
            config.request_timeout,
        );
        let verifier = IdTokenVerifier::new(
            metadata.issuer.clone(),
            config.client_id.clone(),
            config.clock_skew,
            jwks,
        );
        let scope = config.effective_scopes().join(" ");

        Ok(Self {
            config,
            metadata,
            authorization_endpoint,
            end_session_endpoint,
            scope,
            store,
            http,
            verifier,
        })
    }

    /// Provider metadata resolved at construction.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Configuration the flow was built with.
    pub fn config(&self) -> &OidcFlowConfig {
        &self.config
    }

    /// Starts a login attempt.
    ///
    /// Generates the state key, PKCE verifier and nonce, stores them with
    /// `post_login_redirect`, and returns the authorization URL.
    ///
    /// # Errors
    ///
    /// Propagates state store failures.
    pub async fn begin_login(&self, post_login_redirect: &str) -> Result<LoginRequest> {
        let state = random_token();
        let pkce = self.config.pkce_enabled.then(PkceChallenge::generate);
        let nonce = self.config.nonce_enabled.then(random_token);

        let mut entry = StateEntry::with_ttl(self.config.state_ttl);
        entry.post_login_redirect = post_login_redirect.to_string();
        if let Some(pkce) = &pkce {
            entry.code_verifier = pkce.verifier.clone();
        }
        if let Some(nonce) = &nonce {
            entry.nonce = nonce.clone();
        }

        let authorization_url = self.build_authorization_url(
            &state,
            pkce.as_ref().map(|p| p.challenge.as_str()),
            nonce.as_deref(),
        );

        self.store.store(&state, &entry).await?;
        tracing::info!(
            state = %key_prefix(&state),
            pkce = pkce.is_some(),
            nonce = nonce.is_some(),
            "began OIDC login"
        );

        Ok(LoginRequest {
            authorization_url,
            state,
        })
    }

    /// Completes a login attempt from the provider's callback parameters.
    ///
    /// The state entry is consumed before anything else can fail, so the
    /// same state can never be redeemed twice.
    ///
    /// # Errors
    ///
    /// - `AuthError::ProviderDenied` if the provider reported an error
    /// - `AuthError::InvalidOrExpiredState` for an unknown, used or expired
    ///   state
    /// - `AuthError::PkceVerificationFailed` if the provider rejected the
    ///   code verifier
    /// - `AuthError::TokenExchangeFailed` if the exchange or ID token
    ///   verification failed
    /// - `AuthError::NonceMismatch` if the ID token nonce is wrong
    /// - `AuthError::ClaimsMappingFailed` if no subject could be mapped
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<LoginOutcome> {
        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            tracing::warn!(
                error,
                description = params.error_description.as_deref().unwrap_or(""),
                "OIDC provider denied authorization"
            );
            return Err(AuthError::ProviderDenied {
                error: error.to_string(),
                description: params.error_description.clone(),
            });
        }

        if params.state.is_empty() {
            return Err(AuthError::InvalidOrExpiredState);
        }

        let entry = match self.store.take(&params.state).await {
            Ok(entry) => entry,
            Err(e) if e.is_missing() => {
                tracing::warn!(state = %key_prefix(&params.state), "rejected OIDC callback state");
                return Err(AuthError::InvalidOrExpiredState);
            }
            Err(e) => return Err(e),
        };

        if params.code.is_empty() {
            return Err(AuthError::TokenExchangeFailed(
                "callback carried no authorization code".to_string(),
            ));
        }

        let code_verifier = if self.config.pkce_enabled {
            if entry.code_verifier.is_empty() {
                return Err(AuthError::PkceVerificationFailed(
                    "no code verifier bound to state".to_string(),
                ));
            }
            Some(entry.code_verifier.as_str())
        } else {
            None
        };

        let tokens = self.exchange_code(&params.code, code_verifier).await?;
        let id_token = tokens
            .id_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::TokenExchangeFailed("token response has no id_token".to_string())
            })?;

        let claims = self.verifier.verify(id_token).await?;

        if !entry.nonce.is_empty() {
            let received = claims.get("nonce").and_then(Value::as_str).unwrap_or("");
            if !constant_time_eq(received, &entry.nonce) {
                tracing::warn!(state = %key_prefix(&params.state), "ID token nonce mismatch");
                return Err(AuthError::NonceMismatch);
            }
        }

        let subject =
            self.config
                .claims
                .map(&claims, &self.metadata.issuer, &self.config.default_roles)?;

        tracing::info!(
            subject = %subject.subject_id,
            username = %subject.username,
            "completed OIDC login"
        );

        Ok(LoginOutcome {
            subject,
            post_login_redirect: entry.post_login_redirect,
            tokens,
        })
    }

    /// Builds an RP-initiated logout URL.
    ///
    /// Returns `None` when the provider has no end-session endpoint. Nothing
    /// is stored; the `state` parameter is informational for the provider.
    pub fn logout_url(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect: Option<&str>,
    ) -> Option<String> {
        let mut url = self.end_session_endpoint.clone()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint.filter(|h| !h.is_empty()) {
                query.append_pair("id_token_hint", hint);
            }
            if let Some(redirect) = post_logout_redirect.filter(|r| !r.is_empty()) {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("state", &random_token());
        }
        Some(url.into())
    }

    /// Exchanges a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for an empty token and
    /// `AuthError::TokenExchangeFailed` if the provider rejects it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        if refresh_token.is_empty() {
            return Err(AuthError::Validation("refresh token is empty".to_string()));
        }

        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.config.client_id);
        if let Some(secret) = self.config.client_secret.as_deref().filter(|s| !s.is_empty()) {
            params.insert("client_secret", secret);
        }

        let tokens = self.post_token(&params).await?;
        tracing::debug!("refreshed OIDC tokens");
        Ok(tokens)
    }

    fn build_authorization_url(
        &self,
        state: &str,
        code_challenge: Option<&str>,
        nonce: Option<&str>,
    ) -> String {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_url);
            query.append_pair("scope", &self.scope);
            query.append_pair("state", state);
            if let Some(challenge) = code_challenge {
                query.append_pair("code_challenge", challenge);
                query.append_pair("code_challenge_method", METHOD_S256);
            }
            if let Some(nonce) = nonce {
                query.append_pair("nonce", nonce);
            }
        }
        url.into()
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSet> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &self.config.redirect_url);
        params.insert("client_id", &self.config.client_id);
        if let Some(secret) = self.config.client_secret.as_deref().filter(|s| !s.is_empty()) {
            params.insert("client_secret", secret);
        }
        if let Some(verifier) = code_verifier {
            params.insert("code_verifier", verifier);
        }

        self.post_token(&params).await
    }

    async fn post_token(&self, params: &HashMap<&str, &str>) -> Result<TokenSet> {
        let resp = self
            .http
            .post(&self.metadata.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_token_error(status, &body));
        }

        resp.json::<TokenSet>().await.map_err(|e| {
            AuthError::TokenExchangeFailed(format!("failed to parse token response: {e}"))
        })
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("marquee-auth/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))
}

/// Maps a token endpoint rejection to an error kind. An `invalid_grant`
/// that names the verifier means the PKCE proof failed.
fn classify_token_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    if let Ok(parsed) = serde_json::from_str::<TokenErrorResponse>(body) {
        let description = parsed.error_description.unwrap_or_default();
        let lowered = description.to_ascii_lowercase();
        if parsed.error == "invalid_grant"
            && (lowered.contains("verifier") || lowered.contains("pkce"))
        {
            return AuthError::PkceVerificationFailed(description);
        }
        if !parsed.error.is_empty() {
            return AuthError::TokenExchangeFailed(format!(
                "token endpoint returned {status}: {} {}",
                parsed.error, description
            ));
        }
    }
    AuthError::TokenExchangeFailed(format!("token endpoint returned {status}: {body}"))
}
