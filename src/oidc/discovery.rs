//! OpenID Connect provider discovery
//!
//! Discovery runs once when an [`super::OidcFlow`] is constructed. The
//! resulting [`ProviderMetadata`] is fixed for the life of the flow.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Subset of the OpenID Provider Metadata document used by the login flow.
///
/// # Examples
///
/// ```
/// use marquee_auth::oidc::discovery::ProviderMetadata;
///
/// let json = r#"{
///     "issuer": "https://id.example.com",
///     "authorization_endpoint": "https://id.example.com/authorize",
///     "token_endpoint": "https://id.example.com/token",
///     "jwks_uri": "https://id.example.com/jwks"
/// }"#;
///
/// let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
/// assert!(meta.end_session_endpoint.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must equal the configured issuer
    pub issuer: String,

    /// Authorization endpoint the browser is redirected to
    pub authorization_endpoint: String,

    /// Token endpoint for code and refresh grants
    pub token_endpoint: String,

    /// JSON Web Key Set used to verify ID token signatures
    pub jwks_uri: String,

    /// RP-initiated logout endpoint, if the provider has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// UserInfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// PKCE challenge methods the provider advertises
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Fetches the provider metadata for `issuer`.
///
/// Tries `<issuer>/.well-known/openid-configuration` first and then the
/// path-inserted form `<origin>/.well-known/openid-configuration<path>`
/// used by some multi-tenant providers. The returned document's `issuer` must
/// match the configured issuer, ignoring a trailing slash.
///
/// # Errors
///
/// Returns `AuthError::Upstream` if no candidate URL yields a valid document,
/// and `AuthError::Config` if the document names a different issuer.
pub async fn fetch_provider_metadata(
    http: &reqwest::Client,
    issuer: &Url,
    timeout: Duration,
) -> Result<ProviderMetadata> {
    let mut last_error = String::from("no discovery URL could be built");

    for candidate in candidate_urls(issuer) {
        tracing::debug!(url = %candidate, "fetching OIDC discovery document");
        let resp = match http.get(candidate.clone()).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = format!("{}: {}", candidate, e);
                continue;
            }
        };

        if !resp.status().is_success() {
            last_error = format!("{}: HTTP {}", candidate, resp.status());
            continue;
        }

        match resp.json::<ProviderMetadata>().await {
            Ok(meta) => {
                ensure_issuer_matches(&meta, issuer)?;
                return Ok(meta);
            }
            Err(e) => last_error = format!("{}: invalid document: {}", candidate, e),
        }
    }

    Err(AuthError::Upstream(format!(
        "OIDC discovery failed for issuer {}: {}",
        issuer, last_error
    )))
}

/// Rejects metadata whose issuer differs from the configured one.
pub fn ensure_issuer_matches(metadata: &ProviderMetadata, issuer: &Url) -> Result<()> {
    let expected = issuer.as_str().trim_end_matches('/');
    if metadata.issuer.trim_end_matches('/') != expected {
        return Err(AuthError::Config(format!(
            "discovered issuer {} does not match configured issuer {}",
            metadata.issuer, expected
        )));
    }
    Ok(())
}

fn candidate_urls(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/');
    let mut candidates = Vec::with_capacity(2);

    let mut appended = issuer.clone();
    appended.set_path(&format!("{}/.well-known/openid-configuration", path));
    appended.set_query(None);
    appended.set_fragment(None);
    candidates.push(appended);

    if !path.is_empty() {
        let mut inserted = issuer.clone();
        inserted.set_path(&format!("/.well-known/openid-configuration{}", path));
        inserted.set_query(None);
        inserted.set_fragment(None);
        candidates.push(inserted);
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_root_issuer() {
        let issuer = Url::parse("https://id.example.com").unwrap();
        let urls = candidate_urls(&issuer);
        assert_eq!(urls.len(), 1);
        assert_eq!(
            urls[0].as_str(),
            "https://id.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_candidate_urls_with_path() {
        let issuer = Url::parse("https://id.example.com/realms/media/").unwrap();
        let urls = candidate_urls(&issuer);
        assert_eq!(
            urls[0].as_str(),
            "https://id.example.com/realms/media/.well-known/openid-configuration"
        );
        assert_eq!(
            urls[1].as_str(),
            "https://id.example.com/.well-known/openid-configuration/realms/media"
        );
    }

    #[test]
    fn test_issuer_match_ignores_trailing_slash() {
        let meta: ProviderMetadata = serde_json::from_value(serde_json::json!({
            "issuer": "https://id.example.com/",
            "authorization_endpoint": "https://id.example.com/authorize",
            "token_endpoint": "https://id.example.com/token",
            "jwks_uri": "https://id.example.com/jwks",
        }))
        .unwrap();

        assert!(ensure_issuer_matches(&meta, &Url::parse("https://id.example.com").unwrap()).is_ok());
        assert!(matches!(
            ensure_issuer_matches(&meta, &Url::parse("https://evil.example.com").unwrap()),
            Err(AuthError::Config(_))
        ));
    }
}
