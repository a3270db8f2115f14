//! Integration tests for the OIDC login flow against a mock provider

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marquee_auth::oidc::{CallbackParams, OidcFlow};
use marquee_auth::state::{MemoryStateStore, StateStore};
use marquee_auth::{AuthError, AuthProvider};

use common::{flow, flow_config, id_token_claims, mount_provider, sign, sign_with, OTHER_RSA_PEM};

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .expect("authorization URL must parse")
        .query_pairs()
        .into_owned()
        .collect()
}

fn token_response(id_token: Option<String>) -> ResponseTemplate {
    let mut body = json!({
        "access_token": "access-abc",
        "token_type": "Bearer",
        "refresh_token": "refresh-abc",
        "expires_in": 300,
    });
    if let Some(token) = id_token {
        body["id_token"] = json!(token);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

async fn mount_token(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn callback(state: &str) -> CallbackParams {
    CallbackParams {
        state: state.to_string(),
        code: "auth-code-1".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_discover_resolves_provider_metadata() {
    let server = MockServer::start().await;
    mount_provider(&server).await;

    let flow = OidcFlow::discover(flow_config(&server), Arc::new(MemoryStateStore::new()))
        .await
        .expect("discovery should succeed");

    assert_eq!(flow.metadata().issuer, server.uri());
    assert_eq!(
        flow.metadata().token_endpoint,
        format!("{}/token", server.uri())
    );
}

#[tokio::test]
async fn test_discover_rejects_issuer_mismatch() {
    let server = MockServer::start().await;
    let mut document = common::discovery_document(&server);
    document["issuer"] = json!("https://elsewhere.example.com");
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document))
        .mount(&server)
        .await;

    let err = OidcFlow::discover(flow_config(&server), Arc::new(MemoryStateStore::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn test_discover_unreachable_document_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = OidcFlow::discover(flow_config(&server), Arc::new(MemoryStateStore::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Upstream(_)), "got {err:?}");
}

#[tokio::test]
async fn test_full_login_succeeds_and_sends_verifier() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let store = Arc::new(MemoryStateStore::new());
    let flow = flow(&server, store.clone());

    let login = flow.begin_login("/libraries/movies").await.unwrap();
    let entry = store.get(&login.state).await.unwrap();
    let params = query(&login.authorization_url);
    assert_eq!(params["nonce"], entry.nonce);

    let id_token = sign(&id_token_claims(&server.uri(), &entry.nonce));
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!(
            "code_verifier={}",
            entry.code_verifier
        )))
        .respond_with(token_response(Some(id_token)))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = flow.handle_callback(&callback(&login.state)).await.unwrap();

    assert_eq!(outcome.post_login_redirect, "/libraries/movies");
    assert_eq!(outcome.subject.subject_id, "user-123");
    assert_eq!(outcome.subject.username, "alice");
    assert_eq!(outcome.subject.email, "alice@example.com");
    assert!(outcome.subject.groups.contains("admins"));
    assert_eq!(outcome.subject.issuer, server.uri());
    assert_eq!(outcome.subject.provider, AuthProvider::Oidc);
    assert_eq!(outcome.tokens.refresh_token.as_deref(), Some("refresh-abc"));

    // the state was consumed
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_replayed_callback_is_rejected() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let store = Arc::new(MemoryStateStore::new());
    let flow = flow(&server, store.clone());

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    mount_token(
        &server,
        token_response(Some(sign(&id_token_claims(&server.uri(), &nonce)))),
    )
    .await;

    flow.handle_callback(&callback(&login.state)).await.unwrap();
    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert_eq!(err, AuthError::InvalidOrExpiredState);
}

#[tokio::test]
async fn test_concurrent_callbacks_only_one_succeeds() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    mount_token(
        &server,
        token_response(Some(sign(&id_token_claims(&server.uri(), &nonce)))),
    )
    .await;

    let params = callback(&login.state);
    let results =
        futures::future::join_all((0..8).map(|_| flow.handle_callback(&params))).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_eq!(
            result.as_ref().unwrap_err(),
            &AuthError::InvalidOrExpiredState
        );
    }
}

#[tokio::test]
async fn test_forged_state_is_rejected_without_token_call() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response(None))
        .expect(0)
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStateStore::new());
    let flow = flow(&server, store.clone());

    let login = flow.begin_login("/").await.unwrap();
    let forged = "A".repeat(login.state.len());

    let err = flow.handle_callback(&callback(&forged)).await.unwrap_err();
    assert_eq!(err, AuthError::InvalidOrExpiredState);
    // the genuine attempt is untouched
    assert!(store.get(&login.state).await.is_ok());
}

#[tokio::test]
async fn test_nonce_mismatch_is_rejected() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    mount_token(
        &server,
        token_response(Some(sign(&id_token_claims(
            &server.uri(),
            "nonce-from-another-login",
        )))),
    )
    .await;

    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert_eq!(err, AuthError::NonceMismatch);
}

#[tokio::test]
async fn test_pkce_rejection_is_reported() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "PKCE verification failed: code_verifier does not match",
        })),
    )
    .await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert!(matches!(err, AuthError::PkceVerificationFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_token_endpoint_failure_is_exchange_error() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_client" })),
    )
    .await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchangeFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_missing_id_token_is_exchange_error() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    mount_token(&server, token_response(None)).await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchangeFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_forged_signature_is_rejected() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    mount_token(
        &server,
        token_response(Some(sign_with(
            &id_token_claims(&server.uri(), &nonce),
            OTHER_RSA_PEM,
        ))),
    )
    .await;

    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchangeFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_wrong_audience_is_rejected() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    let mut claims = id_token_claims(&server.uri(), &nonce);
    claims["aud"] = json!("some-other-client");
    mount_token(&server, token_response(Some(sign(&claims)))).await;

    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchangeFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_missing_subject_claim_fails_mapping() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    let mut claims = id_token_claims(&server.uri(), &nonce);
    claims
        .as_object_mut()
        .expect("claims are an object")
        .remove("sub");
    mount_token(&server, token_response(Some(sign(&claims)))).await;

    let err = flow.handle_callback(&callback(&login.state)).await.unwrap_err();
    assert!(matches!(err, AuthError::ClaimsMappingFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_cached_keys_survive_jwks_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::jwks()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = flow_config(&server);
    // every lookup attempts a refresh
    config.jwks_cache_ttl = Duration::ZERO;
    let flow = OidcFlow::new(
        config,
        common::provider_metadata(&server),
        Arc::new(MemoryStateStore::new()),
    )
    .unwrap();

    for _ in 0..2 {
        let login = flow.begin_login("/").await.unwrap();
        let nonce = query(&login.authorization_url)["nonce"].clone();
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response(Some(sign(&id_token_claims(
                &server.uri(),
                &nonce,
            )))))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        flow.handle_callback(&callback(&login.state)).await.unwrap();
    }

    let jwks_requests = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/jwks")
        .count();
    assert_eq!(jwks_requests, 2);
}

#[tokio::test]
async fn test_refresh_exchanges_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-new",
            "token_type": "Bearer",
            "expires_in": 300,
        })))
        .expect(1)
        .mount(&server)
        .await;
    let flow = flow(&server, Arc::new(MemoryStateStore::new()));

    let tokens = flow.refresh("refresh-abc").await.unwrap();
    assert_eq!(tokens.access_token, "access-new");
    assert!(matches!(
        flow.refresh("").await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn test_client_secret_is_sent_when_configured() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let mut config = flow_config(&server);
    config.client_secret = Some("s3cret".to_string());
    let flow = OidcFlow::new(
        config,
        common::provider_metadata(&server),
        Arc::new(MemoryStateStore::new()),
    )
    .unwrap();

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_secret=s3cret"))
        .respond_with(token_response(Some(sign(&id_token_claims(
            &server.uri(),
            &nonce,
        )))))
        .expect(1)
        .mount(&server)
        .await;

    flow.handle_callback(&callback(&login.state)).await.unwrap();
}

#[tokio::test]
async fn test_durable_store_drives_login() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    let dir = common::temp_dir();
    let store: Arc<dyn StateStore> = Arc::new(
        marquee_auth::state::DurableStateStore::open(dir.path().join("oidc_state")).unwrap(),
    );
    let flow = flow(&server, store.clone());

    let login = flow.begin_login("/").await.unwrap();
    let nonce = query(&login.authorization_url)["nonce"].clone();
    mount_token(
        &server,
        token_response(Some(sign(&id_token_claims(&server.uri(), &nonce)))),
    )
    .await;

    flow.handle_callback(&callback(&login.state)).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}
