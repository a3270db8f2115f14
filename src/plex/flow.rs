//! plex.tv PIN API client and approval state machine

use std::collections::BTreeSet;

use chrono::Utc;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::pins::{PinRegistry, PinRequest};
use super::{PinApproval, PinChallenge, PlexFlowConfig, PLEX_ISSUER};
use crate::error::{AuthError, Result};
use crate::subject::{AuthProvider, AuthSubject};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PinResponse {
    id: u64,
    #[serde(default)]
    code: String,
    #[serde(default, alias = "authToken")]
    auth_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Subscription {
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct PlexUser {
    id: u64,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    subscription: Option<Subscription>,
}

/// `/api/v2/user` answers with a bare user; older endpoints wrap it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserEnvelope {
    Wrapped { user: PlexUser },
    Bare(PlexUser),
}

impl UserEnvelope {
    fn into_user(self) -> PlexUser {
        match self {
            UserEnvelope::Wrapped { user } => user,
            UserEnvelope::Bare(user) => user,
        }
    }
}

// ---------------------------------------------------------------------------
// PlexFlow
// ---------------------------------------------------------------------------

/// Issues Plex PINs and turns approved ones into subjects.
#[derive(Debug)]
pub struct PlexFlow {
    config: PlexFlowConfig,
    base_url: Url,
    http: reqwest::Client,
    pins: PinRegistry,
}

impl PlexFlow {
    /// Validates `config` and builds the flow.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` for invalid configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use marquee_auth::plex::{PlexFlow, PlexFlowConfig};
    ///
    /// let flow = PlexFlow::new(PlexFlowConfig::new("marquee-client", "Marquee")).unwrap();
    /// assert_eq!(flow.pending_count(), 0);
    /// ```
    pub fn new(config: PlexFlowConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(config, http)
    }

    /// Builds the flow with a caller-supplied HTTP client.
    pub fn with_client(config: PlexFlowConfig, http: reqwest::Client) -> Result<Self> {
        config.validate()?;
        let base_url = crate::oidc::parse_http_url("plex base_url", &config.base_url)?;
        Ok(Self {
            config,
            base_url,
            http,
            pins: PinRegistry::default(),
        })
    }

    /// Configuration the flow was built with.
    pub fn config(&self) -> &PlexFlowConfig {
        &self.config
    }

    /// Number of PINs tracked locally, consumed or not.
    pub fn pending_count(&self) -> usize {
        self.pins.len()
    }

    /// Requests a new PIN from plex.tv and starts tracking it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Upstream` if plex.tv cannot be reached or answers
    /// unexpectedly.
    pub async fn request_pin(&self) -> Result<PinChallenge> {
        let resp = self
            .request(Method::POST, "/api/v2/pins")?
            .query(&[("strong", "true")])
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("Plex PIN request failed: {e}")))?;

        let pin: PinResponse = read_json(resp, "PIN request").await?;
        if pin.code.is_empty() {
            return Err(AuthError::Upstream("Plex returned a PIN without a code".to_string()));
        }

        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(self.config.pin_timeout)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(|| AuthError::Config("plex pin_timeout out of range".to_string()))?;

        self.pins.insert(PinRequest {
            id: pin.id,
            code: pin.code.clone(),
            created_at,
            expires_at,
            consumed: false,
        });
        tracing::info!(pin_id = pin.id, "issued Plex PIN");

        Ok(PinChallenge {
            id: pin.id,
            auth_url: self.auth_url(&pin.code),
            code: pin.code,
            expires_at,
        })
    }

    /// Checks whether the user approved PIN `id`.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotFound` for a PIN this flow never issued or plex.tv
    ///   no longer knows
    /// - `AuthError::Expired` once the local PIN lifetime has passed
    /// - `AuthError::AlreadyConsumed` if the PIN already produced a subject
    /// - `AuthError::Upstream` on plex.tv failures
    pub async fn check_approval(&self, id: u64) -> Result<PinApproval> {
        self.pins.check(id)?;

        let resp = self
            .request(Method::GET, &format!("/api/v2/pins/{id}"))?
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("Plex PIN check failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            self.pins.remove(id);
            return Err(AuthError::NotFound);
        }
        let pin: PinResponse = read_json(resp, "PIN check").await?;

        // The upstream call may have outlived the PIN.
        self.pins.check(id)?;

        let Some(token) = pin.auth_token.filter(|t| !t.is_empty()) else {
            tracing::trace!(pin_id = id, "Plex PIN not yet approved");
            return Ok(PinApproval::Pending);
        };

        let subject = self.fetch_subject(&token).await?;
        self.pins.consume(id)?;

        tracing::info!(
            pin_id = id,
            subject = %subject.subject_id,
            username = %subject.username,
            "completed Plex login"
        );
        Ok(PinApproval::Approved(subject))
    }

    /// Checks PIN `id` every `poll_interval` until it is approved, expires,
    /// or `cancellation` fires.
    ///
    /// Transient upstream failures are logged and polling continues.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Cancelled` on cancellation, otherwise the
    /// terminal error from [`PlexFlow::check_approval`].
    pub async fn poll_for_approval(
        &self,
        id: u64,
        cancellation: &CancellationToken,
    ) -> Result<AuthSubject> {
        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    tracing::debug!(pin_id = id, "Plex PIN polling cancelled");
                    return Err(AuthError::Cancelled);
                }

                _ = ticker.tick() => {
                    match self.check_approval(id).await {
                        Ok(PinApproval::Approved(subject)) => return Ok(subject),
                        Ok(PinApproval::Pending) => {}
                        Err(e @ (AuthError::NotFound
                            | AuthError::Expired
                            | AuthError::AlreadyConsumed)) => return Err(e),
                        Err(e) => {
                            tracing::warn!(pin_id = id, "Plex PIN check failed, retrying: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Forgets expired PINs and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.pins.cleanup_expired()
    }

    fn auth_url(&self, code: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("clientID", &self.config.client_id);
        query.append_pair("code", code);
        query.append_pair("context[device][product]", &self.config.product);
        query.append_pair("context[device][version]", &self.config.version);
        if let Some(forward) = self.config.forward_url.as_deref().filter(|f| !f.is_empty()) {
            query.append_pair("forwardUrl", forward);
        }
        format!("{}?{}", self.config.auth_app_url, query.finish())
    }

    async fn fetch_subject(&self, token: &str) -> Result<AuthSubject> {
        let resp = self
            .request(Method::GET, "/api/v2/user")?
            .header("X-Plex-Token", token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("Plex user request failed: {e}")))?;

        let user = read_json::<UserEnvelope>(resp, "user lookup")
            .await?
            .into_user();
        Ok(self.to_subject(user))
    }

    fn to_subject(&self, user: PlexUser) -> AuthSubject {
        let mut roles: BTreeSet<String> = self.config.default_roles.iter().cloned().collect();
        let plex_pass = user.subscription.as_ref().is_some_and(|s| s.active);
        if plex_pass {
            if let Some(role) = self.config.plex_pass_role.as_deref().filter(|r| !r.is_empty()) {
                roles.insert(role.to_string());
            }
        }

        let username = if !user.username.is_empty() {
            user.username
        } else if !user.email.is_empty() {
            user.email.clone()
        } else {
            user.uuid
        };

        AuthSubject {
            subject_id: user.id.to_string(),
            username,
            email: user.email,
            groups: BTreeSet::new(),
            roles,
            issuer: PLEX_ISSUER.to_string(),
            provider: AuthProvider::Plex,
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| AuthError::Config(format!("invalid Plex URL {path}: {e}")))?;

        let mut builder = self
            .http
            .request(method, url)
            .timeout(self.config.request_timeout)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-Plex-Client-Identifier", &self.config.client_id)
            .header("X-Plex-Product", &self.config.product)
            .header("X-Plex-Version", &self.config.version);
        if let Some(platform) = self.config.platform.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.header("X-Plex-Platform", platform);
        }
        if let Some(device) = self.config.device.as_deref().filter(|d| !d.is_empty()) {
            builder = builder.header("X-Plex-Device", device);
        }
        Ok(builder)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::Upstream(format!(
            "Plex {what} returned {status}: {body}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| AuthError::Upstream(format!("Plex {what} response invalid: {e}")))
}
