//! Plex out-of-band PIN login
//!
//! Plex users authenticate on plex.tv rather than on our login page:
//!
//! 1. [`PlexFlow::request_pin`] asks plex.tv for a PIN and returns the code
//!    plus the URL where the user approves it.
//! 2. The user approves the PIN in the Plex app.
//! 3. [`PlexFlow::check_approval`] (or [`PlexFlow::poll_for_approval`])
//!    sees the approval, fetches the Plex account and yields an
//!    [`crate::subject::AuthSubject`].
//!
//! The local PIN expiry is authoritative: once it passes, the PIN is
//! reported expired whatever plex.tv says. An approved PIN yields exactly one
//! subject.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{AuthError, Result};
use crate::subject::AuthSubject;

pub mod flow;
pub mod pins;

pub use flow::PlexFlow;
pub use pins::PinRequest;

/// Production plex.tv API base.
pub const DEFAULT_BASE_URL: &str = "https://plex.tv";

/// Page where users approve a PIN.
pub const DEFAULT_AUTH_APP_URL: &str = "https://app.plex.tv/auth#!";

/// Longest accepted PIN lifetime.
pub const MAX_PIN_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Issuer recorded on Plex subjects.
pub const PLEX_ISSUER: &str = "plex.tv";

/// Settings identifying this application to plex.tv.
#[derive(Debug, Clone, PartialEq)]
pub struct PlexFlowConfig {
    /// Stable client identifier (`X-Plex-Client-Identifier`)
    pub client_id: String,
    /// Product name shown to the user (`X-Plex-Product`)
    pub product: String,
    /// Application version (`X-Plex-Version`)
    pub version: String,
    /// Optional platform (`X-Plex-Platform`)
    pub platform: Option<String>,
    /// Optional device name (`X-Plex-Device`)
    pub device: Option<String>,
    /// API base URL; overridden in tests
    pub base_url: String,
    /// Approval page URL
    pub auth_app_url: String,
    /// Where the approval page sends the user afterwards
    pub forward_url: Option<String>,
    /// Local lifetime of a PIN
    pub pin_timeout: Duration,
    /// Delay between checks in [`PlexFlow::poll_for_approval`]
    pub poll_interval: Duration,
    /// Deadline for each request to plex.tv
    pub request_timeout: Duration,
    /// Roles given to every Plex subject
    pub default_roles: Vec<String>,
    /// Extra role for accounts with an active Plex Pass
    pub plex_pass_role: Option<String>,
}

impl PlexFlowConfig {
    /// Creates a configuration against production plex.tv.
    pub fn new(client_id: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            product: product.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: None,
            device: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_app_url: DEFAULT_AUTH_APP_URL.to_string(),
            forward_url: None,
            pin_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            default_roles: Vec::new(),
            plex_pass_role: None,
        }
    }

    /// Checks required fields and timings.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("plex client_id is required".to_string()));
        }
        if self.product.trim().is_empty() {
            return Err(AuthError::Config("plex product is required".to_string()));
        }
        crate::oidc::parse_http_url("plex base_url", &self.base_url)?;
        if self.pin_timeout.is_zero() {
            return Err(AuthError::Config("plex pin_timeout must be positive".to_string()));
        }
        if self.pin_timeout > MAX_PIN_TIMEOUT {
            return Err(AuthError::Config(format!(
                "plex pin_timeout must be at most {} seconds",
                MAX_PIN_TIMEOUT.as_secs()
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(AuthError::Config(
                "plex poll_interval must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(AuthError::Config(
                "plex request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A freshly issued PIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinChallenge {
    /// Identifier used to check approval
    pub id: u64,
    /// Code the user confirms in the Plex app
    pub code: String,
    /// Page where the user approves the PIN
    pub auth_url: String,
    /// Local expiry of the PIN
    pub expires_at: DateTime<Utc>,
}

/// Outcome of one approval check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinApproval {
    /// The user has not approved the PIN yet
    Pending,
    /// The user approved; the PIN is now consumed
    Approved(AuthSubject),
}
