//! Configuration management for marquee-auth
//!
//! Configuration comes from a YAML file, then `MARQUEE_*` environment
//! variables, then CLI flags, in increasing priority. Every field has a
//! default, so an empty or missing file yields a usable memory-backed setup
//! with all login methods disabled.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::oidc::{ClaimsMapping, OidcFlowConfig};
use crate::plex::{PlexFlowConfig, DEFAULT_AUTH_APP_URL, DEFAULT_BASE_URL};
use crate::state::StateBackend;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Ephemeral state storage
    #[serde(default)]
    pub state_store: StateStoreConfig,
    /// OpenID Connect login
    #[serde(default)]
    pub oidc: OidcSettings,
    /// Plex PIN login
    #[serde(default)]
    pub plex: PlexSettings,
    /// Basic Auth principal
    #[serde(default)]
    pub basic: BasicSettings,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

/// Which state store implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    /// Volatile in-process map
    #[default]
    Memory,
    /// sled database on disk
    Durable,
}

/// Ephemeral state storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database directory for the durable backend
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Seconds between expired-entry sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_cleanup_interval() -> u64 {
    crate::state::reaper::DEFAULT_CLEANUP_INTERVAL.as_secs()
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            backend: StateBackendKind::Memory,
            path: None,
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl StateStoreConfig {
    /// Resolves the backend, filling in the default durable path.
    pub fn backend(&self) -> StateBackend {
        match self.backend {
            StateBackendKind::Memory => StateBackend::Memory,
            StateBackendKind::Durable => StateBackend::Durable(
                self.path.clone().unwrap_or_else(default_state_path),
            ),
        }
    }

    /// Interval between sweeps.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

/// Platform data directory for the durable store, or `./data/oidc_state`
/// when none can be determined.
pub fn default_state_path() -> PathBuf {
    directories::ProjectDirs::from("io", "marquee", "marquee")
        .map(|dirs| dirs.data_dir().join("oidc_state"))
        .unwrap_or_else(|| PathBuf::from("data").join("oidc_state"))
}

// ---------------------------------------------------------------------------
// OIDC
// ---------------------------------------------------------------------------

/// OpenID Connect login settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcSettings {
    /// Whether OIDC login is offered
    #[serde(default)]
    pub enabled: bool,
    /// Issuer URL
    #[serde(default)]
    pub issuer_url: String,
    /// Registered client id
    #[serde(default)]
    pub client_id: String,
    /// Client secret for confidential clients
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Registered callback URL
    #[serde(default)]
    pub redirect_url: String,
    /// Requested scopes
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    /// Send a PKCE challenge
    #[serde(default = "default_true")]
    pub pkce_enabled: bool,
    /// Bind a nonce into the ID token
    #[serde(default = "default_true")]
    pub nonce_enabled: bool,
    /// Login attempt lifetime
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,
    /// Accepted clock skew for token timestamps
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,
    /// Signing key cache lifetime
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_seconds: u64,
    /// Deadline for provider requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Claim candidates per subject field
    #[serde(default)]
    pub claims: ClaimsMapping,
    /// Roles for subjects whose token carries none
    #[serde(default)]
    pub default_roles: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_oidc_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

fn default_state_ttl() -> u64 {
    600
}

fn default_clock_skew() -> u64 {
    60
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: String::new(),
            client_id: String::new(),
            client_secret: None,
            redirect_url: String::new(),
            scopes: default_oidc_scopes(),
            pkce_enabled: true,
            nonce_enabled: true,
            state_ttl_seconds: default_state_ttl(),
            clock_skew_seconds: default_clock_skew(),
            jwks_cache_ttl_seconds: default_jwks_cache_ttl(),
            request_timeout_seconds: default_request_timeout(),
            claims: ClaimsMapping::default(),
            default_roles: Vec::new(),
        }
    }
}

impl OidcSettings {
    /// Converts into the flow configuration.
    pub fn to_flow_config(&self) -> OidcFlowConfig {
        let mut config = OidcFlowConfig::new(
            self.issuer_url.clone(),
            self.client_id.clone(),
            self.redirect_url.clone(),
        );
        config.client_secret = self.client_secret.clone();
        config.scopes = self.scopes.clone();
        config.pkce_enabled = self.pkce_enabled;
        config.nonce_enabled = self.nonce_enabled;
        config.state_ttl = Duration::from_secs(self.state_ttl_seconds);
        config.clock_skew = Duration::from_secs(self.clock_skew_seconds);
        config.jwks_cache_ttl = Duration::from_secs(self.jwks_cache_ttl_seconds);
        config.request_timeout = Duration::from_secs(self.request_timeout_seconds);
        config.claims = self.claims.clone();
        config.default_roles = self.default_roles.clone();
        config
    }
}

// ---------------------------------------------------------------------------
// Plex
// ---------------------------------------------------------------------------

/// Plex PIN login settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlexSettings {
    /// Whether Plex login is offered
    #[serde(default)]
    pub enabled: bool,
    /// Stable client identifier
    #[serde(default)]
    pub client_id: String,
    /// Product name shown in the Plex app
    #[serde(default = "default_plex_product")]
    pub product: String,
    /// Version reported to plex.tv
    #[serde(default = "default_plex_version")]
    pub version: String,
    /// Optional platform header
    #[serde(default)]
    pub platform: Option<String>,
    /// Optional device header
    #[serde(default)]
    pub device: Option<String>,
    /// plex.tv API base
    #[serde(default = "default_plex_base_url")]
    pub base_url: String,
    /// Approval page URL
    #[serde(default = "default_plex_auth_app_url")]
    pub auth_app_url: String,
    /// Where the approval page returns the user
    #[serde(default)]
    pub forward_url: Option<String>,
    /// PIN lifetime
    #[serde(default = "default_pin_timeout")]
    pub pin_timeout_seconds: u64,
    /// Seconds between approval checks when polling
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Deadline for plex.tv requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Roles for every Plex subject
    #[serde(default)]
    pub default_roles: Vec<String>,
    /// Extra role for Plex Pass subscribers
    #[serde(default)]
    pub plex_pass_role: Option<String>,
}

fn default_plex_product() -> String {
    "Marquee".to_string()
}

fn default_plex_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_plex_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_plex_auth_app_url() -> String {
    DEFAULT_AUTH_APP_URL.to_string()
}

fn default_pin_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    2
}

impl Default for PlexSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: String::new(),
            product: default_plex_product(),
            version: default_plex_version(),
            platform: None,
            device: None,
            base_url: default_plex_base_url(),
            auth_app_url: default_plex_auth_app_url(),
            forward_url: None,
            pin_timeout_seconds: default_pin_timeout(),
            poll_interval_seconds: default_poll_interval(),
            request_timeout_seconds: default_request_timeout(),
            default_roles: Vec::new(),
            plex_pass_role: None,
        }
    }
}

impl PlexSettings {
    /// Converts into the flow configuration.
    pub fn to_flow_config(&self) -> PlexFlowConfig {
        let mut config = PlexFlowConfig::new(self.client_id.clone(), self.product.clone());
        config.version = self.version.clone();
        config.platform = self.platform.clone();
        config.device = self.device.clone();
        config.base_url = self.base_url.clone();
        config.auth_app_url = self.auth_app_url.clone();
        config.forward_url = self.forward_url.clone();
        config.pin_timeout = Duration::from_secs(self.pin_timeout_seconds);
        config.poll_interval = Duration::from_secs(self.poll_interval_seconds);
        config.request_timeout = Duration::from_secs(self.request_timeout_seconds);
        config.default_roles = self.default_roles.clone();
        config.plex_pass_role = self.plex_pass_role.clone();
        config
    }
}

// ---------------------------------------------------------------------------
// Basic Auth
// ---------------------------------------------------------------------------

/// Basic Auth principal settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicSettings {
    /// Whether Basic Auth is accepted
    #[serde(default)]
    pub enabled: bool,
    /// The single accepted username
    #[serde(default)]
    pub username: String,
    /// Its password; prefer `MARQUEE_BASIC_PASSWORD` over the file
    #[serde(default)]
    pub password: Option<String>,
    /// Realm in the `WWW-Authenticate` challenge
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Roles granted on success
    #[serde(default)]
    pub roles: Vec<String>,
    /// bcrypt work factor used when hashing the password at startup
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_realm() -> String {
    crate::basic::DEFAULT_REALM.to_string()
}

impl Default for BasicSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            username: String::new(),
            password: None,
            realm: default_realm(),
            roles: Vec::new(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Loads configuration from `path`, then applies environment and CLI
    /// overrides.
    ///
    /// A missing file is not an error; defaults are used.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the file cannot be read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parses a YAML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parses YAML configuration text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(level) = std::env::var("MARQUEE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_bool("MARQUEE_LOG_JSON") {
            self.logging.json = json;
        }

        if let Ok(backend) = std::env::var("MARQUEE_STATE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.state_store.backend = StateBackendKind::Memory,
                "durable" => self.state_store.backend = StateBackendKind::Durable,
                _ => tracing::warn!("Invalid MARQUEE_STATE_BACKEND: {}", backend),
            }
        }
        if let Ok(path) = std::env::var("MARQUEE_STATE_PATH") {
            self.state_store.path = Some(PathBuf::from(path));
        }
        if let Some(interval) = env_u64("MARQUEE_CLEANUP_INTERVAL_SECONDS") {
            self.state_store.cleanup_interval_seconds = interval;
        }

        if let Some(enabled) = env_bool("MARQUEE_OIDC_ENABLED") {
            self.oidc.enabled = enabled;
        }
        if let Ok(issuer) = std::env::var("MARQUEE_OIDC_ISSUER_URL") {
            self.oidc.issuer_url = issuer;
        }
        if let Ok(client_id) = std::env::var("MARQUEE_OIDC_CLIENT_ID") {
            self.oidc.client_id = client_id;
        }
        if let Ok(secret) = std::env::var("MARQUEE_OIDC_CLIENT_SECRET") {
            self.oidc.client_secret = Some(secret);
        }
        if let Ok(redirect) = std::env::var("MARQUEE_OIDC_REDIRECT_URL") {
            self.oidc.redirect_url = redirect;
        }

        if let Some(enabled) = env_bool("MARQUEE_PLEX_ENABLED") {
            self.plex.enabled = enabled;
        }
        if let Ok(client_id) = std::env::var("MARQUEE_PLEX_CLIENT_ID") {
            self.plex.client_id = client_id;
        }
        if let Ok(base_url) = std::env::var("MARQUEE_PLEX_BASE_URL") {
            self.plex.base_url = base_url;
        }

        if let Some(enabled) = env_bool("MARQUEE_BASIC_ENABLED") {
            self.basic.enabled = enabled;
        }
        if let Ok(username) = std::env::var("MARQUEE_BASIC_USERNAME") {
            self.basic.username = username;
        }
        if let Ok(password) = std::env::var("MARQUEE_BASIC_PASSWORD") {
            self.basic.password = Some(password);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Checks the configuration, including every enabled login method.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.logging.level.trim().is_empty() {
            return Err(AuthError::Config("logging level cannot be empty".to_string()));
        }
        if self.state_store.cleanup_interval_seconds == 0 {
            return Err(AuthError::Config(
                "state_store.cleanup_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.oidc.enabled {
            self.oidc.to_flow_config().validate()?;
        }
        if self.plex.enabled {
            self.plex.to_flow_config().validate()?;
        }
        if self.basic.enabled {
            if self.basic.username.is_empty() {
                return Err(AuthError::Config("basic.username is required".to_string()));
            }
            let password_len = self
                .basic
                .password
                .as_deref()
                .map(|p| p.chars().count())
                .unwrap_or(0);
            if !(4..=31).contains(&self.basic.bcrypt_cost) {
                return Err(AuthError::Config(
                    "basic.bcrypt_cost must be between 4 and 31".to_string(),
                ));
            }
            if password_len < crate::basic::MIN_PASSWORD_LENGTH {
                return Err(AuthError::Config(format!(
                    "basic.password must be at least {} characters",
                    crate::basic::MIN_PASSWORD_LENGTH
                )));
            }
            let password_bytes = self.basic.password.as_deref().map_or(0, str::len);
            if password_bytes > crate::basic::MAX_PASSWORD_BYTES {
                return Err(AuthError::Config(format!(
                    "basic.password must be at most {} bytes",
                    crate::basic::MAX_PASSWORD_BYTES
                )));
            }
        }

        Ok(())
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("Invalid {}: {}", name, value);
            None
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Invalid {}: {}", name, value);
            None
        }
    }
}
