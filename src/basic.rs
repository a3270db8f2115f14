//! HTTP Basic Auth against a single configured principal
//!
//! The password is bcrypt-hashed once at construction. Each request runs
//! both the username and the password check, whatever the outcome of the
//! first, so response timing does not reveal which half was wrong.

use std::collections::BTreeSet;
use std::fmt;

use base64::Engine as _;

use crate::error::{AuthError, Result};
use crate::secret::constant_time_eq;
use crate::subject::{AuthProvider, AuthSubject};

/// Shortest password accepted at construction.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Longest password accepted at construction. bcrypt hashes at most 72
/// bytes including a trailing NUL, so 71 bytes is the longest password it
/// hashes in full.
pub const MAX_PASSWORD_BYTES: usize = 71;

/// Default realm in the `WWW-Authenticate` challenge.
pub const DEFAULT_REALM: &str = "Marquee";

const SCHEME_PREFIX: &str = "Basic ";

/// Issuer recorded on Basic Auth subjects.
pub const BASIC_ISSUER: &str = "local";

/// Validates `Authorization: Basic` headers for one username and password.
pub struct BasicAuthValidator {
    username: String,
    password_hash: String,
    realm: String,
    roles: BTreeSet<String>,
}

impl fmt::Debug for BasicAuthValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthValidator")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl BasicAuthValidator {
    /// Creates a validator, hashing `password` at bcrypt's default cost.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for an empty username or a password
    /// shorter than 8 characters or longer than 71 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use marquee_auth::basic::BasicAuthValidator;
    ///
    /// assert!(BasicAuthValidator::with_cost("admin", "short", 4).is_err());
    ///
    /// let validator = BasicAuthValidator::with_cost("admin", "correct horse", 4).unwrap();
    /// // "admin:correct horse"
    /// let subject = validator
    ///     .validate_credentials("Basic YWRtaW46Y29ycmVjdCBob3JzZQ==")
    ///     .unwrap();
    /// assert_eq!(subject.username, "admin");
    /// ```
    pub fn new(username: &str, password: &str) -> Result<Self> {
        Self::with_cost(username, password, bcrypt::DEFAULT_COST)
    }

    /// Creates a validator with an explicit bcrypt cost.
    pub fn with_cost(username: &str, password: &str, cost: u32) -> Result<Self> {
        if username.is_empty() {
            return Err(AuthError::Validation("username is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::Validation(format!(
                "password must be at most {MAX_PASSWORD_BYTES} bytes"
            )));
        }

        let password_hash = bcrypt::hash(password, cost)
            .map_err(|e| AuthError::Config(format!("failed to hash password: {e}")))?;

        Ok(Self {
            username: username.to_string(),
            password_hash,
            realm: DEFAULT_REALM.to_string(),
            roles: BTreeSet::new(),
        })
    }

    /// Sets the realm advertised in [`Self::www_authenticate`].
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Sets the roles granted to the authenticated subject.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// The configured username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Checks an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// - `AuthError::Validation` if the header is not `Basic <base64>` of a
    ///   UTF-8 `user:password` pair; no credential comparison runs
    /// - `AuthError::Unauthorized` if either field is wrong
    pub fn validate_credentials(&self, header: &str) -> Result<AuthSubject> {
        let (username, password) = parse_header(header)?;

        let username_ok = constant_time_eq(&username, &self.username);
        // A malformed stored hash or a candidate bcrypt would truncate
        // counts as a mismatch.
        let password_ok =
            bcrypt::non_truncating_verify(&password, &self.password_hash).unwrap_or(false);

        // Non-short-circuit: both checks above always ran.
        if !(username_ok & password_ok) {
            tracing::debug!("Basic Auth credentials rejected");
            return Err(AuthError::Unauthorized);
        }

        Ok(AuthSubject {
            subject_id: self.username.clone(),
            username: self.username.clone(),
            email: String::new(),
            groups: BTreeSet::new(),
            roles: self.roles.clone(),
            issuer: BASIC_ISSUER.to_string(),
            provider: AuthProvider::Basic,
        })
    }

    /// Value for the `WWW-Authenticate` header on a 401 response.
    pub fn www_authenticate(&self) -> String {
        format!("Basic realm=\"{}\", charset=\"UTF-8\"", self.realm)
    }
}

fn parse_header(header: &str) -> Result<(String, String)> {
    let encoded = header
        .strip_prefix(SCHEME_PREFIX)
        .ok_or_else(|| AuthError::Validation("expected Basic authorization scheme".to_string()))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| AuthError::Validation(format!("invalid base64 credentials: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthError::Validation("credentials are not valid UTF-8".to_string()))?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| AuthError::Validation("credentials lack a colon separator".to_string()))?;
    Ok((username.to_string(), password.to_string()))
}
