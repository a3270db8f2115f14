//! Normalized identity produced by every authentication flow
//!
//! Whichever trust path a user takes, the session layer receives the same
//! [`AuthSubject`] shape. The `provider` field records which path produced it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The trust path that produced an [`AuthSubject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// HTTP Basic Auth against the configured principal
    Basic,
    /// OpenID Connect authorization-code flow
    Oidc,
    /// Plex out-of-band PIN flow
    Plex,
}

impl AuthProvider {
    /// Returns the lowercase wire name of the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Basic => "basic",
            AuthProvider::Oidc => "oidc",
            AuthProvider::Plex => "plex",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity ready for session issuance.
///
/// Subjects are built once by a flow and then handed to the caller; nothing
/// in this crate mutates a subject after returning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSubject {
    /// Stable identifier at the issuing provider (`sub` claim, Plex user id,
    /// or the Basic Auth username)
    pub subject_id: String,
    /// Display username
    pub username: String,
    /// Email address, empty when the provider did not supply one
    #[serde(default)]
    pub email: String,
    /// Group memberships reported by the provider
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Application roles, from provider claims or configured defaults
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Issuer that vouched for this identity
    #[serde(default)]
    pub issuer: String,
    /// Trust path that produced this subject
    pub provider: AuthProvider,
}

impl AuthSubject {
    /// Returns true when the subject carries `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
