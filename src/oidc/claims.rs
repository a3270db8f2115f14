//! Mapping verified ID token claims into an [`AuthSubject`]
//!
//! Providers disagree on where they put usernames, groups and roles. Each
//! subject field is therefore configured as an ordered list of candidate
//! claim names; the first candidate with a non-empty value wins. A candidate
//! containing dots (`realm_access.roles`) walks nested objects.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::subject::{AuthProvider, AuthSubject};

/// Ordered claim candidates for each [`AuthSubject`] field.
///
/// # Examples
///
/// ```
/// use marquee_auth::oidc::claims::ClaimsMapping;
/// use serde_json::json;
///
/// let claims = json!({"sub": "u-1", "name": "Alice", "groups": ["staff"]});
/// let subject = ClaimsMapping::default()
///     .map(claims.as_object().unwrap(), "https://id.example.com", &[])
///     .unwrap();
///
/// assert_eq!(subject.username, "Alice");
/// assert!(subject.groups.contains("staff"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsMapping {
    /// Candidates for the stable subject id
    pub subject: Vec<String>,
    /// Candidates for the display username; falls back to the subject id
    pub username: Vec<String>,
    /// Candidates for the email address
    pub email: Vec<String>,
    /// Candidates for group membership
    pub groups: Vec<String>,
    /// Candidates for application roles
    pub roles: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ClaimsMapping {
    fn default() -> Self {
        Self {
            subject: names(&["sub"]),
            username: names(&["preferred_username", "name", "email"]),
            email: names(&["email"]),
            groups: names(&["groups"]),
            roles: names(&["roles"]),
        }
    }
}

impl ClaimsMapping {
    /// Builds an [`AuthSubject`] from `claims`.
    ///
    /// `default_roles` apply only when no role candidate yields a value.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ClaimsMappingFailed` when no subject candidate
    /// yields a value.
    pub fn map(
        &self,
        claims: &Map<String, Value>,
        issuer: &str,
        default_roles: &[String],
    ) -> Result<AuthSubject> {
        let subject_id = first_string(claims, &self.subject).ok_or_else(|| {
            AuthError::ClaimsMappingFailed(format!(
                "none of the subject claims {:?} is present",
                self.subject
            ))
        })?;

        let username =
            first_string(claims, &self.username).unwrap_or_else(|| subject_id.clone());
        let email = first_string(claims, &self.email).unwrap_or_default();
        let groups = first_string_set(claims, &self.groups);
        let mut roles = first_string_set(claims, &self.roles);
        if roles.is_empty() {
            roles.extend(default_roles.iter().cloned());
        }

        Ok(AuthSubject {
            subject_id,
            username,
            email,
            groups,
            roles,
            issuer: issuer.to_string(),
            provider: AuthProvider::Oidc,
        })
    }
}

fn lookup<'a>(claims: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(value) = claims.get(name) {
        return Some(value);
    }
    // Only walk a dotted path when no flat claim has that exact name.
    let mut parts = name.split('.');
    let mut current = claims.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn first_string(claims: &Map<String, Value>, candidates: &[String]) -> Option<String> {
    candidates.iter().find_map(|name| match lookup(claims, name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_string_set(claims: &Map<String, Value>, candidates: &[String]) -> BTreeSet<String> {
    candidates
        .iter()
        .filter_map(|name| lookup(claims, name))
        .map(string_set)
        .find(|set| !set.is_empty())
        .unwrap_or_default()
}

/// Accepts an array of strings, a single string, or an object whose keys
/// are the values (the shape some providers use for project roles).
fn string_set(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::String(s) if !s.is_empty() => BTreeSet::from([s.clone()]),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => BTreeSet::new(),
    }
}
