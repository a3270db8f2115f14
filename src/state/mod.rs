//! Ephemeral state storage for in-flight login attempts
//!
//! An OIDC login spans a browser round-trip: the server issues a random
//! `state` value, the provider echoes it back on the callback, and the server
//! must recover the PKCE verifier, nonce and post-login redirect it bound to
//! that value. This module holds those bindings.
//!
//! Two backends implement [`StateStore`]:
//!
//! - [`MemoryStateStore`] keeps entries in a sharded concurrent map and
//!   loses them on restart.
//! - [`DurableStateStore`] keeps entries in an embedded `sled` database and
//!   survives restarts.
//!
//! Both enforce expiry on read, so an entry past its `expires_at` is never
//! returned even if no sweep has run. [`reaper::spawn_cleanup`] runs the
//! sweep on an interval until cancelled.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

pub mod durable;
pub mod memory;
pub mod reaper;

pub use durable::DurableStateStore;
pub use memory::MemoryStateStore;
pub use reaper::{spawn_cleanup, CleanupTask};

// ---------------------------------------------------------------------------
// StateEntry
// ---------------------------------------------------------------------------

/// Secrets bound to one in-flight login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// PKCE code verifier, empty when PKCE is disabled
    #[serde(default)]
    pub code_verifier: String,

    /// Nonce expected in the ID token, empty when nonce binding is disabled
    #[serde(default)]
    pub nonce: String,

    /// Where to send the user after a successful login
    #[serde(default)]
    pub post_login_redirect: String,

    /// When the login attempt began
    pub created_at: DateTime<Utc>,

    /// After this instant the entry is expired and must not be honored
    pub expires_at: DateTime<Utc>,
}

impl StateEntry {
    /// Creates an empty entry that expires `ttl` from now.
    ///
    /// # Examples
    ///
    /// ```
    /// use marquee_auth::state::StateEntry;
    ///
    /// let entry = StateEntry::with_ttl(std::time::Duration::from_secs(600));
    /// assert!(!entry.is_expired());
    /// assert!(entry.code_verifier.is_empty());
    /// ```
    pub fn with_ttl(ttl: Duration) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            code_verifier: String::new(),
            nonce: String::new(),
            post_login_redirect: String::new(),
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Returns true if the entry has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Returns true if the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Key-value storage for [`StateEntry`] values with expiry and one-time use.
///
/// Implementations are safe to share across tasks. Every operation is atomic
/// per key, and `cleanup_expired` may run concurrently with request traffic.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores `entry` under `key`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` if `key` is empty and
    /// `AuthError::Storage` on backend failure.
    async fn store(&self, key: &str, entry: &StateEntry) -> Result<()>;

    /// Returns the entry for `key` without consuming it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if absent. Returns `AuthError::Expired`
    /// if the entry has expired, removing it so that the next read reports
    /// `NotFound`.
    async fn get(&self, key: &str) -> Result<StateEntry>;

    /// Removes and returns the entry for `key` in one atomic step.
    ///
    /// Of any number of concurrent callers taking the same key, at most one
    /// receives the entry.
    ///
    /// # Errors
    ///
    /// Same as [`StateStore::get`].
    async fn take(&self, key: &str) -> Result<StateEntry>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every expired entry and returns how many were removed.
    async fn cleanup_expired(&self) -> Result<usize>;

    /// Number of entries that have not expired.
    async fn count(&self) -> Result<usize>;
}

/// Rejects empty keys.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(AuthError::Validation("state key must not be empty".to_string()));
    }
    Ok(())
}

/// First characters of a key, safe to log.
pub(crate) fn key_prefix(key: &str) -> &str {
    match key.char_indices().nth(8) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Which [`StateStore`] implementation to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    /// Volatile in-process map
    Memory,
    /// sled database at the given directory
    Durable(PathBuf),
}

/// Opens the store selected by `backend`.
///
/// # Errors
///
/// Returns `AuthError::Storage` if the durable database cannot be opened.
pub fn open_store(backend: &StateBackend) -> Result<Arc<dyn StateStore>> {
    match backend {
        StateBackend::Memory => Ok(Arc::new(MemoryStateStore::new())),
        StateBackend::Durable(path) => Ok(Arc::new(DurableStateStore::open(path)?)),
    }
}
