//! Durable state store backed by an embedded `sled` database
//!
//! Records are stored under `oidc_state:<key>` as JSON-encoded
//! [`StateEntry`] values. sled has no native TTL, so the record's own
//! `expires_at` is the expiry: reads check it and the sweep enforces it.
//! Every mutation is a single sled operation, which is atomic per key.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sled::{Db, IVec};

use super::{key_prefix, validate_key, StateEntry, StateStore};
use crate::error::{AuthError, Result};

/// Namespace for state records inside the database.
pub const KEY_PREFIX: &str = "oidc_state:";

/// Disk-backed [`StateStore`] that survives process restarts.
///
/// Corrupted records are reported as `NotFound` on read and deleted by
/// [`StateStore::cleanup_expired`].
#[derive(Debug, Clone)]
pub struct DurableStateStore {
    db: Db,
}

impl DurableStateStore {
    /// Opens or creates a store in the directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the database cannot be opened, for
    /// example because another process holds its lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use marquee_auth::state::DurableStateStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = DurableStateStore::open(dir.path().join("oidc_state")).unwrap();
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            AuthError::Storage(format!(
                "Failed to open state database at {}: {}",
                path.display(),
                e
            ))
        })?;
        tracing::debug!(path = %path.display(), "opened durable state store");
        Ok(Self { db })
    }

    /// Opens a store that is deleted when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| AuthError::Storage(format!("Failed to open temporary database: {}", e)))?;
        Ok(Self { db })
    }

    /// Writes a raw record, bypassing encoding. Used to exercise corruption
    /// handling.
    #[doc(hidden)]
    pub fn insert_raw(&self, key: &str, raw: &[u8]) -> Result<()> {
        self.db.insert(namespaced(key), raw)?;
        Ok(())
    }

    /// Flushes pending writes to disk.
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Removes `key` only if it still holds `expected`, so a concurrent
    /// overwrite is never clobbered. Returns true if this call removed it.
    fn remove_if_unchanged(&self, key: &[u8], expected: &IVec) -> Result<bool> {
        let swapped = self
            .db
            .compare_and_swap(key, Some(expected), None::<IVec>)?;
        Ok(swapped.is_ok())
    }
}

fn namespaced(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_PREFIX.len() + key.len());
    out.extend_from_slice(KEY_PREFIX.as_bytes());
    out.extend_from_slice(key.as_bytes());
    out
}

fn decode(raw: &[u8]) -> Option<StateEntry> {
    serde_json::from_slice(raw).ok()
}

#[async_trait]
impl StateStore for DurableStateStore {
    async fn store(&self, key: &str, entry: &StateEntry) -> Result<()> {
        validate_key(key)?;
        let value = serde_json::to_vec(entry)
            .map_err(|e| AuthError::Storage(format!("Failed to encode state entry: {}", e)))?;
        self.db.insert(namespaced(key), value)?;

        // An entry with no time left gains nothing from being durable.
        if !entry.remaining_ttl().is_zero() {
            self.db.flush_async().await?;
        }
        tracing::trace!(state = %key_prefix(key), "stored durable state entry");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StateEntry> {
        let db_key = namespaced(key);
        let raw = self.db.get(&db_key)?.ok_or(AuthError::NotFound)?;

        let Some(entry) = decode(&raw) else {
            tracing::warn!(state = %key_prefix(key), "corrupt state record");
            return Err(AuthError::NotFound);
        };

        if entry.is_expired() {
            self.remove_if_unchanged(&db_key, &raw)?;
            return Err(AuthError::Expired);
        }
        Ok(entry)
    }

    async fn take(&self, key: &str) -> Result<StateEntry> {
        let raw = self.db.remove(namespaced(key))?.ok_or(AuthError::NotFound)?;
        self.db.flush_async().await?;

        let Some(entry) = decode(&raw) else {
            tracing::warn!(state = %key_prefix(key), "discarded corrupt state record");
            return Err(AuthError::NotFound);
        };
        if entry.is_expired() {
            return Err(AuthError::Expired);
        }
        Ok(entry)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(namespaced(key))?;
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for item in self.db.scan_prefix(KEY_PREFIX) {
            let (key, raw) = item?;
            let stale = match decode(&raw) {
                Some(entry) => entry.is_expired_at(now),
                None => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&key),
                        "removing corrupt state record"
                    );
                    true
                }
            };
            if stale && self.remove_if_unchanged(&key, &raw)? {
                removed += 1;
            }
        }

        if removed > 0 {
            self.db.flush_async().await?;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let now = Utc::now();
        let mut live = 0;
        for item in self.db.scan_prefix(KEY_PREFIX) {
            let (_, raw) = item?;
            if decode(&raw).is_some_and(|entry| !entry.is_expired_at(now)) {
                live += 1;
            }
        }
        Ok(live)
    }
}
