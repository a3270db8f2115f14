//! Volatile state store backed by a sharded concurrent map

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{key_prefix, validate_key, StateEntry, StateStore};
use crate::error::{AuthError, Result};

/// In-process [`StateStore`].
///
/// Entries live in a [`DashMap`], so operations on unrelated keys lock
/// different shards and never wait on each other. Nothing expires on its
/// own: reads refuse expired entries and `cleanup_expired` reclaims them, so
/// long-running processes should run [`super::spawn_cleanup`] against it.
///
/// # Examples
///
/// ```
/// use marquee_auth::state::{MemoryStateStore, StateEntry, StateStore};
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStateStore::new();
/// let entry = StateEntry::with_ttl(std::time::Duration::from_secs(600));
/// store.store("state-key", &entry).await.unwrap();
/// assert_eq!(store.take("state-key").await.unwrap(), entry);
/// assert!(store.get("state-key").await.is_err());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, StateEntry>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn store(&self, key: &str, entry: &StateEntry) -> Result<()> {
        validate_key(key)?;
        self.entries.insert(key.to_string(), entry.clone());
        tracing::trace!(state = %key_prefix(key), "stored state entry");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StateEntry> {
        let now = Utc::now();
        // Clone out so the shard guard is released before any removal.
        let entry = self
            .entries
            .get(key)
            .map(|e| e.value().clone())
            .ok_or(AuthError::NotFound)?;

        if entry.is_expired_at(now) {
            self.entries.remove_if(key, |_, e| e.is_expired_at(now));
            return Err(AuthError::Expired);
        }
        Ok(entry)
    }

    async fn take(&self, key: &str) -> Result<StateEntry> {
        let (_, entry) = self.entries.remove(key).ok_or(AuthError::NotFound)?;
        if entry.is_expired() {
            return Err(AuthError::Expired);
        }
        Ok(entry)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired_at(now))
            .count())
    }
}
