//! Local registry of issued PINs
//!
//! plex.tv knows whether a PIN was approved; only we know when we stop
//! honoring it and whether we already turned it into a subject. A consumed
//! PIN stays in the registry until it expires so that later checks can
//! answer `AlreadyConsumed` instead of `NotFound`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{AuthError, Result};

/// A PIN issued by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRequest {
    /// plex.tv PIN identifier
    pub id: u64,
    /// Human-readable code
    pub code: String,
    /// Issue time
    pub created_at: DateTime<Utc>,
    /// Local expiry
    pub expires_at: DateTime<Utc>,
    /// Set once a subject has been produced
    pub consumed: bool,
}

impl PinRequest {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Default)]
pub(crate) struct PinRegistry {
    pins: DashMap<u64, PinRequest>,
}

impl PinRegistry {
    pub(crate) fn insert(&self, request: PinRequest) {
        self.pins.insert(request.id, request);
    }

    /// Returns the request if it can still be approved.
    pub(crate) fn check(&self, id: u64) -> Result<PinRequest> {
        let request = self
            .pins
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(AuthError::NotFound)?;
        usable(&request, Utc::now())?;
        Ok(request)
    }

    /// Marks the request consumed. Exactly one caller succeeds per PIN.
    pub(crate) fn consume(&self, id: u64) -> Result<()> {
        let mut request = self.pins.get_mut(&id).ok_or(AuthError::NotFound)?;
        usable(&request, Utc::now())?;
        request.consumed = true;
        Ok(())
    }

    pub(crate) fn remove(&self, id: u64) {
        self.pins.remove(&id);
    }

    pub(crate) fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.pins.retain(|_, request| {
            let keep = !request.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.pins.len()
    }
}

fn usable(request: &PinRequest, now: DateTime<Utc>) -> Result<()> {
    if request.consumed {
        return Err(AuthError::AlreadyConsumed);
    }
    if request.is_expired_at(now) {
        return Err(AuthError::Expired);
    }
    Ok(())
}
