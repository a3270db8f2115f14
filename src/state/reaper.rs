//! Background reclamation of expired state entries
//!
//! The reaper is an owned task: [`spawn_cleanup`] returns a [`CleanupTask`]
//! whose owner decides when it stops. It holds an `Arc` to the store, so the
//! store cannot be dropped out from under it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::StateStore;

/// Interval used when none is configured.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct CleanupTask {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Token that stops the task when cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancellation.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("State cleanup task ended abnormally: {e}");
        }
    }
}

/// Spawns a task that calls [`StateStore::cleanup_expired`] every `interval`
/// until `cancellation` fires.
///
/// Sweep failures are logged and the loop keeps going. The first sweep runs
/// one full interval after the call.
///
/// # Arguments
///
/// * `store` - Store to sweep
/// * `interval` - Time between sweeps; zero is raised to one millisecond
/// * `cancellation` - Stops the task when cancelled
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use marquee_auth::state::{spawn_cleanup, MemoryStateStore};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(MemoryStateStore::new());
/// let task = spawn_cleanup(store, Duration::from_secs(60), CancellationToken::new());
/// task.shutdown().await;
/// # }
/// ```
pub fn spawn_cleanup(
    store: Arc<dyn StateStore>,
    interval: Duration,
    cancellation: CancellationToken,
) -> CleanupTask {
    let period = interval.max(Duration::from_millis(1));
    let token = cancellation.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::debug!("State cleanup task cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    match store.cleanup_expired().await {
                        Ok(0) => {}
                        Ok(removed) => {
                            tracing::debug!(removed, "Removed expired state entries");
                        }
                        Err(e) => {
                            tracing::warn!("State cleanup failed: {e}");
                        }
                    }
                }
            }
        }
    });

    CleanupTask {
        cancellation,
        handle,
    }
}
