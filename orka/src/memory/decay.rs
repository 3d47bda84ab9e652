//! Cooperative decay sweeper.
//!
//! Runs `cleanup_expired` on the policy's cadence until cancelled. Each sweep
//! is bounded by the policy's per-sweep budget, and deletion rights are
//! per-entry at the backend, so appends and searches are never blocked beyond
//! a bounded contention window.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::store::MemoryStore;

/// Handle to the background sweeper task.
pub struct DecaySweeper {
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl DecaySweeper {
    /// Spawns the sweeper for `store`. When decay is disabled by policy the
    /// sweeper is inert (no task is spawned).
    pub fn spawn(store: Arc<MemoryStore>, cancel: CancellationToken) -> Self {
        if !store.policy().decay_enabled {
            return Self {
                handle: None,
                cancel,
            };
        }
        let interval = store.policy().check_interval;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sweep an empty store.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        store.flush_retries().await;
                        match store.cleanup_expired(false).await {
                            Ok(report) => {
                                if report.deleted > 0 {
                                    tracing::info!(
                                        deleted = report.deleted,
                                        elapsed_ms = report.elapsed_ms,
                                        "decay sweep removed expired entries"
                                    );
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "decay sweep failed"),
                        }
                    }
                }
            }
        });
        Self {
            handle: Some(handle),
            cancel,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Cancels the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for DecaySweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embedder::HashEmbedder;
    use crate::memory::entry::MemoryEntry;
    use crate::memory::in_memory::InMemoryBackend;
    use crate::memory::store::RetentionPolicy;
    use std::time::Duration;

    fn store_with_interval(interval: Duration, decay_enabled: bool) -> Arc<MemoryStore> {
        let policy = RetentionPolicy {
            decay_enabled,
            check_interval: interval,
            ..RetentionPolicy::default()
        };
        Arc::new(MemoryStore::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashEmbedder::new(32)),
            policy,
        ))
    }

    /// **Scenario**: the sweeper deletes expired entries on its cadence.
    #[tokio::test]
    async fn sweeper_removes_expired() {
        let store = store_with_interval(Duration::from_millis(20), true);
        // Append preserves a supplied expiry, so this entry is already stale.
        let mut e = MemoryEntry::stored("ns", "stale").with_id("stale");
        e.created_at = 1;
        e.expires_at = Some(2);
        store.append(e).await.unwrap();

        let sweeper = DecaySweeper::spawn(store.clone(), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(120)).await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 0, "expired entry should be swept");
        sweeper.shutdown().await;
    }

    /// **Scenario**: disabled decay spawns no task.
    #[tokio::test]
    async fn disabled_policy_is_inert() {
        let store = store_with_interval(Duration::from_millis(10), false);
        let sweeper = DecaySweeper::spawn(store, CancellationToken::new());
        assert!(!sweeper.is_running());
        sweeper.shutdown().await;
    }

    /// **Scenario**: cancellation stops the sweeper promptly.
    #[tokio::test]
    async fn cancellation_stops_task() {
        let store = store_with_interval(Duration::from_millis(10), true);
        let cancel = CancellationToken::new();
        let sweeper = DecaySweeper::spawn(store, cancel.clone());
        assert!(sweeper.is_running());
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sweeper.is_running());
        sweeper.shutdown().await;
    }
}
