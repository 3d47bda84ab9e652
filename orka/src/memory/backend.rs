//! Memory backend protocol: URL-addressed entry storage with a capability
//! report.
//!
//! The store layers hybrid scoring, classification and retention on top; a
//! backend only persists entries, scans namespaces and deletes expired rows
//! atomically. Backend errors are opaque strings so callers never depend on
//! rusqlite or transport types.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::error::OrkaError;

use super::entry::MemoryEntry;

/// Error for backend and store operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Backend lost or unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Entry (de)serialization failed.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Embedding generation failed.
    #[error("embedding: {0}")]
    Embedding(String),

    /// Write deferred to the retry queue.
    #[error("degraded: {0}")]
    Degraded(String),

    /// Write dropped after the retry cap.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

impl From<MemoryError> for OrkaError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Unavailable(m) => OrkaError::StoreUnavailable(m),
            MemoryError::Degraded(m) => OrkaError::StoreDegraded(m),
            MemoryError::WriteFailed(m) => OrkaError::StoreWriteFailed(m),
            MemoryError::Serialization(m) => OrkaError::StoreWriteFailed(m),
            MemoryError::Embedding(m) => OrkaError::StoreDegraded(m),
        }
    }
}

/// What the addressed backend can do. Advertised through health checks; when
/// `vectors` is false the store degrades to text-only scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub vectors: bool,
    pub persistent: bool,
    pub scheme: &'static str,
}

/// Raw entry storage.
///
/// Concurrency contract: puts on distinct ids are independent; `scan` returns
/// a monotonically consistent snapshot; `sweep_expired` acquires per-entry
/// deletion rights atomically (an entry is deleted only if it is still expired
/// at removal time) and never blocks readers beyond per-entry contention.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Upserts one entry keyed by `(namespace, id)`.
    async fn put(&self, entry: &MemoryEntry) -> Result<(), MemoryError>;

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<MemoryEntry>, MemoryError>;

    /// Returns true when an entry was removed.
    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, MemoryError>;

    /// Snapshot of all entries, optionally restricted to one namespace.
    async fn scan(&self, namespace: Option<&str>) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Rewrites an entry's expiry (access-based TTL boosting).
    async fn update_expiry(
        &self,
        namespace: &str,
        id: &str,
        expires_at: i64,
    ) -> Result<(), MemoryError>;

    /// Deletes up to `limit` entries with `expires_at < now_ms`; returns the
    /// number removed.
    async fn sweep_expired(&self, now_ms: i64, limit: usize) -> Result<usize, MemoryError>;

    /// Counts entries with `expires_at < now_ms` (dry-run cleanup).
    async fn count_expired(&self, now_ms: i64) -> Result<usize, MemoryError>;

    fn capabilities(&self) -> BackendCapabilities;

    /// Health probe; `Err` marks the backend unavailable.
    async fn ping(&self) -> Result<(), MemoryError>;
}

/// Resolves a backend from its URL.
///
/// Schemes: `memory://` (process-local) and `sqlite://<path>` (durable).
/// Anything else is a configuration-level failure surfaced as `Unavailable`.
pub fn backend_from_url(url: &str) -> Result<Arc<dyn MemoryBackend>, MemoryError> {
    if url == "memory://" || url == "memory" {
        return Ok(Arc::new(super::in_memory::InMemoryBackend::new()));
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            return Err(MemoryError::Unavailable(
                "sqlite:// requires a database path".into(),
            ));
        }
        return Ok(Arc::new(super::sqlite::SqliteBackend::new(path)?));
    }
    Err(MemoryError::Unavailable(format!(
        "unsupported memory backend url '{}'",
        url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: memory:// resolves to the non-persistent backend.
    #[tokio::test]
    async fn url_resolves_in_memory() {
        let backend = backend_from_url("memory://").unwrap();
        let caps = backend.capabilities();
        assert!(!caps.persistent);
        assert!(caps.vectors);
        assert_eq!(caps.scheme, "memory");
        backend.ping().await.unwrap();
    }

    /// **Scenario**: unknown scheme and empty sqlite path are rejected.
    #[test]
    fn url_rejects_unknown_and_empty() {
        assert!(backend_from_url("redis://localhost").is_err());
        assert!(backend_from_url("sqlite://").is_err());
    }

    /// **Scenario**: MemoryError maps onto the store error taxonomy.
    #[test]
    fn error_mapping() {
        let e: OrkaError = MemoryError::Unavailable("x".into()).into();
        assert!(matches!(e, OrkaError::StoreUnavailable(_)));
        let e: OrkaError = MemoryError::Degraded("x".into()).into();
        assert!(matches!(e, OrkaError::StoreDegraded(_)));
        let e: OrkaError = MemoryError::WriteFailed("x".into()).into();
        assert!(matches!(e, OrkaError::StoreWriteFailed(_)));
    }
}
