//! Process-local memory backend. Not persistent.

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{BackendCapabilities, MemoryBackend, MemoryError};
use super::entry::MemoryEntry;

/// DashMap-backed entry storage keyed by `namespace:id`.
///
/// Writes on distinct ids touch distinct shards; `scan` clones a snapshot so
/// searches never hold locks while scoring. The sweeper uses `remove_if` so an
/// entry is only removed while it is still expired — a concurrent expiry
/// refresh wins over deletion.
pub struct InMemoryBackend {
    data: DashMap<String, MemoryEntry>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    fn key(namespace: &str, id: &str) -> String {
        format!("{}:{}", namespace, id)
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn put(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        self.data
            .insert(Self::key(&entry.namespace, &entry.id), entry.clone());
        Ok(())
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        Ok(self
            .data
            .get(&Self::key(namespace, id))
            .map(|e| e.value().clone()))
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, MemoryError> {
        Ok(self.data.remove(&Self::key(namespace, id)).is_some())
    }

    async fn scan(&self, namespace: Option<&str>) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut entries = Vec::new();
        for item in self.data.iter() {
            if namespace.map_or(true, |ns| item.value().namespace == ns) {
                entries.push(item.value().clone());
            }
        }
        Ok(entries)
    }

    async fn update_expiry(
        &self,
        namespace: &str,
        id: &str,
        expires_at: i64,
    ) -> Result<(), MemoryError> {
        if let Some(mut entry) = self.data.get_mut(&Self::key(namespace, id)) {
            entry.expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn sweep_expired(&self, now_ms: i64, limit: usize) -> Result<usize, MemoryError> {
        let candidates: Vec<String> = self
            .data
            .iter()
            .filter(|item| item.value().is_expired(now_ms))
            .map(|item| item.key().clone())
            .take(limit)
            .collect();
        let mut removed = 0;
        for key in candidates {
            if self
                .data
                .remove_if(&key, |_, entry| entry.is_expired(now_ms))
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn count_expired(&self, now_ms: i64) -> Result<usize, MemoryError> {
        Ok(self
            .data
            .iter()
            .filter(|item| item.value().is_expired(now_ms))
            .count())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            vectors: true,
            persistent: false,
            scheme: "memory",
        }
    }

    async fn ping(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
