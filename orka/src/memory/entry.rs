//! Stored memory unit and its identifiers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Retrievability class. Only `stored` entries are visible to reader nodes;
/// `log` entries exist for observability and never surface in search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Stored,
    Log,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Stored => "stored",
            MemoryCategory::Log => "log",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stored" => Some(MemoryCategory::Stored),
            "log" => Some(MemoryCategory::Log),
            _ => None,
        }
    }
}

/// Retention class; decides which base TTL applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    ShortTerm,
    LongTerm,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::ShortTerm => "short_term",
            MemoryType::LongTerm => "long_term",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "short_term" => Some(MemoryType::ShortTerm),
            "long_term" => Some(MemoryType::LongTerm),
            _ => None,
        }
    }
}

/// One stored unit: content plus its index fields.
///
/// `memory_type` stays `None` until the store classifies the entry on append
/// (writers may pin it up front). `expires_at > created_at` holds whenever
/// decay is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Content-addressed unless supplied by the writer.
    pub id: String,
    pub namespace: String,
    pub node_id: String,
    pub trace_id: String,
    pub content: String,
    /// Fixed-dimension unit vector; a zero vector marks embedding degradation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub category: MemoryCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds; `None` when decay is disabled for this entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl MemoryEntry {
    /// New stored-category entry with empty id (content-addressed on append).
    pub fn stored(namespace: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            namespace: namespace.into(),
            node_id: String::new(),
            trace_id: String::new(),
            content: content.into(),
            embedding: None,
            category: MemoryCategory::Stored,
            memory_type: None,
            metadata: HashMap::new(),
            created_at: now_ms(),
            expires_at: None,
        }
    }

    /// New log-category entry (never retrievable by readers).
    pub fn log(namespace: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category: MemoryCategory::Log,
            ..Self::stored(namespace, content)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at < now_ms)
    }

    /// Deterministic content-addressed id: SHA-256 over namespace and content.
    pub fn content_id(namespace: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update(b"\n");
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        hex
    }
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: content ids are deterministic and namespace-scoped.
    #[test]
    fn content_id_deterministic() {
        let a = MemoryEntry::content_id("facts", "capital of France is Paris");
        let b = MemoryEntry::content_id("facts", "capital of France is Paris");
        let c = MemoryEntry::content_id("other", "capital of France is Paris");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    /// **Scenario**: builders set category, type and metadata as expected.
    #[test]
    fn builders_compose() {
        let entry = MemoryEntry::stored("facts", "x")
            .with_id("custom")
            .with_node("writer")
            .with_trace("t-1")
            .with_memory_type(MemoryType::LongTerm)
            .with_metadata("confidence", json!(0.9));
        assert_eq!(entry.id, "custom");
        assert_eq!(entry.category, MemoryCategory::Stored);
        assert_eq!(entry.memory_type, Some(MemoryType::LongTerm));
        assert_eq!(entry.metadata["confidence"], json!(0.9));

        let log = MemoryEntry::log("logs", "step");
        assert_eq!(log.category, MemoryCategory::Log);
        assert!(log.memory_type.is_none());
    }

    /// **Scenario**: expiry compares against the provided clock.
    #[test]
    fn expiry_check() {
        let mut entry = MemoryEntry::stored("ns", "c");
        assert!(!entry.is_expired(i64::MAX));
        entry.expires_at = Some(100);
        assert!(entry.is_expired(101));
        assert!(!entry.is_expired(99));
    }

    /// **Scenario**: category/type string forms round-trip through parse.
    #[test]
    fn string_forms_round_trip() {
        assert_eq!(
            MemoryCategory::parse(MemoryCategory::Log.as_str()),
            Some(MemoryCategory::Log)
        );
        assert_eq!(
            MemoryType::parse(MemoryType::LongTerm.as_str()),
            Some(MemoryType::LongTerm)
        );
        assert_eq!(MemoryType::parse("bogus"), None);
    }
}
