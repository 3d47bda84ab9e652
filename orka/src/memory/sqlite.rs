//! SQLite memory backend. Persistent across process restarts.
//!
//! One row per entry keyed by `(namespace, id)`; the embedding is stored as a
//! little-endian f32 blob so vectors survive restarts and stay comparable
//! (the hash embedder is deterministic across runs). Schema is created on
//! first open. All calls run on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::backend::{BackendCapabilities, MemoryBackend, MemoryError};
use super::entry::{MemoryCategory, MemoryEntry, MemoryType};

/// Durable entry storage addressed as `sqlite://<path>`.
pub struct SqliteBackend {
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Opens (or creates) the database and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = open(&db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS orka_memory (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                node_id TEXT NOT NULL DEFAULT '',
                trace_id TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                embedding BLOB,
                category TEXT NOT NULL,
                memory_type TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                PRIMARY KEY (namespace, id)
            );
            CREATE INDEX IF NOT EXISTS idx_orka_memory_expires
                ON orka_memory(expires_at);
            "#,
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MemoryError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            f(&conn)
        })
        .await
        .map_err(|e| MemoryError::Unavailable(format!("blocking task: {}", e)))?
    }
}

fn open(path: &Path) -> Result<Connection, MemoryError> {
    Connection::open(path).map_err(storage)
}

fn storage(e: rusqlite::Error) -> MemoryError {
    MemoryError::Unavailable(e.to_string())
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for x in embedding {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let category: String = row.get("category")?;
    let memory_type: Option<String> = row.get("memory_type")?;
    let metadata: String = row.get("metadata")?;
    let embedding: Option<Vec<u8>> = row.get("embedding")?;
    Ok(MemoryEntry {
        namespace: row.get("namespace")?,
        id: row.get("id")?,
        node_id: row.get("node_id")?,
        trace_id: row.get("trace_id")?,
        content: row.get("content")?,
        embedding: embedding.map(|b| blob_to_embedding(&b)),
        category: MemoryCategory::parse(&category).unwrap_or(MemoryCategory::Log),
        memory_type: memory_type.as_deref().and_then(MemoryType::parse),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
    })
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    async fn put(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            let metadata = serde_json::to_string(&entry.metadata)
                .map_err(|e| MemoryError::Serialization(e.to_string()))?;
            conn.execute(
                r#"
                INSERT INTO orka_memory
                    (namespace, id, node_id, trace_id, content, embedding,
                     category, memory_type, metadata, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    node_id = excluded.node_id,
                    trace_id = excluded.trace_id,
                    content = excluded.content,
                    embedding = excluded.embedding,
                    category = excluded.category,
                    memory_type = excluded.memory_type,
                    metadata = excluded.metadata,
                    expires_at = excluded.expires_at
                "#,
                params![
                    entry.namespace,
                    entry.id,
                    entry.node_id,
                    entry.trace_id,
                    entry.content,
                    entry.embedding.as_deref().map(embedding_to_blob),
                    entry.category.as_str(),
                    entry.memory_type.map(|t| t.as_str()),
                    metadata,
                    entry.created_at,
                    entry.expires_at,
                ],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let (namespace, id) = (namespace.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM orka_memory WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                row_to_entry,
            )
            .optional()
            .map_err(storage)
        })
        .await
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, MemoryError> {
        let (namespace, id) = (namespace.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let n = conn
                .execute(
                    "DELETE FROM orka_memory WHERE namespace = ?1 AND id = ?2",
                    params![namespace, id],
                )
                .map_err(storage)?;
            Ok(n > 0)
        })
        .await
    }

    async fn scan(&self, namespace: Option<&str>) -> Result<Vec<MemoryEntry>, MemoryError> {
        let namespace = namespace.map(str::to_string);
        self.with_conn(move |conn| {
            let mut entries = Vec::new();
            match namespace {
                Some(ns) => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM orka_memory WHERE namespace = ?1")
                        .map_err(storage)?;
                    let rows = stmt.query_map(params![ns], row_to_entry).map_err(storage)?;
                    for row in rows {
                        entries.push(row.map_err(storage)?);
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT * FROM orka_memory")
                        .map_err(storage)?;
                    let rows = stmt.query_map([], row_to_entry).map_err(storage)?;
                    for row in rows {
                        entries.push(row.map_err(storage)?);
                    }
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn update_expiry(
        &self,
        namespace: &str,
        id: &str,
        expires_at: i64,
    ) -> Result<(), MemoryError> {
        let (namespace, id) = (namespace.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE orka_memory SET expires_at = ?3 WHERE namespace = ?1 AND id = ?2",
                params![namespace, id, expires_at],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn sweep_expired(&self, now_ms: i64, limit: usize) -> Result<usize, MemoryError> {
        self.with_conn(move |conn| {
            // Single statement, so deletion rights are atomic per row.
            let n = conn
                .execute(
                    r#"
                    DELETE FROM orka_memory
                    WHERE rowid IN (
                        SELECT rowid FROM orka_memory
                        WHERE expires_at IS NOT NULL AND expires_at < ?1
                        LIMIT ?2
                    )
                    "#,
                    params![now_ms, limit as i64],
                )
                .map_err(storage)?;
            Ok(n)
        })
        .await
    }

    async fn count_expired(&self, now_ms: i64) -> Result<usize, MemoryError> {
        self.with_conn(move |conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM orka_memory WHERE expires_at IS NOT NULL AND expires_at < ?1",
                    params![now_ms],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            Ok(n as usize)
        })
        .await
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            vectors: true,
            persistent: true,
            scheme: "sqlite",
        }
    }

    async fn ping(&self) -> Result<(), MemoryError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(storage)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_backend() -> (tempfile::TempDir, SqliteBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("orka.db")).unwrap();
        (dir, backend)
    }

    /// **Scenario**: entries round-trip through SQLite with all fields intact.
    #[tokio::test]
    async fn round_trip_preserves_fields() {
        let (_dir, backend) = temp_backend();
        let mut entry = MemoryEntry::stored("facts", "capital of France is Paris")
            .with_id("e1")
            .with_node("writer")
            .with_trace("t-1")
            .with_memory_type(MemoryType::LongTerm)
            .with_metadata("confidence", json!(0.9));
        entry.embedding = Some(vec![0.5, -0.25, 1.0]);
        entry.expires_at = Some(entry.created_at + 1000);

        backend.put(&entry).await.unwrap();
        let got = backend.get("facts", "e1").await.unwrap().unwrap();
        assert_eq!(got.content, entry.content);
        assert_eq!(got.node_id, "writer");
        assert_eq!(got.trace_id, "t-1");
        assert_eq!(got.embedding, Some(vec![0.5, -0.25, 1.0]));
        assert_eq!(got.category, MemoryCategory::Stored);
        assert_eq!(got.memory_type, Some(MemoryType::LongTerm));
        assert_eq!(got.metadata["confidence"], json!(0.9));
        assert_eq!(got.expires_at, entry.expires_at);
    }

    /// **Scenario**: put with the same (namespace, id) upserts.
    #[tokio::test]
    async fn upsert_replaces() {
        let (_dir, backend) = temp_backend();
        backend
            .put(&MemoryEntry::stored("ns", "one").with_id("a"))
            .await
            .unwrap();
        backend
            .put(&MemoryEntry::stored("ns", "two").with_id("a"))
            .await
            .unwrap();
        let entries = backend.scan(Some("ns")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "two");
    }

    /// **Scenario**: sweep deletes expired rows up to the limit; entries
    /// without expiry are untouched.
    #[tokio::test]
    async fn sweep_and_count() {
        let (_dir, backend) = temp_backend();
        for i in 0..3 {
            let mut e = MemoryEntry::stored("ns", "c").with_id(format!("e{}", i));
            e.expires_at = Some(10);
            backend.put(&e).await.unwrap();
        }
        backend
            .put(&MemoryEntry::stored("ns", "keep").with_id("keep"))
            .await
            .unwrap();

        assert_eq!(backend.count_expired(100).await.unwrap(), 3);
        assert_eq!(backend.sweep_expired(100, 2).await.unwrap(), 2);
        assert_eq!(backend.sweep_expired(100, 10).await.unwrap(), 1);
        assert_eq!(backend.scan(None).await.unwrap().len(), 1);
    }

    /// **Scenario**: data survives reopening the database file.
    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orka.db");
        {
            let backend = SqliteBackend::new(&path).unwrap();
            backend
                .put(&MemoryEntry::stored("ns", "durable").with_id("a"))
                .await
                .unwrap();
        }
        let backend = SqliteBackend::new(&path).unwrap();
        let got = backend.get("ns", "a").await.unwrap().unwrap();
        assert_eq!(got.content, "durable");
        assert!(backend.capabilities().persistent);
    }
}
