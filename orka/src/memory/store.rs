//! Memory store: append, hybrid search, classification, retention, cleanup.
//!
//! Layers run-level semantics over a [`MemoryBackend`]: content-addressed ids,
//! short/long-term classification, TTL computation from the injected
//! [`RetentionPolicy`], the four-component hybrid ranking, access-based TTL
//! boosting and a bounded write-retry queue for degraded backends.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::backend::{BackendCapabilities, MemoryBackend, MemoryError};
use super::embedder::{cosine_similarity, is_zero_vector, tokenize, Embedder};
use super::entry::{now_ms, MemoryCategory, MemoryEntry, MemoryType};

/// Access-based TTL boost: multiplies the remaining TTL on read, up to a cap.
#[derive(Debug, Clone, Copy)]
pub struct AccessBoost {
    pub factor: f64,
    pub cap_hours: f64,
}

/// Retention policy injected at store construction — no process globals.
///
/// An importance rule `name → multiplier` matches an entry when
/// `metadata.importance == name` or `metadata[name]` is truthy; every match
/// multiplies the base TTL for the entry's memory type.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub decay_enabled: bool,
    pub short_term_hours: f64,
    pub long_term_hours: f64,
    pub importance_rules: HashMap<String, f64>,
    pub access_boost: Option<AccessBoost>,
    /// Sweeper cadence.
    pub check_interval: Duration,
    /// Per-sweep wall-clock budget.
    pub sweep_budget: Duration,
    /// Entries deleted per backend call during a sweep.
    pub sweep_batch: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            decay_enabled: true,
            short_term_hours: 2.0,
            long_term_hours: 168.0,
            importance_rules: HashMap::new(),
            access_boost: None,
            check_interval: Duration::from_secs(30 * 60),
            sweep_budget: Duration::from_secs(5),
            sweep_batch: 256,
        }
    }
}

/// Search parameters.
///
/// The four scoring weights are normalized by their sum; components whose
/// weight is zero (or whose inputs are unavailable — no query vector, no
/// context window) are never computed and drop out of the normalization. A
/// `similarity_threshold` of 1.0 degenerates to exact-vector matching.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub namespace: Option<String>,
    pub limit: usize,
    pub similarity_threshold: f64,
    pub memory_type: Option<MemoryType>,
    pub metadata_filters: HashMap<String, Value>,
    pub enable_hybrid: bool,
    pub vector_weight: f64,
    pub temporal_weight: f64,
    pub context_weight: f64,
    pub text_weight: f64,
    /// Recent outputs whose embeddings augment the query (context component).
    pub context_window: Vec<String>,
    pub max_search_time: Duration,
    /// Half-life for the temporal component `τ(age) = exp(-age / half_life)`.
    pub decay_half_life: Duration,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            namespace: None,
            limit: 10,
            similarity_threshold: 0.0,
            memory_type: None,
            metadata_filters: HashMap::new(),
            enable_hybrid: true,
            vector_weight: 0.5,
            temporal_weight: 0.2,
            context_weight: 0.0,
            text_weight: 0.3,
            context_window: Vec::new(),
            max_search_time: Duration::from_millis(500),
            decay_half_life: Duration::from_secs(24 * 3600),
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: MemoryEntry,
    pub score: f64,
}

/// Search outcome with timing and degradation flags.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub elapsed: Duration,
    /// True when the `max_search_time` budget cut the candidate scan short.
    pub truncated: bool,
    /// False when the query embedded to the zero marker and scoring fell back
    /// to text-only ranking.
    pub vector_used: bool,
}

/// Cleanup outcome; in dry-run mode only `expired` is populated.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub expired: usize,
    pub deleted: usize,
    pub elapsed_ms: u64,
}

/// Store health and distribution counters.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub by_namespace: HashMap<String, usize>,
    pub short_term: usize,
    pub long_term: usize,
    pub stored: usize,
    pub log: usize,
    pub last_cleanup_ms: Option<i64>,
    pub degraded: bool,
    pub pending_retries: usize,
    pub backend_scheme: String,
    pub backend_persistent: bool,
    pub backend_vectors: bool,
}

struct PendingWrite {
    entry: MemoryEntry,
    attempts: u32,
}

/// Concurrent-safe memory store.
///
/// Multiple readers and writers run concurrently; scoring works over a scan
/// snapshot so searches never block appends, and expired-entry deletion is
/// atomic per entry at the backend.
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn Embedder>,
    policy: RetentionPolicy,
    retries: Mutex<VecDeque<PendingWrite>>,
    max_retry_attempts: u32,
    max_retry_queue: usize,
    degraded: AtomicBool,
    last_cleanup: AtomicI64,
}

impl MemoryStore {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        embedder: Arc<dyn Embedder>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            backend,
            embedder,
            policy,
            retries: Mutex::new(VecDeque::new()),
            max_retry_attempts: 3,
            max_retry_queue: 64,
            degraded: AtomicBool::new(false),
            last_cleanup: AtomicI64::new(0),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    pub async fn ping(&self) -> Result<(), MemoryError> {
        self.backend.ping().await
    }

    /// Appends one entry.
    ///
    /// Fills in the content-addressed id, classification, embedding and expiry
    /// when the writer left them open. Idempotent when the id is supplied
    /// (backend upsert). On backend failure the entry is queued for retry and
    /// the call reports `Degraded`; when the queue is full the entry is
    /// dropped with `WriteFailed`.
    pub async fn append(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        self.flush_retries().await;

        if entry.id.is_empty() {
            entry.id = MemoryEntry::content_id(&entry.namespace, &entry.content);
        }
        if entry.memory_type.is_none() {
            entry.memory_type = Some(self.classify(&entry.content, &entry.metadata));
        }
        if entry.category == MemoryCategory::Stored && entry.embedding.is_none() {
            match self.embedder.embed(&[entry.content.as_str()]).await {
                Ok(mut vectors) if !vectors.is_empty() => {
                    let v = vectors.remove(0);
                    if !is_zero_vector(&v) {
                        entry.embedding = Some(v);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed; storing entry without vector");
                }
            }
        }
        if self.policy.decay_enabled && entry.expires_at.is_none() {
            let hours = self.effective_ttl_hours(
                entry.memory_type.unwrap_or(MemoryType::ShortTerm),
                &entry.metadata,
            );
            entry.expires_at = Some(entry.created_at + (hours * 3_600_000.0) as i64);
        }

        let id = entry.id.clone();
        match self.backend.put(&entry).await {
            Ok(()) => {
                self.degraded.store(false, Ordering::SeqCst);
                Ok(id)
            }
            Err(e) => {
                self.degraded.store(true, Ordering::SeqCst);
                let mut queue = self.retries.lock().await;
                if queue.len() >= self.max_retry_queue {
                    tracing::error!(id = %id, error = %e, "retry queue full; dropping write");
                    return Err(MemoryError::WriteFailed(format!(
                        "retry queue full, dropped entry {}: {}",
                        id, e
                    )));
                }
                queue.push_back(PendingWrite { entry, attempts: 0 });
                Err(MemoryError::Degraded(format!(
                    "backend write failed, entry {} queued for retry: {}",
                    id, e
                )))
            }
        }
    }

    /// Retries queued writes; entries beyond the attempt cap are dropped.
    /// Returns the number flushed successfully.
    pub async fn flush_retries(&self) -> usize {
        let mut queue = self.retries.lock().await;
        if queue.is_empty() {
            return 0;
        }
        let mut flushed = 0;
        let mut remaining = VecDeque::new();
        while let Some(mut pending) = queue.pop_front() {
            match self.backend.put(&pending.entry).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    pending.attempts += 1;
                    if pending.attempts >= self.max_retry_attempts {
                        tracing::error!(
                            id = %pending.entry.id,
                            error = %e,
                            "write retry cap exhausted; dropping entry"
                        );
                    } else {
                        remaining.push_back(pending);
                    }
                }
            }
        }
        let healthy = remaining.is_empty();
        *queue = remaining;
        if healthy && flushed > 0 {
            self.degraded.store(false, Ordering::SeqCst);
        }
        flushed
    }

    /// Hybrid search over `stored` entries.
    ///
    /// Results with combined score ≥ `similarity_threshold`, sorted by score
    /// descending, ties broken by `created_at` descending, capped at `limit`.
    /// Falls back to text-only scoring when the query cannot be embedded.
    pub async fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<SearchResponse, MemoryError> {
        let started = Instant::now();
        let now = now_ms();

        let query_vec = match self.embedder.embed(&[query]).await {
            Ok(mut vs) if !vs.is_empty() => vs.remove(0),
            _ => Vec::new(),
        };
        let vector_used = !query_vec.is_empty() && !is_zero_vector(&query_vec);

        let context_vecs = if params.context_weight > 0.0 && !params.context_window.is_empty() {
            let refs: Vec<&str> = params.context_window.iter().map(String::as_str).collect();
            match self.embedder.embed(&refs).await {
                Ok(vs) => vs.into_iter().filter(|v| !is_zero_vector(v)).collect(),
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let have_context = !context_vecs.is_empty();

        let (w_v, w_t, w_c, w_k) = normalized_weights(params, vector_used, have_context);
        let query_tokens = tokenize(query);

        let candidates = self.backend.scan(params.namespace.as_deref()).await?;
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut truncated = false;

        for entry in candidates {
            if started.elapsed() > params.max_search_time {
                truncated = true;
                tracing::warn!(
                    budget_ms = params.max_search_time.as_millis() as u64,
                    "search budget exhausted; returning partial candidate scan"
                );
                break;
            }
            // Reader nodes never see log-category or expired entries.
            if entry.category != MemoryCategory::Stored || entry.is_expired(now) {
                continue;
            }
            if let Some(t) = params.memory_type {
                if entry.memory_type != Some(t) {
                    continue;
                }
            }
            if !metadata_matches(&entry.metadata, &params.metadata_filters) {
                continue;
            }

            let cos = match (&entry.embedding, vector_used) {
                (Some(e), true) => cosine_similarity(&query_vec, e) as f64,
                _ => 0.0,
            };
            let mut score = 0.0;
            if w_v > 0.0 {
                score += w_v * cos;
            }
            if w_t > 0.0 {
                let age_ms = (now - entry.created_at).max(0) as f64;
                let half_life_ms = params.decay_half_life.as_millis().max(1) as f64;
                score += w_t * (-age_ms / half_life_ms).exp();
            }
            if w_c > 0.0 {
                if let Some(e) = &entry.embedding {
                    let mean: f64 = context_vecs
                        .iter()
                        .map(|c| cosine_similarity(c, e) as f64)
                        .sum::<f64>()
                        / context_vecs.len() as f64;
                    score += w_c * mean;
                }
            }
            if w_k > 0.0 {
                score += w_k * text_score(&query_tokens, &entry.content);
            }

            let passes = if params.similarity_threshold >= 1.0 {
                cos >= 1.0 - 1e-6
            } else {
                score >= params.similarity_threshold
            };
            if passes {
                hits.push(SearchHit { entry, score });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.entry.created_at.cmp(&a.entry.created_at))
        });
        hits.truncate(params.limit);

        self.boost_on_access(&hits, now).await;

        Ok(SearchResponse {
            hits,
            elapsed: started.elapsed(),
            truncated,
            vector_used,
        })
    }

    /// Extends the remaining TTL of read entries per the access-boost policy.
    async fn boost_on_access(&self, hits: &[SearchHit], now: i64) {
        let Some(boost) = self.policy.access_boost else {
            return;
        };
        if !self.policy.decay_enabled {
            return;
        }
        let cap_ms = (boost.cap_hours * 3_600_000.0) as i64;
        for hit in hits {
            let Some(expires_at) = hit.entry.expires_at else {
                continue;
            };
            let remaining = expires_at - now;
            if remaining <= 0 {
                continue;
            }
            let boosted = ((remaining as f64 * boost.factor) as i64).min(cap_ms);
            if boosted > remaining {
                if let Err(e) = self
                    .backend
                    .update_expiry(&hit.entry.namespace, &hit.entry.id, now + boosted)
                    .await
                {
                    tracing::warn!(id = %hit.entry.id, error = %e, "access boost skipped");
                }
            }
        }
    }

    /// Removes expired entries; dry-run only counts them.
    pub async fn cleanup_expired(&self, dry_run: bool) -> Result<CleanupReport, MemoryError> {
        let started = Instant::now();
        let now = now_ms();
        let expired = self.backend.count_expired(now).await?;
        let mut deleted = 0;
        if !dry_run {
            while deleted < expired {
                if started.elapsed() > self.policy.sweep_budget {
                    tracing::warn!(deleted, expired, "sweep budget exhausted");
                    break;
                }
                let n = self.backend.sweep_expired(now, self.policy.sweep_batch).await?;
                if n == 0 {
                    break;
                }
                deleted += n;
            }
            self.last_cleanup.store(now, Ordering::SeqCst);
        }
        Ok(CleanupReport {
            dry_run,
            expired,
            deleted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Counts by namespace, type and category, plus health flags.
    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let entries = self.backend.scan(None).await?;
        let caps = self.backend.capabilities();
        let mut stats = MemoryStats {
            total: entries.len(),
            by_namespace: HashMap::new(),
            short_term: 0,
            long_term: 0,
            stored: 0,
            log: 0,
            last_cleanup_ms: match self.last_cleanup.load(Ordering::SeqCst) {
                0 => None,
                ms => Some(ms),
            },
            degraded: self.degraded.load(Ordering::SeqCst),
            pending_retries: self.retries.lock().await.len(),
            backend_scheme: caps.scheme.to_string(),
            backend_persistent: caps.persistent,
            backend_vectors: caps.vectors,
        };
        for entry in &entries {
            *stats.by_namespace.entry(entry.namespace.clone()).or_insert(0) += 1;
            match entry.memory_type {
                Some(MemoryType::LongTerm) => stats.long_term += 1,
                _ => stats.short_term += 1,
            }
            match entry.category {
                MemoryCategory::Stored => stats.stored += 1,
                MemoryCategory::Log => stats.log += 1,
            }
        }
        Ok(stats)
    }

    /// Classifies an unpinned entry. Score > 0.6 is long-term.
    pub fn classify(&self, content: &str, metadata: &HashMap<String, Value>) -> MemoryType {
        if classification_score(content, metadata) > 0.6 {
            MemoryType::LongTerm
        } else {
            MemoryType::ShortTerm
        }
    }

    /// Effective TTL = base hours for the type × product of matched
    /// importance multipliers.
    pub fn effective_ttl_hours(
        &self,
        memory_type: MemoryType,
        metadata: &HashMap<String, Value>,
    ) -> f64 {
        let base = match memory_type {
            MemoryType::ShortTerm => self.policy.short_term_hours,
            MemoryType::LongTerm => self.policy.long_term_hours,
        };
        let mut hours = base;
        for (rule, multiplier) in &self.policy.importance_rules {
            if rule_matches(rule, metadata) {
                hours *= multiplier;
            }
        }
        hours
    }
}

fn rule_matches(rule: &str, metadata: &HashMap<String, Value>) -> bool {
    if metadata
        .get("importance")
        .and_then(|v| v.as_str())
        .map_or(false, |v| v == rule)
    {
        return true;
    }
    match metadata.get(rule) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}

fn metadata_matches(metadata: &HashMap<String, Value>, filters: &HashMap<String, Value>) -> bool {
    filters
        .iter()
        .all(|(k, expected)| metadata.get(k) == Some(expected))
}

/// Classification score in [0, 1] from content shape and metadata signals.
pub fn classification_score(content: &str, metadata: &HashMap<String, Value>) -> f64 {
    let mut score: f64 = 0.3;
    let len = content.chars().count();
    if len > 200 {
        score += 0.2;
    } else if len > 50 {
        score += 0.1;
    }
    if content.contains('{') || content.contains('\n') {
        score += 0.1;
    }
    if let Some(conf) = metadata.get("confidence").and_then(|v| v.as_f64()) {
        score += 0.2 * conf.clamp(0.0, 1.0);
    }
    if let Some(cat) = metadata.get("category").and_then(|v| v.as_str()) {
        if cat == "user_correction" || cat == "verified_fact" {
            score += 0.3;
        }
    }
    let lower = content.to_lowercase();
    for keyword in ["routine", "debug", "error"] {
        if lower.contains(keyword) {
            score -= 0.2;
        }
    }
    score.clamp(0.0, 1.0)
}

/// Lexical component: fraction of query terms present in the content.
fn text_score(query_tokens: &[String], content: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = tokenize(content);
    let matched = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(t))
        .count();
    matched as f64 / query_tokens.len() as f64
}

/// Normalizes the four weights by their sum, dropping unavailable components.
fn normalized_weights(
    params: &SearchParams,
    have_vector: bool,
    have_context: bool,
) -> (f64, f64, f64, f64) {
    if !params.enable_hybrid {
        return if have_vector {
            (1.0, 0.0, 0.0, 0.0)
        } else {
            (0.0, 0.0, 0.0, 1.0)
        };
    }
    let v = if have_vector { params.vector_weight.max(0.0) } else { 0.0 };
    let t = params.temporal_weight.max(0.0);
    let c = if have_context { params.context_weight.max(0.0) } else { 0.0 };
    let k = params.text_weight.max(0.0);
    let sum = v + t + c + k;
    if sum <= 0.0 {
        return if have_vector {
            (1.0, 0.0, 0.0, 0.0)
        } else {
            (0.0, 0.0, 0.0, 1.0)
        };
    }
    (v / sum, t / sum, c / sum, k / sum)
}
