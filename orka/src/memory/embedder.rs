//! Text embedding for vector search.
//!
//! [`Embedder`] produces fixed-dimension unit vectors. [`HashEmbedder`] is the
//! deterministic default: no model, no network, stable across runs, so
//! persisted vectors stay comparable. [`CachedEmbedder`] wraps any embedder
//! with a bounded LRU keyed by content and degrades to a zero marker vector
//! when the inner embedder fails, letting search fall back to text scoring.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::backend::MemoryError;

/// Produces fixed-size float vectors from text.
///
/// Contract: deterministic for equal inputs, batchable, bounded per-call
/// latency. Implementations must be `Send + Sync`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text into a vector of dimension [`Embedder::dimension`],
    /// one vector per input in the same order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError>;

    fn dimension(&self) -> usize;
}

/// True when every component is zero — the degradation marker.
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic token-hash embedder.
///
/// Lowercased alphanumeric tokens hash into buckets with a sign bit; the
/// result is L2-normalized. Equal inputs always produce equal vectors, and
/// token overlap yields proportional cosine similarity, which is what the
/// hybrid ranker needs. Empty or token-free text embeds to the zero marker.
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let idx = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

struct CacheSlot {
    vector: Vec<f32>,
    last_used: u64,
}

struct CacheInner {
    slots: HashMap<String, CacheSlot>,
    tick: u64,
}

/// LRU cache over any [`Embedder`], keyed by content.
///
/// On inner failure every requested text resolves to the zero marker vector
/// (not cached), so callers can fall back to text-only search.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<CacheInner>,
    capacity: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(CacheInner {
                slots: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(usize, &str)> = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            cache.tick += 1;
            let tick = cache.tick;
            for (i, text) in texts.iter().enumerate() {
                if let Some(slot) = cache.slots.get_mut(*text) {
                    slot.last_used = tick;
                    results[i] = Some(slot.vector.clone());
                } else {
                    misses.push((i, text));
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<&str> = misses.iter().map(|(_, t)| *t).collect();
            match self.inner.embed(&miss_texts).await {
                Ok(vectors) => {
                    let mut cache = self.cache.lock().await;
                    cache.tick += 1;
                    let tick = cache.tick;
                    for ((i, text), vector) in misses.iter().zip(vectors) {
                        results[*i] = Some(vector.clone());
                        cache.slots.insert(
                            text.to_string(),
                            CacheSlot {
                                vector,
                                last_used: tick,
                            },
                        );
                    }
                    while cache.slots.len() > self.capacity {
                        if let Some(oldest) = cache
                            .slots
                            .iter()
                            .min_by_key(|(_, slot)| slot.last_used)
                            .map(|(k, _)| k.clone())
                        {
                            cache.slots.remove(&oldest);
                        } else {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedder degraded; returning zero marker vectors");
                    let zero = vec![0f32; self.inner.dimension()];
                    for (i, _) in &misses {
                        results[*i] = Some(zero.clone());
                    }
                }
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// **Scenario**: equal inputs always embed to identical unit vectors.
    #[tokio::test]
    async fn hash_embedder_deterministic_unit() {
        let e = HashEmbedder::new(64);
        let a = e.embed(&["capital of France is Paris"]).await.unwrap();
        let b = e.embed(&["capital of France is Paris"]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {}", norm);
        assert!((cosine_similarity(&a[0], &b[0]) - 1.0).abs() < 1e-5);
    }

    /// **Scenario**: token overlap yields positive similarity, disjoint text low.
    #[tokio::test]
    async fn hash_embedder_overlap_similarity() {
        let e = HashEmbedder::new(256);
        let vs = e
            .embed(&[
                "capital of France is Paris",
                "France capital",
                "completely unrelated zebra quartz",
            ])
            .await
            .unwrap();
        let related = cosine_similarity(&vs[0], &vs[1]);
        let unrelated = cosine_similarity(&vs[0], &vs[2]);
        assert!(related > 0.5, "related similarity too low: {}", related);
        assert!(related > unrelated, "{} vs {}", related, unrelated);
    }

    /// **Scenario**: empty text embeds to the zero marker vector.
    #[tokio::test]
    async fn empty_text_is_zero_marker() {
        let e = HashEmbedder::new(32);
        let vs = e.embed(&["", "   "]).await.unwrap();
        assert!(is_zero_vector(&vs[0]));
        assert!(is_zero_vector(&vs[1]));
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MemoryError::Embedding("backend down".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// **Scenario**: repeated embeds hit the cache; the inner embedder runs once.
    #[tokio::test]
    async fn cache_hits_skip_inner() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedEmbedder::new(inner.clone(), 8);
        cached.embed(&["a"]).await.unwrap();
        cached.embed(&["a"]).await.unwrap();
        cached.embed(&["a", "a"]).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: cache evicts least-recently-used entries at capacity.
    #[tokio::test]
    async fn cache_evicts_lru() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedEmbedder::new(inner.clone(), 2);
        cached.embed(&["a"]).await.unwrap();
        cached.embed(&["b"]).await.unwrap();
        cached.embed(&["a"]).await.unwrap(); // refresh a
        cached.embed(&["c"]).await.unwrap(); // evicts b
        cached.embed(&["a"]).await.unwrap(); // still cached
        let calls_before = inner.calls.load(Ordering::SeqCst);
        cached.embed(&["b"]).await.unwrap(); // must re-embed
        assert_eq!(inner.calls.load(Ordering::SeqCst), calls_before + 1);
    }

    /// **Scenario**: inner failure degrades to zero marker vectors, no error.
    #[tokio::test]
    async fn failure_degrades_to_zero_markers() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cached = CachedEmbedder::new(inner, 8);
        let vs = cached.embed(&["x", "y"]).await.unwrap();
        assert_eq!(vs.len(), 2);
        assert!(is_zero_vector(&vs[0]));
        assert!(is_zero_vector(&vs[1]));
    }
}
