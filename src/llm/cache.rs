//! Content-addressed response cache with TTL and LRU bound.
//!
//! # Fingerprint
//! `sha256("{model}_{temperature:.2}_{fragment}")` where `fragment` is the text
//! following a `query:` or `question:` label (rest of that line), or the second
//! half of the whitespace-normalized prompt when no label is present.
//!
//! Only the prompt header, the lines before the first blank line, is searched
//! for the label. Interpolated payload (documents, requirements, context) sits
//! below it, so a label quoted inside user content never becomes the key.
//!
//! # Invariants
//! - At most one entry per fingerprint; `put` overwrites
//! - An entry older than `ttl` is never returned
//! - `len() <= capacity` after every `put`

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

fn label_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?im)^[ \t]*(?:query|question):[ \t]*(.*)$").ok())
        .as_ref()
}

fn blank_line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n[ \t]*\r?\n").ok()).as_ref()
}

/// Lines before the first blank line.
fn header(prompt: &str) -> &str {
    match blank_line_pattern().and_then(|re| re.find(prompt)) {
        Some(m) => &prompt[..m.start()],
        None => prompt,
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the semantically salient part of a prompt.
fn semantic_fragment(prompt: &str) -> String {
    if let Some(caps) = label_pattern().and_then(|re| re.captures(header(prompt))) {
        if let Some(m) = caps.get(1) {
            let fragment = normalize_whitespace(m.as_str());
            if !fragment.is_empty() {
                return fragment;
            }
        }
    }

    let normalized = normalize_whitespace(prompt);
    let mut mid = normalized.len() / 2;
    while !normalized.is_char_boundary(mid) {
        mid += 1;
    }
    normalized[mid..].to_string()
}

/// Compute the cache fingerprint for a request.
///
/// # Pure Function
/// Formatting differences outside the salient fragment do not change the result.
pub fn fingerprint(model: &str, temperature: f64, prompt: &str) -> String {
    let input = format!("{}_{:.2}_{}", model, temperature, semantic_fragment(prompt));
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone)]
struct CacheEntry {
    created_at: Instant,
    last_used: Instant,
    payload: String,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Bounded TTL cache of generation results.
///
/// # Thread Safety
/// Every operation takes the write lock for its whole read-modify-write, so
/// concurrent writers to one fingerprint never interleave.
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    inner: RwLock<CacheInner>,
}

impl ResponseCache {
    /// Create a cache. A zero `capacity` disables storage.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, fingerprint: &str) -> Option<String> {
        self.get_at(fingerprint, Instant::now()).await
    }

    /// Look up `fingerprint` as of `now`.
    ///
    /// # Postconditions
    /// - Returns `None` if absent or `now - created_at > ttl`
    /// - An expired entry is removed
    pub async fn get_at(&self, fingerprint: &str, now: Instant) -> Option<String> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let ttl = self.ttl;

        let expired = match inner.entries.get(fingerprint) {
            Some(entry) => now.saturating_duration_since(entry.created_at) > ttl,
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.remove(fingerprint);
            inner.stats.misses += 1;
            inner.stats.entries = inner.entries.len();
            tracing::debug!(fingerprint = %short(fingerprint), "Cache entry expired");
            return None;
        }

        inner.stats.hits += 1;
        let entry = inner.entries.get_mut(fingerprint)?;
        entry.last_used = now;
        tracing::debug!(fingerprint = %short(fingerprint), "Cache hit");
        Some(entry.payload.clone())
    }

    pub async fn put(&self, fingerprint: &str, payload: String) {
        self.put_at(fingerprint, payload, Instant::now()).await
    }

    /// Store `payload` under `fingerprint` as of `now`.
    ///
    /// # Postconditions
    /// - Expired entries are purged
    /// - If a new key would exceed capacity, the least recently used entry is evicted
    pub async fn put_at(&self, fingerprint: &str, payload: String, now: Instant) {
        if self.capacity == 0 {
            return;
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let ttl = self.ttl;

        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| now.saturating_duration_since(e.created_at) <= ttl);
        let purged = before - inner.entries.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }

        if !inner.entries.contains_key(fingerprint) && inner.entries.len() >= self.capacity {
            let lru = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = lru {
                inner.entries.remove(&key);
                inner.stats.evictions += 1;
            }
        }

        inner.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                created_at: now,
                last_used: now,
                payload,
            },
        );
        inner.stats.entries = inner.entries.len();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.stats.entries = 0;
    }
}

/// Short digest of request inputs, for embedding in a prompt's query label.
///
/// Keys of JSON objects are hashed in sorted order, so equal values give equal
/// digests whatever their original key order.
pub fn scope_digest(values: &[&serde_json::Value]) -> String {
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_uses_query_label() {
        let a = fingerprint("m", 0.2, "Intro text\nQuery: list the components\nFormat: json");
        let b = fingerprint("m", 0.2, "Other preamble entirely\nquery:   list   the components\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_model_and_temperature() {
        let prompt = "question: what patterns apply?";
        assert_ne!(fingerprint("a", 0.2, prompt), fingerprint("b", 0.2, prompt));
        assert_ne!(fingerprint("a", 0.2, prompt), fingerprint("a", 0.3, prompt));
        // rounded to two decimals
        assert_eq!(fingerprint("a", 0.2, prompt), fingerprint("a", 0.2001, prompt));
    }

    #[test]
    fn test_fingerprint_falls_back_to_second_half() {
        let a = fingerprint("m", 0.1, "AAAA BBBB   CCCC DDDD");
        let b = fingerprint("m", 0.1, "AAAA  BBBB CCCC\nDDDD");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_label_inside_payload_does_not_drive_fingerprint() {
        let payload = "REQUIREMENTS:\n{\n  \"faq.md\": \"x\"\n}\nQuestion: how do customers pay?";
        let patterns = format!("Select architecture patterns.\n\n{}", payload);
        let components = format!("Identify system components.\n\n{}", payload);
        assert_ne!(fingerprint("m", 0.2, &patterns), fingerprint("m", 0.2, &components));
    }

    #[test]
    fn test_header_label_wins_over_payload_label() {
        let a = fingerprint("m", 0.2, "QUERY: execute interface_design [abc]\n\nquestion: shared");
        let b = fingerprint("m", 0.2, "QUERY: execute data_flow_mapping [abc]\n\nquestion: shared");
        let c = fingerprint("m", 0.2, "Intro\nquery:  execute interface_design   [abc]\n\nother payload");
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_scope_digest_ignores_key_order() {
        let a = serde_json::json!({"a": 1, "b": [1, 2]});
        let b: serde_json::Value = serde_json::from_str(r#"{"b": [1, 2], "a": 1}"#).unwrap();
        assert_eq!(scope_digest(&[&a]), scope_digest(&[&b]));
        assert_ne!(scope_digest(&[&a]), scope_digest(&[&a, &b]));
        assert_eq!(scope_digest(&[&a]).len(), 12);
    }

    #[test]
    fn test_fragment_respects_char_boundaries() {
        // multi-byte characters around the midpoint must not panic
        let _ = fingerprint("m", 0.1, "ééééé ààààà");
    }

    #[tokio::test]
    async fn test_round_trip_within_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(3600), 10);
        let t0 = Instant::now();
        cache.put_at("f", "v".to_string(), t0).await;
        assert_eq!(
            cache.get_at("f", t0 + Duration::from_secs(3599)).await.as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_miss_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(3600), 10);
        let t0 = Instant::now();
        cache.put_at("f", "v".to_string(), t0).await;
        assert!(cache.get_at("f", t0 + Duration::from_secs(3601)).await.is_none());
        assert!(cache.is_empty().await);
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        cache.put("f", "old".to_string()).await;
        cache.put("f", "new".to_string()).await;
        assert_eq!(cache.get("f").await.as_deref(), Some("new"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_purges_expired_entries() {
        let cache = ResponseCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.put_at("a", "1".to_string(), t0).await;
        cache.put_at("b", "2".to_string(), t0 + Duration::from_secs(20)).await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let cache = ResponseCache::new(Duration::from_secs(3600), 2);
        let t0 = Instant::now();
        cache.put_at("a", "1".to_string(), t0).await;
        cache.put_at("b", "2".to_string(), t0 + Duration::from_secs(1)).await;
        // touch "a" so "b" becomes least recently used
        assert!(cache.get_at("a", t0 + Duration::from_secs(2)).await.is_some());
        cache.put_at("c", "3".to_string(), t0 + Duration::from_secs(3)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get_at("b", t0 + Duration::from_secs(4)).await.is_none());
        assert!(cache.get_at("a", t0 + Duration::from_secs(4)).await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_stores_nothing() {
        let cache = ResponseCache::new(Duration::from_secs(60), 0);
        cache.put("f", "v".to_string()).await;
        assert!(cache.get("f").await.is_none());
    }
}
