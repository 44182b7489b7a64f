//! Content cache — exact-match and similarity-match store for generated
//! fragments (locations, routes, NPC bios, flavour text).
//!
//! The cache is process-wide, not session-scoped: fingerprints are derived
//! from genre/keyword inputs, so sessions of the same deployment dedup
//! against each other. Entries live in an LRU ring bounded by the
//! configured capacity; eviction happens on insert, never mid-lookup.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;
use crate::oracle::{ContentKind, OracleRequest};

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Exact-match cache key: SHA-256 over the canonical JSON of a structured
/// request. Never derived from rendered prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a request.
    ///
    /// Serialization of [`OracleRequest`] is field-ordered, so identical
    /// structured inputs always produce identical keys.
    #[must_use]
    pub fn of(request: &OracleRequest) -> Self {
        let canonical =
            serde_json::to_string(request).unwrap_or_else(|_| format!("{request:?}"));
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// Hex form of the fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Comparable token-set signature of a request, used by the similarity
/// fallback. Jaccard overlap over normalized tokens: cheap, deterministic,
/// and good enough to catch paraphrase variance in keywords and tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(BTreeSet<String>);

impl Signature {
    /// Build the signature of a request from its keyword, context and tags.
    #[must_use]
    pub fn of(request: &OracleRequest) -> Self {
        let mut tokens = BTreeSet::new();
        for source in std::iter::once(request.keyword.as_str())
            .chain(request.context.iter().map(String::as_str))
            .chain(request.tags.iter().map(String::as_str))
        {
            for token in source
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
            {
                tokens.insert(token.to_lowercase());
            }
        }
        Self(tokens)
    }

    /// Jaccard similarity against another signature, in [0, 1].
    #[must_use]
    pub fn jaccard(&self, other: &Self) -> f32 {
        if self.0.is_empty() || other.0.is_empty() {
            return 0.0;
        }
        let intersection = self.0.intersection(&other.0).count();
        let union = self.0.len() + other.0.len() - intersection;
        intersection as f32 / union as f32
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One cached generation result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The generated text.
    pub payload: String,
    /// What kind of content this is.
    pub kind: ContentKind,
    /// Similarity signature of the request that produced it.
    pub signature: Signature,
    /// How many lookups have reused this entry.
    pub reuse_count: u64,
    created_at: Instant,
    last_access: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(payload: String, kind: ContentKind, signature: Signature, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            payload,
            kind,
            signature,
            reuse_count: 0,
            created_at: now,
            last_access: now,
            ttl,
        }
    }

    /// Whether the entry has outlived its TTL.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    fn touch(&mut self) {
        self.last_access = Instant::now();
        self.reuse_count += 1;
    }
}

/// A similarity-path hit: the reused payload and its score.
#[derive(Debug, Clone)]
pub struct SimilarHit {
    /// Payload of the matching entry.
    pub payload: String,
    /// Jaccard score that cleared the threshold.
    pub score: f32,
}

// ---------------------------------------------------------------------------
// ContentCache
// ---------------------------------------------------------------------------

/// LRU-bounded store of generated content, keyed by fingerprint.
pub struct ContentCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    similarity_threshold: f32,
    ttl_location: Duration,
    ttl_route: Duration,
    ttl_npc: Duration,
    ttl_narrative: Duration,
    ttl_default: Duration,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("len", &self.len())
            .field("similarity_threshold", &self.similarity_threshold)
            .finish_non_exhaustive()
    }
}

impl ContentCache {
    /// Create a cache sized and tuned from config.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            similarity_threshold: config.similarity_threshold,
            ttl_location: Duration::from_secs(config.ttl_location_secs),
            ttl_route: Duration::from_secs(config.ttl_route_secs),
            ttl_npc: Duration::from_secs(config.ttl_npc_secs),
            ttl_narrative: Duration::from_secs(config.ttl_narrative_secs),
            ttl_default: Duration::from_secs(config.ttl_default_secs),
        }
    }

    /// TTL applied to entries of `kind`.
    #[must_use]
    pub fn ttl_for(&self, kind: ContentKind) -> Duration {
        match kind {
            ContentKind::Location => self.ttl_location,
            ContentKind::Route => self.ttl_route,
            ContentKind::NpcBio => self.ttl_npc,
            ContentKind::Narration => self.ttl_narrative,
            ContentKind::AmbientFlavor => self.ttl_default,
        }
    }

    /// Exact-match lookup. A stale entry counts as a miss and is dropped.
    pub fn get_exact(&self, fingerprint: &Fingerprint) -> Option<String> {
        let mut entries = self.entries.lock();
        let stale = match entries.get_mut(fingerprint.as_str()) {
            Some(entry) if !entry.is_stale() => {
                entry.touch();
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            entries.pop(fingerprint.as_str());
            debug!(fingerprint = %fingerprint, "stale cache entry dropped");
        }
        None
    }

    /// Exact-match lookup ignoring staleness and without bumping recency.
    /// Used when admission control refuses a regeneration and old content
    /// is better than none.
    pub fn get_stale(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.entries
            .lock()
            .peek(fingerprint.as_str())
            .map(|entry| entry.payload.clone())
    }

    /// Similarity fallback: best same-kind entry whose signature clears the
    /// threshold. The winning entry's reuse counter is bumped.
    pub fn find_similar(&self, signature: &Signature, kind: ContentKind) -> Option<SimilarHit> {
        let mut entries = self.entries.lock();
        let best = entries
            .iter()
            .filter(|(_, entry)| entry.kind == kind && !entry.is_stale())
            .map(|(key, entry)| (key.clone(), OrderedFloat(signature.jaccard(&entry.signature))))
            .max_by_key(|(_, score)| *score)?;

        let (key, OrderedFloat(score)) = best;
        if score < self.similarity_threshold {
            return None;
        }
        let entry = entries.get_mut(&key)?;
        entry.touch();
        Some(SimilarHit {
            payload: entry.payload.clone(),
            score,
        })
    }

    /// Insert a freshly generated payload. Past capacity, the LRU entry is
    /// evicted as part of the insert.
    pub fn insert(
        &self,
        fingerprint: Fingerprint,
        payload: String,
        kind: ContentKind,
        signature: Signature,
    ) {
        let ttl = self.ttl_for(kind);
        self.insert_with_ttl(fingerprint, payload, kind, signature, ttl);
    }

    /// Insert with an explicit TTL (tests tune this down to exercise
    /// staleness).
    pub fn insert_with_ttl(
        &self,
        fingerprint: Fingerprint,
        payload: String,
        kind: ContentKind,
        signature: Signature,
        ttl: Duration,
    ) {
        let entry = CacheEntry::new(payload, kind, signature, ttl);
        self.entries.lock().put(fingerprint.0, entry);
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
