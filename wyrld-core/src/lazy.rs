//! Lazy generation strategy — the admission controller between every
//! caller that wants generated content and the oracle.
//!
//! Decision ladder for each request:
//!
//! 1. exact fingerprint hit → reuse, no oracle call
//! 2. similarity hit above threshold → reuse, re-index under the new
//!    fingerprint so future exact lookups also hit
//! 3. miss → one oracle call, result cached; failures are not cached and
//!    propagate without retry
//!
//! Concurrent requests for the same fingerprint collapse onto a single
//! in-flight oracle call; followers wait for the leader's outcome
//! (success or failure) instead of paying for their own.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::{ContentCache, Fingerprint, Signature};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::oracle::{Oracle, OracleError, OracleRequest};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Result of a [`LazyGenerator::get_or_generate`] call.
#[derive(Debug, Clone)]
pub struct Generated {
    /// The content text.
    pub text: String,
    /// Whether the text came from the cache (exact, similar, or a wait on
    /// another caller's in-flight generation) rather than a fresh oracle
    /// call paid for by this caller.
    pub from_cache: bool,
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Oracle call budget: at most `max_per_minute` calls in any rolling
/// minute, with a minimum spacing between consecutive calls.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: usize,
    min_interval: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(max_per_minute: usize, min_interval: Duration) -> Self {
        Self {
            max_per_minute,
            min_interval,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Whether a call may go out right now.
    #[must_use]
    pub fn can_call(&self) -> bool {
        let mut calls = self.calls.lock();
        let cutoff = Instant::now() - Duration::from_secs(60);
        while calls.front().is_some_and(|t| *t < cutoff) {
            calls.pop_front();
        }
        if calls.len() >= self.max_per_minute {
            return false;
        }
        if let Some(last) = calls.back() {
            if last.elapsed() < self.min_interval {
                return false;
            }
        }
        true
    }

    /// Record that a call went out.
    pub fn record(&self) {
        self.calls.lock().push_back(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters kept by the strategy. Cheap to read, shared across callers.
#[derive(Debug, Default)]
pub struct GenerationStats {
    exact_hits: AtomicU64,
    similar_hits: AtomicU64,
    flight_joins: AtomicU64,
    misses: AtomicU64,
    oracle_calls: AtomicU64,
    failures: AtomicU64,
    blocked: AtomicU64,
}

/// Point-in-time copy of [`GenerationStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    /// Exact fingerprint hits.
    pub exact_hits: u64,
    /// Similarity-path reuses.
    pub similar_hits: u64,
    /// Calls that waited on another caller's in-flight generation.
    pub flight_joins: u64,
    /// Misses that reached the oracle path.
    pub misses: u64,
    /// Oracle invocations actually made.
    pub oracle_calls: u64,
    /// Oracle invocations that failed.
    pub failures: u64,
    /// Calls refused by the rate limiter.
    pub blocked: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups served without an oracle call.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let reused = self.exact_hits + self.similar_hits + self.flight_joins;
        let total = reused + self.misses;
        if total == 0 {
            0.0
        } else {
            reused as f64 / total as f64
        }
    }
}

impl GenerationStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            similar_hits: self.similar_hits.load(Ordering::Relaxed),
            flight_joins: self.flight_joins.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oracle_calls: self.oracle_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// LazyGenerator
// ---------------------------------------------------------------------------

type FlightOutcome = std::result::Result<String, OracleError>;

/// The admission-control layer in front of the oracle.
pub struct LazyGenerator {
    cache: ContentCache,
    oracle: Arc<dyn Oracle>,
    limiter: RateLimiter,
    in_flight: Mutex<HashMap<String, broadcast::Sender<FlightOutcome>>>,
    reuse_similar: bool,
    stats: GenerationStats,
}

impl std::fmt::Debug for LazyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyGenerator")
            .field("cache", &self.cache)
            .field("reuse_similar", &self.reuse_similar)
            .finish_non_exhaustive()
    }
}

impl LazyGenerator {
    /// Build a strategy around an oracle, tuned from config.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>, config: &CacheConfig) -> Self {
        Self {
            cache: ContentCache::new(config),
            oracle,
            limiter: RateLimiter::new(
                config.max_calls_per_minute,
                Duration::from_millis(config.min_call_interval_ms),
            ),
            in_flight: Mutex::new(HashMap::new()),
            reuse_similar: config.reuse_similar,
            stats: GenerationStats::default(),
        }
    }

    /// The underlying content cache.
    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Return cached content for `request`, or generate it.
    ///
    /// # Errors
    /// Returns [`WorldError::GenerationFailed`] if the oracle fails, times
    /// out, or admission control refuses the call with nothing cached to
    /// fall back on. Failures are never cached.
    pub async fn get_or_generate(&self, request: &OracleRequest) -> Result<Generated> {
        let fingerprint = Fingerprint::of(request);

        if let Some(text) = self.cache.get_exact(&fingerprint) {
            self.stats.exact_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Generated {
                text,
                from_cache: true,
            });
        }

        let signature = Signature::of(request);
        if self.reuse_similar {
            if let Some(hit) = self.cache.find_similar(&signature, request.kind) {
                self.stats.similar_hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    fingerprint = %fingerprint,
                    score = hit.score,
                    "similar content reused"
                );
                // Re-index under the new fingerprint so the next identical
                // request hits the exact path.
                self.cache.insert(
                    fingerprint,
                    hit.payload.clone(),
                    request.kind,
                    signature,
                );
                return Ok(Generated {
                    text: hit.payload,
                    from_cache: true,
                });
            }
        }

        // Join an in-flight generation for this fingerprint, or become the
        // leader for it. Decide under the lock, release it by ending the
        // block, then await (for followers) with no guard held.
        enum Flight {
            Leader(broadcast::Sender<FlightOutcome>),
            Follower(broadcast::Receiver<FlightOutcome>),
        }
        let flight = {
            let mut in_flight = self.in_flight.lock();
            if let Some(tx) = in_flight.get(fingerprint.as_str()) {
                Flight::Follower(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                in_flight.insert(fingerprint.as_str().to_string(), tx.clone());
                Flight::Leader(tx)
            }
        };
        let sender = match flight {
            Flight::Follower(mut rx) => {
                self.stats.flight_joins.fetch_add(1, Ordering::Relaxed);
                return match rx.recv().await {
                    Ok(Ok(text)) => Ok(Generated {
                        text,
                        from_cache: true,
                    }),
                    Ok(Err(err)) => Err(WorldError::GenerationFailed(err)),
                    Err(_) => Err(WorldError::GenerationFailed(OracleError::Unavailable(
                        "in-flight generation abandoned".into(),
                    ))),
                };
            }
            Flight::Leader(tx) => tx,
        };

        // Leader path. A racer may have finished between our cache miss and
        // taking the flight slot, so look once more before paying.
        if let Some(text) = self.cache.get_exact(&fingerprint) {
            self.stats.exact_hits.fetch_add(1, Ordering::Relaxed);
            self.finish_flight(&fingerprint, &sender, Ok(text.clone()));
            return Ok(Generated {
                text,
                from_cache: true,
            });
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        if !self.limiter.can_call() {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
            if let Some(text) = self.cache.get_stale(&fingerprint) {
                warn!(fingerprint = %fingerprint, "rate limited, serving stale content");
                self.finish_flight(&fingerprint, &sender, Ok(text.clone()));
                return Ok(Generated {
                    text,
                    from_cache: true,
                });
            }
            let err = OracleError::Refused("oracle call rate limit reached".into());
            self.finish_flight(&fingerprint, &sender, Err(err.clone()));
            return Err(WorldError::GenerationFailed(err));
        }

        self.limiter.record();
        self.stats.oracle_calls.fetch_add(1, Ordering::Relaxed);

        match self.oracle.generate(request).await {
            Ok(text) => {
                self.cache
                    .insert(fingerprint.clone(), text.clone(), request.kind, signature);
                self.finish_flight(&fingerprint, &sender, Ok(text.clone()));
                Ok(Generated {
                    text,
                    from_cache: false,
                })
            }
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %fingerprint, error = %err, "generation failed");
                self.finish_flight(&fingerprint, &sender, Err(err.clone()));
                Err(WorldError::GenerationFailed(err))
            }
        }
    }

    /// Publish the outcome to followers and release the flight slot.
    /// Both happen under the table lock so a follower either finds the
    /// flight and gets the broadcast, or finds the cache already updated.
    fn finish_flight(
        &self,
        fingerprint: &Fingerprint,
        sender: &broadcast::Sender<FlightOutcome>,
        outcome: FlightOutcome,
    ) {
        let mut in_flight = self.in_flight.lock();
        in_flight.remove(fingerprint.as_str());
        let _ = sender.send(outcome);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{ContentKind, ScriptedOracle};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn request(keyword: &str) -> OracleRequest {
        OracleRequest::new(
            ContentKind::Location,
            keyword,
            vec!["harbor district".into()],
            vec!["nautical".into()],
        )
    }

    fn generator(oracle: Arc<dyn Oracle>) -> LazyGenerator {
        LazyGenerator::new(oracle, &CacheConfig::default())
    }

    #[tokio::test]
    async fn identical_fingerprint_generates_once() {
        let oracle = Arc::new(ScriptedOracle::new());
        let lazy = generator(oracle.clone());

        let first = lazy.get_or_generate(&request("salt warehouse")).await.expect("generate");
        assert!(!first.from_cache);

        let second = lazy.get_or_generate(&request("salt warehouse")).await.expect("cached");
        assert!(second.from_cache);
        assert_eq!(first.text, second.text);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn similar_request_reuses_and_reindexes() {
        let oracle = Arc::new(ScriptedOracle::new());
        let lazy = generator(oracle.clone());

        lazy.get_or_generate(&request("old salt warehouse"))
            .await
            .expect("generate");
        assert_eq!(oracle.calls(), 1);

        // Paraphrase of the same concept: high token overlap.
        let paraphrase = request("salt warehouse old");
        let reused = lazy.get_or_generate(&paraphrase).await.expect("similar");
        assert!(reused.from_cache);
        assert_eq!(oracle.calls(), 1);

        // Double-indexing: the paraphrase's own fingerprint now hits exactly.
        let again = lazy.get_or_generate(&paraphrase).await.expect("exact");
        assert!(again.from_cache);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn dissimilar_request_pays_for_generation() {
        let oracle = Arc::new(ScriptedOracle::new());
        let lazy = generator(oracle.clone());

        lazy.get_or_generate(&request("salt warehouse")).await.expect("a");
        lazy.get_or_generate(&request("crystal cavern")).await.expect("b");
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let oracle = Arc::new(ScriptedOracle::failing());
        let lazy = generator(oracle.clone());

        let req = request("salt warehouse");
        assert!(lazy.get_or_generate(&req).await.is_err());
        assert!(lazy.get_or_generate(&req).await.is_err());
        // Both calls reached the oracle: nothing was cached.
        assert_eq!(oracle.calls(), 2);
        assert!(lazy.cache().is_empty());
    }

    /// Oracle that parks until released, counting invocations.
    struct SlowOracle {
        calls: AtomicUsize,
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl Oracle for SlowOracle {
        async fn generate(&self, request: &OracleRequest) -> std::result::Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.map_err(|_| {
                OracleError::Unavailable("gate closed".into())
            })?;
            Ok(format!("slow: {}", request.keyword))
        }
    }

    #[tokio::test]
    async fn concurrent_same_fingerprint_invokes_oracle_once() {
        let oracle = Arc::new(SlowOracle {
            calls: AtomicUsize::new(0),
            gate: tokio::sync::Semaphore::new(0),
        });
        let lazy = Arc::new(generator(oracle.clone()));

        let a = {
            let lazy = Arc::clone(&lazy);
            tokio::spawn(async move { lazy.get_or_generate(&request("salt warehouse")).await })
        };
        // Let the leader take the flight slot before the follower arrives.
        tokio::task::yield_now().await;
        let b = {
            let lazy = Arc::clone(&lazy);
            tokio::spawn(async move { lazy.get_or_generate(&request("salt warehouse")).await })
        };
        tokio::task::yield_now().await;
        oracle.gate.add_permits(1);

        let (a, b) = (a.await.expect("join"), b.await.expect("join"));
        let a = a.expect("leader result");
        let b = b.expect("follower result");
        assert_eq!(a.text, b.text);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert!(a.from_cache != b.from_cache, "exactly one caller paid");
    }

    #[tokio::test]
    async fn rate_limit_blocks_without_fallback() {
        let oracle = Arc::new(ScriptedOracle::new());
        let config = CacheConfig {
            max_calls_per_minute: 1,
            min_call_interval_ms: 60_000,
            ..CacheConfig::default()
        };
        let lazy = LazyGenerator::new(oracle.clone(), &config);

        lazy.get_or_generate(&request("salt warehouse")).await.expect("first");
        let err = lazy
            .get_or_generate(&request("crystal cavern"))
            .await
            .expect_err("second should be refused");
        assert!(matches!(err, WorldError::GenerationFailed(_)));
        assert_eq!(oracle.calls(), 1);
        assert_eq!(lazy.stats().blocked, 1);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let oracle = Arc::new(ScriptedOracle::new());
        let lazy = generator(oracle);

        lazy.get_or_generate(&request("salt warehouse")).await.expect("miss");
        lazy.get_or_generate(&request("salt warehouse")).await.expect("hit");

        let stats = lazy.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.exact_hits, 1);
        assert_eq!(stats.oracle_calls, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
