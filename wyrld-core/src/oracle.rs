//! The content-generation oracle boundary.
//!
//! The core never speaks HTTP or builds prompts; it hands a structured
//! [`OracleRequest`] to whatever implements [`Oracle`] and gets text back.
//! `wyrld-llm` provides the production implementation. The core also never
//! retries a failed call — retry policy, if any, lives inside the
//! collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// What category of content a request asks for. Drives prompt selection,
/// cache TTLs, and fallback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// A location's descriptive text, generated at materialization.
    Location,
    /// The traversal description of an edge between two locations.
    Route,
    /// A non-player agent's short biography.
    NpcBio,
    /// Flavour text for an ambient world event.
    AmbientFlavor,
    /// Free-text action narration for the session's actor.
    Narration,
}

/// A structured generation request.
///
/// Fingerprints are derived from these fields — never from rendered prompt
/// text — so distinct callers asking for conceptually the same content
/// converge on the same cache key. Deliberately not session-scoped:
/// deduplication works across sessions of the same deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Content category.
    pub kind: ContentKind,
    /// The driving keyword (location keyword, event name, raw action text).
    pub keyword: String,
    /// Surrounding context, most specific last (e.g. a node's parent chain).
    pub context: Vec<String>,
    /// Genre/setting tags carried from the requesting entity.
    pub tags: Vec<String>,
}

impl OracleRequest {
    /// Build a request.
    #[must_use]
    pub fn new(
        kind: ContentKind,
        keyword: impl Into<String>,
        context: Vec<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            kind,
            keyword: keyword.into(),
            context,
            tags,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by an oracle implementation.
///
/// Clone-able so an in-flight failure can be fanned out to every caller
/// waiting on the same fingerprint.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    /// The oracle backend is unreachable or not configured.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its timeout. Surfaces as a failed generation,
    /// never a partial write.
    #[error("oracle timed out after {0}ms")]
    Timeout(u64),

    /// The oracle answered with something unusable.
    #[error("oracle response malformed: {0}")]
    Malformed(String),

    /// Admission control refused the call (rate limit) and no cached
    /// content could stand in.
    #[error("oracle call refused: {0}")]
    Refused(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The external text-generation collaborator.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Generate content for a structured request.
    ///
    /// # Errors
    /// Returns [`OracleError`] when the backend is unavailable, times out,
    /// or produces an unusable response.
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// Scripted oracle (tests, offline runs)
// ---------------------------------------------------------------------------

/// A canned oracle for tests and offline sessions: answers from a template,
/// counts invocations, and can be told to fail.
///
/// Invocation counting is what lets tests assert the cache's central
/// promise — that a second request for the same fingerprint never reaches
/// the oracle.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedOracle {
    /// An oracle that always answers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// An oracle that always fails with [`OracleError::Unavailable`].
    #[must_use]
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// How many times `generate` has been invoked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OracleError::Unavailable("scripted failure".into()));
        }
        Ok(format!(
            "[{:?}] {} ({})",
            request.kind,
            request.keyword,
            request.context.join(" / ")
        ))
    }
}
