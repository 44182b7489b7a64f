//! Error types for the wyrld simulation core.

use thiserror::Error;

use crate::oracle::OracleError;

/// Top-level error type for all simulation-core operations.
#[derive(Error, Debug)]
pub enum WorldError {
    /// A referenced entity has never been created, or the reference is stale.
    #[error("not found: {kind} '{id}'")]
    NotFound {
        /// What kind of entity was looked up (node, npc, quest, session).
        kind: &'static str,
        /// The key that failed to resolve.
        id: String,
    },

    /// A node creation referenced a parent that is missing or unmaterialized.
    #[error("parent not found or unmaterialized: '{0}'")]
    ParentNotFound(String),

    /// The content oracle failed or timed out. The requesting entity is left
    /// unchanged so the call can be retried later.
    #[error("generation failed: {0}")]
    GenerationFailed(#[from] OracleError),

    /// A tick could not complete; no mutations from it were persisted.
    #[error("tick failed: {0}")]
    TickFailed(String),

    /// The caller cancelled a tick between sub-steps. Sub-steps completed
    /// before the cancellation point remain committed.
    #[error("tick cancelled after {completed_substeps} sub-step(s)")]
    TickCancelled {
        /// How many sub-steps committed before cancellation.
        completed_substeps: u32,
    },

    /// The storage collaborator is unreachable. Fatal to the current
    /// operation, never silently retried by the core.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An entity state transition that the data model forbids.
    #[error("invalid transition for {kind} '{id}': {from} -> {to}")]
    InvalidTransition {
        /// What kind of entity.
        kind: &'static str,
        /// The key of the entity.
        id: String,
        /// State before.
        from: String,
        /// Rejected target state.
        to: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// SQLite adapter error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for WorldError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl WorldError {
    /// Shorthand for a [`WorldError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, WorldError>;
