//! Oracle client error types.

use thiserror::Error;
use wyrld_core::OracleError;

/// Errors that can occur while talking to an LLM backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("oracle request failed: {0}")]
    RequestFailed(String),

    /// Response body was not in the expected shape.
    #[error("failed to parse oracle response: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("oracle request timed out after {0}ms")]
    Timeout(u64),

    /// Backend is unreachable or not configured.
    #[error("oracle provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("all oracle retry attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The final failure.
        last_error: String,
    },

    /// Configuration error.
    #[error("oracle configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

// The core speaks its own, narrower taxonomy.
impl From<LlmError> for OracleError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(ms) => OracleError::Timeout(ms),
            LlmError::ParseError(msg) => OracleError::Malformed(msg),
            LlmError::Unavailable(msg)
            | LlmError::RequestFailed(msg)
            | LlmError::ConfigError(msg) => OracleError::Unavailable(msg),
            LlmError::RetriesExhausted {
                attempts,
                last_error,
            } => OracleError::Unavailable(format!(
                "gave up after {attempts} attempts: {last_error}"
            )),
        }
    }
}
