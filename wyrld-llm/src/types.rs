//! Wire-level request/response types for the oracle client.

use serde::{Deserialize, Serialize};

/// A fully rendered completion request, ready for a backend.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// System prompt (narrator persona, constraints).
    pub system: String,
    /// User prompt (the concrete generation task).
    pub user: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

/// A completion from the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated, when the backend reports it.
    pub tokens_generated: u32,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Which model answered.
    pub model: String,
}
