//! # wyrld-llm — Generation Oracle for wyrld
//!
//! The external text-generation collaborator behind `wyrld-core`'s
//! [`Oracle`](wyrld_core::Oracle) trait. Supports:
//!   - **Ollama** (local, recommended default)
//!   - **OpenAI-compatible API** (also works with Anthropic, Together, etc.)
//!   - **None** — every call fails, letting the core degrade to fallback
//!     text and cached content
//!
//! All oracle traffic goes through this crate, which owns:
//!   - prompt construction from structured requests (the core never sees
//!     prompt text)
//!   - timeout management per call
//!   - optional retry (the core itself never retries a generation)

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{OracleClient, OracleProvider};
pub use error::LlmError;
pub use types::{CompletionRequest, CompletionResponse};
