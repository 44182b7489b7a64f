//! # wyrld-runtime — Session Runtime for wyrld
//!
//! Wires the simulation core to the outside world. This crate owns the
//! two externally-invoked entry points:
//!
//! - [`Runtime::step`] — `step(session, raw_input) -> narrative text`
//!   (slash commands and free-text actions)
//! - [`Runtime::tick`] — `tick(session, minutes) -> events`
//!
//! plus session genesis, per-session single-writer locking, the explicit
//! command registry, and snapshot save/restore through the blob store.

pub mod commands;
pub mod runtime;
pub mod session;

pub use commands::{CommandContext, CommandHandler, CommandRegistry};
pub use runtime::Runtime;
pub use session::{NpcSeed, RootSeed, Session, SessionSeed, SessionSnapshot};

/// Install a `tracing` subscriber honoring `RUST_LOG` (defaults to `info`).
/// Call once at process start; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
