//! The runtime — session table, per-session single-writer locking, and
//! the two external entry points (`step`, `tick`).
//!
//! All collaborators are constructed once at process start and passed in
//! by reference: no hidden global handles. Sessions run fully in parallel;
//! the only cross-session state is the content cache inside the shared
//! [`LazyGenerator`].

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use wyrld_core::error::Result;
use wyrld_core::lazy::{LazyGenerator, StatsSnapshot};
use wyrld_core::store::{BlobStore, KvStore};
use wyrld_core::{
    ContentKind, Oracle, OracleRequest, SessionId, WorldError, WorldEvent, WorldTickSimulator,
    WyrldConfig,
};

use crate::commands::{CommandContext, CommandHandler, CommandRegistry};
use crate::session::{self, Session, SessionSeed};

/// The top-level runtime owning every live session of this process.
pub struct Runtime {
    kv: Arc<dyn KvStore>,
    blobs: Arc<dyn BlobStore>,
    lazy: Arc<LazyGenerator>,
    simulator: WorldTickSimulator,
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    commands: CommandRegistry,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("sessions", &self.sessions.len())
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Assemble a runtime from its collaborators.
    #[must_use]
    pub fn new(
        config: &WyrldConfig,
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        let lazy = Arc::new(LazyGenerator::new(oracle, &config.cache));
        let simulator = WorldTickSimulator::new(config.simulation.clone(), lazy.clone());
        Self {
            kv,
            blobs,
            lazy,
            simulator,
            sessions: DashMap::new(),
            commands: CommandRegistry::with_builtins(),
        }
    }

    /// Assemble a runtime with the HTTP oracle selected by the config's
    /// `[oracle]` section.
    pub fn from_config(
        config: &WyrldConfig,
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        let oracle = wyrld_llm::OracleClient::from_config(&config.oracle)
            .map_err(|e| WorldError::Config(e.to_string()))?;
        Ok(Self::new(config, kv, blobs, Arc::new(oracle)))
    }

    /// Register an extra command handler (explicit, name without slash).
    pub fn register_command(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.commands.register(name, handler);
    }

    /// Admission-control counters for the shared content cache.
    #[must_use]
    pub fn generation_stats(&self) -> StatsSnapshot {
        self.lazy.stats()
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Boot a new session from a seed and return its id. A seed without a
    /// `session_id` gets a generated one.
    pub fn create_session(&self, mut seed: SessionSeed) -> Result<SessionId> {
        if seed.session_id.is_empty() {
            seed.session_id = format!("session-{}", Uuid::new_v4());
        }
        if self.sessions.contains_key(&seed.session_id) {
            return Err(WorldError::Config(format!(
                "session '{}' already exists",
                seed.session_id
            )));
        }
        let session = Session::genesis(&seed, self.kv.clone(), self.lazy.clone())?;
        let id = session.id.clone();
        self.sessions
            .insert(id.to_string(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Snapshot a session into the blob store; returns the object path.
    pub async fn save_session(&self, session_id: &SessionId) -> Result<String> {
        let lock = self.session_lock(session_id)?;
        let session = lock.lock().await;
        session::save_snapshot(self.blobs.as_ref(), &session)
    }

    /// Reattach a session whose live state already sits in the key-value
    /// store (e.g. after a process restart), without reading a snapshot.
    pub fn resume_session(&self, session_id: &SessionId) -> Result<()> {
        let session = Session::resume(session_id.clone(), self.kv.clone(), self.lazy.clone())?;
        self.sessions
            .insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        info!(session = %session_id, "session resumed");
        Ok(())
    }

    /// Restore a session from its snapshot and attach it to this runtime.
    pub fn load_session(&self, session_id: &SessionId) -> Result<()> {
        let session = session::load_snapshot(
            self.blobs.as_ref(),
            session_id,
            self.kv.clone(),
            self.lazy.clone(),
        )?;
        self.sessions
            .insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        info!(session = %session_id, "session attached");
        Ok(())
    }

    fn session_lock(&self, session_id: &SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .get(session_id.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorldError::not_found("session", session_id.as_str()))
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Handle one player input: slash commands go through the registry,
    /// anything else becomes oracle-narrated action text (cache-first,
    /// canned fallback when the oracle is down).
    pub async fn step(&self, session_id: &SessionId, raw_input: &str) -> Result<String> {
        let lock = self.session_lock(session_id)?;
        let mut session = lock.lock().await;

        let input = raw_input.trim();
        if input.is_empty() {
            return Ok("Silence. The world waits.".to_string());
        }

        if input.starts_with('/') {
            let mut ctx = CommandContext {
                session: &mut session,
                lazy: self.lazy.as_ref(),
            };
            return self.commands.dispatch(input, &mut ctx).await;
        }

        self.narrate_action(&mut session, input).await
    }

    /// Advance a session's world by `minutes`. Ticks of one session are
    /// strictly sequential (the session lock is held for the whole tick);
    /// different sessions tick in parallel.
    pub async fn tick(&self, session_id: &SessionId, minutes: u64) -> Result<Vec<WorldEvent>> {
        self.tick_cancellable(session_id, minutes, None).await
    }

    /// [`tick`](Self::tick) with a caller-owned cancellation flag, checked
    /// between sub-steps.
    pub async fn tick_cancellable(
        &self,
        session_id: &SessionId,
        minutes: u64,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<WorldEvent>> {
        let lock = self.session_lock(session_id)?;
        let mut session = lock.lock().await;
        let Session {
            ref mut world,
            ref map,
            ref log,
            ..
        } = *session;
        self.simulator.tick(world, map, log, minutes, cancel).await
    }

    async fn narrate_action(&self, session: &mut Session, input: &str) -> Result<String> {
        let node = session.map.get_node(&session.actor_location)?;
        let request = OracleRequest::new(
            ContentKind::Narration,
            input,
            vec![
                node.name.clone(),
                session.world.clock().period_of_day().to_string(),
                format!("crisis {}", session.world.crisis()),
            ],
            node.tags,
        );
        match self.lazy.get_or_generate(&request).await {
            Ok(generated) => Ok(generated.text),
            Err(WorldError::GenerationFailed(_)) => Ok(format!(
                "You {input}. Nothing remarkable comes of it, for now.",
            )),
            Err(other) => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
