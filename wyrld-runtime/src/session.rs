//! Session genesis and snapshots.
//!
//! A [`SessionSeed`] describes a world's starting shape; genesis turns it
//! into live state (map nodes, region records, NPCs) and persists it.
//! Snapshots serialize the whole session — world state document plus map
//! dump — into one versioned JSON object in the blob store, so a save can
//! be restored into a fresh key-value namespace later.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use wyrld_core::error::Result;
use wyrld_core::lazy::LazyGenerator;
use wyrld_core::map::MapSnapshot;
use wyrld_core::store::{BlobStore, KvStore};
use wyrld_core::world::WorldStateData;
use wyrld_core::{
    EventLog, MapTopologyEngine, NodeId, NpcId, NpcState, RegionState, RiskLevel, SessionId,
    Weather, WorldError, WorldStateManager,
};

/// Current snapshot schema. Bump on breaking layout changes; loads accept
/// anything up to the current version.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Seeds
// ---------------------------------------------------------------------------

/// The root location a session starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootSeed {
    /// Stable node key, e.g. `tavern_square`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Authored description; genesis never calls the oracle.
    pub description: String,
    /// Genre/setting tags inherited by generated children.
    pub tags: Vec<String>,
    /// Region risk, 1-5.
    pub risk: u8,
}

/// One starting NPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcSeed {
    /// Stable key, e.g. `merchant_001`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Node the NPC starts on. Must exist after genesis.
    pub location: String,
}

/// Everything needed to boot a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSeed {
    /// Session key. Empty string means "generate one".
    #[serde(default)]
    pub session_id: String,
    /// The root location.
    pub root: RootSeed,
    /// Keywords for pre-created sub-locations of the root (unmaterialized;
    /// they generate on first need like everything else).
    #[serde(default)]
    pub sub_locations: Vec<String>,
    /// Starting NPCs.
    #[serde(default)]
    pub npcs: Vec<NpcSeed>,
}

// ---------------------------------------------------------------------------
// Live session
// ---------------------------------------------------------------------------

/// One live session: world state, map engine, event log, and the actor's
/// position. Mutated only under the runtime's per-session lock.
pub struct Session {
    /// Session key.
    pub id: SessionId,
    /// Canonical world state.
    pub world: WorldStateManager,
    /// Location graph.
    pub map: MapTopologyEngine,
    /// Append-only event log.
    pub log: EventLog,
    /// Where the (single) actor currently stands.
    pub actor_location: NodeId,
    kv: Arc<dyn KvStore>,
}

fn meta_key(session: &SessionId) -> String {
    format!("wyrld:{session}:meta")
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("actor_location", &self.actor_location)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Boot a fresh session from a seed: root node, region record,
    /// pre-declared sub-locations, NPCs. Fails if an NPC seed references a
    /// node that genesis did not create.
    pub fn genesis(
        seed: &SessionSeed,
        kv: Arc<dyn KvStore>,
        lazy: Arc<LazyGenerator>,
    ) -> Result<Self> {
        let session = SessionId::new(seed.session_id.clone());
        let map = MapTopologyEngine::new(session.clone(), kv.clone(), lazy);
        let log = EventLog::new(session.clone(), kv.clone());
        let mut world = WorldStateManager::load(session.clone(), kv.clone())?;

        let root_id = NodeId::new(seed.root.id.clone());
        let root = map.create_root(
            root_id.clone(),
            seed.root.name.clone(),
            Some(seed.root.description.clone()),
            seed.root.tags.clone(),
            RiskLevel::new(seed.root.risk),
            world.clock().total_minutes(),
        )?;

        for keyword in &seed.sub_locations {
            map.create_dynamic_sub_location(&root_id, keyword, world.clock().total_minutes())?;
        }

        world.upsert_region(RegionState {
            id: root.id.clone(),
            name: root.name.clone(),
            weather: Weather::Clear,
            risk: root.risk,
            discovered: true,
        });

        for npc in &seed.npcs {
            let location = NodeId::new(npc.location.clone());
            if !map.node_exists(&location)? {
                return Err(WorldError::not_found("node", location.as_str()));
            }
            world.register_npc(NpcState::new(
                NpcId::new(npc.id.clone()),
                npc.name.clone(),
                location,
            ));
        }

        kv.hash_set(&meta_key(&session), "actor_location", root_id.as_str())?;
        world.persist()?;
        info!(session = %session, npcs = seed.npcs.len(), "session created");

        Ok(Self {
            id: session,
            world,
            map,
            log,
            actor_location: root_id,
            kv,
        })
    }

    /// Reattach a session whose live state is already in the key-value
    /// store (process restart without going through a blob snapshot).
    pub fn resume(
        session_id: SessionId,
        kv: Arc<dyn KvStore>,
        lazy: Arc<LazyGenerator>,
    ) -> Result<Self> {
        let actor_location = kv
            .hash_get(&meta_key(&session_id), "actor_location")?
            .ok_or_else(|| WorldError::not_found("session", session_id.as_str()))?;
        let map = MapTopologyEngine::new(session_id.clone(), kv.clone(), lazy);
        let log = EventLog::new(session_id.clone(), kv.clone());
        let world = WorldStateManager::load(session_id.clone(), kv.clone())?;
        info!(session = %session_id, "session resumed");
        Ok(Self {
            id: session_id,
            world,
            map,
            log,
            actor_location: NodeId::new(actor_location),
            kv,
        })
    }

    /// Record the actor's new position in session metadata.
    pub fn set_actor_location(&mut self, location: NodeId) -> Result<()> {
        self.kv
            .hash_set(&meta_key(&self.id), "actor_location", location.as_str())?;
        self.actor_location = location;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One saved session: the full world state document and map dump,
/// versioned for forward-compatible loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Snapshot layout version.
    pub schema_version: u32,
    /// Wall-clock save time, RFC 3339.
    pub saved_at: String,
    /// Session key.
    pub session_id: String,
    /// Actor position.
    pub actor_location: String,
    /// World state document.
    pub world: WorldStateData,
    /// Map dump.
    pub map: MapSnapshot,
}

/// Where a session's snapshot lives in the blob store.
#[must_use]
pub fn snapshot_path(session: &SessionId) -> String {
    format!("sessions/{session}.json")
}

/// Serialize and store a session snapshot.
pub fn save_snapshot(blobs: &dyn BlobStore, session: &Session) -> Result<String> {
    let snapshot = SessionSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        saved_at: Utc::now().to_rfc3339(),
        session_id: session.id.to_string(),
        actor_location: session.actor_location.to_string(),
        world: session.world.snapshot_data(),
        map: session.map.export_snapshot()?,
    };
    let path = snapshot_path(&session.id);
    blobs.put_object(&path, &serde_json::to_value(&snapshot)?)?;
    info!(session = %session.id, path = %path, "session saved");
    Ok(path)
}

/// Load a snapshot and rebuild the session in (fresh) key-value state.
///
/// Rejects snapshots written by a newer schema than this build knows.
pub fn load_snapshot(
    blobs: &dyn BlobStore,
    session_id: &SessionId,
    kv: Arc<dyn KvStore>,
    lazy: Arc<LazyGenerator>,
) -> Result<Session> {
    let path = snapshot_path(session_id);
    let raw = blobs
        .get_object(&path)?
        .ok_or_else(|| WorldError::not_found("session snapshot", path.clone()))?;
    let snapshot: SessionSnapshot = serde_json::from_value(raw)?;
    if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(WorldError::Config(format!(
            "snapshot schema {} is newer than supported {}",
            snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
        )));
    }

    let map = MapTopologyEngine::new(session_id.clone(), kv.clone(), lazy);
    map.import_snapshot(&snapshot.map)?;

    let log = EventLog::new(session_id.clone(), kv.clone());
    let mut world = WorldStateManager::load(session_id.clone(), kv.clone())?;
    world.restore_data(snapshot.world);
    world.persist()?;
    kv.hash_set(
        &meta_key(session_id),
        "actor_location",
        &snapshot.actor_location,
    )?;

    info!(session = %session_id, saved_at = %snapshot.saved_at, "session restored");
    Ok(Session {
        id: session_id.clone(),
        world,
        map,
        log,
        actor_location: NodeId::new(snapshot.actor_location),
        kv,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
