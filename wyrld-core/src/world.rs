//! World state manager — the canonical session-scoped record of time,
//! crisis level, regions, NPCs, quests, and global flags.
//!
//! State lives in memory as [`WorldStateData`] and commits to the
//! key-value store as a single JSON document per session, so a commit is
//! one atomic logical unit. The simulator mutates through this manager
//! and decides when (or whether) to persist.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::store::KvStore;
use crate::types::{CrisisLevel, NodeId, NpcId, QuestId, RiskLevel, SessionId, Weather, WorldClock};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Per-region live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionState {
    /// Root node key of the region.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Current weather.
    pub weather: Weather,
    /// Danger rating; feeds crisis escalation probability.
    pub risk: RiskLevel,
    /// Whether the actor has been here.
    pub discovered: bool,
}

/// Per-NPC live state. The location reference always resolves to an
/// existing map node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcState {
    /// Stable key.
    pub id: NpcId,
    /// Display name.
    pub name: String,
    /// Current location node.
    pub location: NodeId,
    /// Where the NPC belongs when nothing else is going on.
    pub home: NodeId,
    /// Current goal/activity tag ("idle", "working", "keeping watch").
    pub activity: String,
    /// Dead NPCs stop simulating but keep their record.
    pub alive: bool,
    /// Standing toward other NPCs, -100..=100, keyed by NPC id.
    pub relationships: BTreeMap<String, i32>,
    /// Tick counter value when this NPC last changed.
    pub last_tick: u64,
}

impl NpcState {
    /// A fresh, idle NPC at `location`.
    #[must_use]
    pub fn new(id: NpcId, name: impl Into<String>, location: NodeId) -> Self {
        Self {
            id,
            name: name.into(),
            home: location.clone(),
            location,
            activity: "idle".to_string(),
            alive: true,
            relationships: BTreeMap::new(),
            last_tick: 0,
        }
    }
}

/// Quest lifecycle states. Transitions only move forward; `Failed` is
/// terminal from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    /// Offered to the actor, not yet taken.
    Offered,
    /// Taken and in progress.
    Accepted,
    /// Done. Resolution is the one path that may lower the crisis level.
    Completed,
    /// Dead end.
    Failed,
}

impl QuestStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Offered => 0,
            Self::Accepted => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }
}

/// One quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    /// Stable key.
    pub id: QuestId,
    /// Title.
    pub title: String,
    /// What it is about.
    pub description: String,
    /// Lifecycle state.
    pub status: QuestStatus,
    /// Region the quest is anchored to, if any.
    pub region: Option<NodeId>,
}

// ---------------------------------------------------------------------------
// Data document
// ---------------------------------------------------------------------------

/// The full serializable world state for one session. `BTreeMap`s keep
/// iteration (and therefore simulation) order deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldStateData {
    /// In-world clock.
    #[serde(default)]
    pub clock: WorldClock,
    /// Global crisis level.
    #[serde(default)]
    pub crisis: CrisisLevel,
    /// Count of ticks ever run against this session; seeds decisions.
    #[serde(default)]
    pub tick_counter: u64,
    /// Regions by root node key.
    #[serde(default)]
    pub regions: BTreeMap<String, RegionState>,
    /// NPCs by key.
    #[serde(default)]
    pub npcs: BTreeMap<String, NpcState>,
    /// Quests by key.
    #[serde(default)]
    pub quests: BTreeMap<String, Quest>,
    /// Global boolean story flags.
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owner of one session's world state.
pub struct WorldStateManager {
    session: SessionId,
    kv: Arc<dyn KvStore>,
    data: WorldStateData,
}

impl std::fmt::Debug for WorldStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStateManager")
            .field("session", &self.session)
            .field("clock", &self.data.clock)
            .field("crisis", &self.data.crisis)
            .finish_non_exhaustive()
    }
}

impl WorldStateManager {
    /// Load the session's state, or start fresh if none is stored.
    ///
    /// # Errors
    /// Propagates storage and deserialization failures.
    pub fn load(session: SessionId, kv: Arc<dyn KvStore>) -> Result<Self> {
        let key = state_key(&session);
        let data = match kv.get(&key)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => WorldStateData::default(),
        };
        Ok(Self { session, kv, data })
    }

    /// The session this manager owns.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Read access to the full state document.
    #[must_use]
    pub fn data(&self) -> &WorldStateData {
        &self.data
    }

    /// Clone the state document (tick rollback points).
    #[must_use]
    pub fn snapshot_data(&self) -> WorldStateData {
        self.data.clone()
    }

    /// Replace the state document wholesale (tick rollback, restore).
    pub fn restore_data(&mut self, data: WorldStateData) {
        self.data = data;
    }

    /// Commit the current state to storage as one atomic write.
    ///
    /// # Errors
    /// Propagates storage failures; in-memory state is untouched either way.
    pub fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.data)?;
        self.kv.set(&state_key(&self.session), &raw)?;
        debug!(session = %self.session, "world state persisted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clock & crisis
    // ------------------------------------------------------------------

    /// Current in-world clock.
    #[must_use]
    pub fn clock(&self) -> WorldClock {
        self.data.clock
    }

    /// Bump and return the session's tick counter. Part of the tick's
    /// mutable state: a rolled-back tick rolls this back too.
    pub fn begin_tick(&mut self) -> u64 {
        self.data.tick_counter += 1;
        self.data.tick_counter
    }

    /// Advance the in-world clock.
    pub fn advance_time(&mut self, minutes: u64) {
        self.data.clock.advance(minutes);
    }

    /// Current crisis level.
    #[must_use]
    pub fn crisis(&self) -> CrisisLevel {
        self.data.crisis
    }

    /// Raise the crisis one level. Returns the new level; at the ceiling
    /// this is a no-op that stays at [`CrisisLevel::Critical`].
    pub fn escalate_crisis(&mut self) -> CrisisLevel {
        let next = self.data.crisis.escalated();
        if next != self.data.crisis {
            info!(session = %self.session, from = %self.data.crisis, to = %next, "crisis escalated");
        }
        self.data.crisis = next;
        next
    }

    /// Explicit crisis reset, back to [`CrisisLevel::None`]. Exposed for
    /// external drivers; the simulator never calls this.
    pub fn reset_crisis(&mut self) {
        info!(session = %self.session, from = %self.data.crisis, "crisis reset");
        self.data.crisis = CrisisLevel::None;
    }

    // ------------------------------------------------------------------
    // Regions
    // ------------------------------------------------------------------

    /// Create or replace a region record.
    pub fn upsert_region(&mut self, region: RegionState) {
        self.data.regions.insert(region.id.to_string(), region);
    }

    /// Fetch a region.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown region.
    pub fn region(&self, id: &NodeId) -> Result<&RegionState> {
        self.data
            .regions
            .get(id.as_str())
            .ok_or_else(|| WorldError::not_found("region", id.as_str()))
    }

    /// Set a region's weather.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown region.
    pub fn set_region_weather(&mut self, id: &NodeId, weather: Weather) -> Result<()> {
        let region = self
            .data
            .regions
            .get_mut(id.as_str())
            .ok_or_else(|| WorldError::not_found("region", id.as_str()))?;
        region.weather = weather;
        Ok(())
    }

    /// Mark a region discovered.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown region.
    pub fn discover_region(&mut self, id: &NodeId) -> Result<()> {
        let region = self
            .data
            .regions
            .get_mut(id.as_str())
            .ok_or_else(|| WorldError::not_found("region", id.as_str()))?;
        region.discovered = true;
        Ok(())
    }

    /// The region a node belongs to: the root segment of its key.
    #[must_use]
    pub fn region_of(&self, node: &NodeId) -> Option<&RegionState> {
        let root = node.as_str().split(':').next().unwrap_or(node.as_str());
        self.data.regions.get(root)
    }

    /// Highest risk among regions holding live NPCs or non-terminal
    /// quests. This is what crisis escalation probability keys on.
    #[must_use]
    pub fn max_active_risk(&self) -> RiskLevel {
        let mut max_risk = RiskLevel::MIN;
        for npc in self.data.npcs.values().filter(|n| n.alive) {
            if let Some(region) = self.region_of(&npc.location) {
                max_risk = max_risk.max(region.risk);
            }
        }
        for quest in self
            .data
            .quests
            .values()
            .filter(|q| !q.status.is_terminal())
        {
            if let Some(region_id) = &quest.region {
                if let Some(region) = self.region_of(region_id) {
                    max_risk = max_risk.max(region.risk);
                }
            }
        }
        max_risk
    }

    // ------------------------------------------------------------------
    // NPCs
    // ------------------------------------------------------------------

    /// Register an NPC.
    pub fn register_npc(&mut self, npc: NpcState) {
        self.data.npcs.insert(npc.id.to_string(), npc);
    }

    /// Fetch an NPC.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown NPC.
    pub fn npc(&self, id: &NpcId) -> Result<&NpcState> {
        self.data
            .npcs
            .get(id.as_str())
            .ok_or_else(|| WorldError::not_found("npc", id.as_str()))
    }

    /// Move an NPC to a (caller-validated) destination node.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown NPC.
    pub fn move_npc(&mut self, id: &NpcId, destination: NodeId, tick: u64) -> Result<()> {
        let npc = self
            .data
            .npcs
            .get_mut(id.as_str())
            .ok_or_else(|| WorldError::not_found("npc", id.as_str()))?;
        npc.location = destination;
        npc.activity = "travelling".to_string();
        npc.last_tick = tick;
        Ok(())
    }

    /// Set an NPC's activity tag.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown NPC.
    pub fn set_npc_activity(&mut self, id: &NpcId, activity: &str, tick: u64) -> Result<()> {
        let npc = self
            .data
            .npcs
            .get_mut(id.as_str())
            .ok_or_else(|| WorldError::not_found("npc", id.as_str()))?;
        npc.activity = activity.to_string();
        npc.last_tick = tick;
        Ok(())
    }

    /// Nudge the standing between two NPCs, clamped to -100..=100.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown NPC.
    pub fn adjust_relationship(&mut self, id: &NpcId, other: &NpcId, delta: i32) -> Result<()> {
        let npc = self
            .data
            .npcs
            .get_mut(id.as_str())
            .ok_or_else(|| WorldError::not_found("npc", id.as_str()))?;
        let value = npc.relationships.entry(other.to_string()).or_insert(0);
        *value = (*value + delta).clamp(-100, 100);
        Ok(())
    }

    /// Live NPCs sharing a location with `id`, excluding itself.
    #[must_use]
    pub fn npcs_colocated_with(&self, id: &NpcId) -> Vec<&NpcState> {
        let Some(me) = self.data.npcs.get(id.as_str()) else {
            return Vec::new();
        };
        self.data
            .npcs
            .values()
            .filter(|n| n.alive && n.id != *id && n.location == me.location)
            .collect()
    }

    // ------------------------------------------------------------------
    // Quests
    // ------------------------------------------------------------------

    /// Register a quest.
    pub fn add_quest(&mut self, quest: Quest) {
        self.data.quests.insert(quest.id.to_string(), quest);
    }

    /// Fetch a quest.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown quest.
    pub fn quest(&self, id: &QuestId) -> Result<&Quest> {
        self.data
            .quests
            .get(id.as_str())
            .ok_or_else(|| WorldError::not_found("quest", id.as_str()))
    }

    /// Move a quest to a new status, enforcing the forward-only rules.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown quest,
    /// [`WorldError::InvalidTransition`] for a backwards or post-terminal
    /// transition.
    pub fn transition_quest(&mut self, id: &QuestId, status: QuestStatus) -> Result<()> {
        let quest = self
            .data
            .quests
            .get_mut(id.as_str())
            .ok_or_else(|| WorldError::not_found("quest", id.as_str()))?;
        if !quest.status.can_transition_to(status) {
            return Err(WorldError::InvalidTransition {
                kind: "quest",
                id: id.to_string(),
                from: format!("{:?}", quest.status),
                to: format!("{status:?}"),
            });
        }
        quest.status = status;
        Ok(())
    }

    /// Resolve a quest: mark it completed and lower the crisis one level.
    /// This is the only de-escalation path in the system.
    ///
    /// # Errors
    /// Same as [`transition_quest`](Self::transition_quest).
    pub fn resolve_quest(&mut self, id: &QuestId) -> Result<CrisisLevel> {
        self.transition_quest(id, QuestStatus::Completed)?;
        self.data.crisis = self.data.crisis.lowered();
        info!(session = %self.session, quest = %id, crisis = %self.data.crisis, "quest resolved");
        Ok(self.data.crisis)
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Set a global story flag.
    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.data.flags.insert(name.to_string(), value);
    }

    /// Read a global story flag (unset flags are false).
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.data.flags.get(name).copied().unwrap_or(false)
    }
}

fn state_key(session: &SessionId) -> String {
    format!("wyrld:{session}:world")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn manager() -> WorldStateManager {
        WorldStateManager::load(SessionId::from("s1"), Arc::new(MemoryKvStore::new()))
            .expect("load")
    }

    fn region(id: &str, risk: u8) -> RegionState {
        RegionState {
            id: NodeId::from(id),
            name: id.to_string(),
            weather: Weather::Clear,
            risk: RiskLevel::new(risk),
            discovered: true,
        }
    }

    #[test]
    fn persist_and_reload_roundtrip() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut world =
            WorldStateManager::load(SessionId::from("s1"), kv.clone()).expect("load");
        world.advance_time(90);
        world.escalate_crisis();
        world.register_npc(NpcState::new(
            NpcId::from("merchant_001"),
            "Marla",
            NodeId::from("tavern_square"),
        ));
        world.persist().expect("persist");

        let reloaded = WorldStateManager::load(SessionId::from("s1"), kv).expect("reload");
        assert_eq!(reloaded.data(), world.data());
    }

    #[test]
    fn crisis_is_monotonic_until_reset() {
        let mut world = manager();
        assert_eq!(world.crisis(), CrisisLevel::None);
        for _ in 0..6 {
            world.escalate_crisis();
        }
        assert_eq!(world.crisis(), CrisisLevel::Critical);
        world.reset_crisis();
        assert_eq!(world.crisis(), CrisisLevel::None);
    }

    #[test]
    fn quest_transitions_are_forward_only() {
        let mut world = manager();
        world.add_quest(Quest {
            id: QuestId::from("q1"),
            title: "Find the bell clapper".into(),
            description: "It went missing during the storm.".into(),
            status: QuestStatus::Offered,
            region: None,
        });

        world
            .transition_quest(&QuestId::from("q1"), QuestStatus::Accepted)
            .expect("accept");
        let err = world
            .transition_quest(&QuestId::from("q1"), QuestStatus::Offered)
            .expect_err("backwards");
        assert!(matches!(err, WorldError::InvalidTransition { .. }));

        world
            .transition_quest(&QuestId::from("q1"), QuestStatus::Completed)
            .expect("complete");
        let err = world
            .transition_quest(&QuestId::from("q1"), QuestStatus::Failed)
            .expect_err("terminal");
        assert!(matches!(err, WorldError::InvalidTransition { .. }));
    }

    #[test]
    fn failed_is_reachable_from_any_non_terminal() {
        assert!(QuestStatus::Offered.can_transition_to(QuestStatus::Failed));
        assert!(QuestStatus::Accepted.can_transition_to(QuestStatus::Failed));
        assert!(!QuestStatus::Failed.can_transition_to(QuestStatus::Accepted));
        assert!(!QuestStatus::Completed.can_transition_to(QuestStatus::Failed));
    }

    #[test]
    fn resolving_a_quest_lowers_crisis() {
        let mut world = manager();
        world.escalate_crisis();
        world.escalate_crisis();
        assert_eq!(world.crisis(), CrisisLevel::Medium);

        world.add_quest(Quest {
            id: QuestId::from("q1"),
            title: "Calm the harbor".into(),
            description: String::new(),
            status: QuestStatus::Accepted,
            region: None,
        });
        let level = world.resolve_quest(&QuestId::from("q1")).expect("resolve");
        assert_eq!(level, CrisisLevel::Low);
        assert_eq!(
            world.quest(&QuestId::from("q1")).expect("quest").status,
            QuestStatus::Completed
        );
    }

    #[test]
    fn max_active_risk_tracks_npcs_and_quests() {
        let mut world = manager();
        world.upsert_region(region("tavern_square", 2));
        world.upsert_region(region("blighted_marsh", 5));
        world.upsert_region(region("quiet_meadow", 1));

        // No NPCs or quests: floor.
        assert_eq!(world.max_active_risk(), RiskLevel::MIN);

        world.register_npc(NpcState::new(
            NpcId::from("merchant_001"),
            "Marla",
            NodeId::from("tavern_square:cellar"),
        ));
        assert_eq!(world.max_active_risk(), RiskLevel::new(2));

        world.add_quest(Quest {
            id: QuestId::from("q1"),
            title: "Into the marsh".into(),
            description: String::new(),
            status: QuestStatus::Accepted,
            region: Some(NodeId::from("blighted_marsh")),
        });
        assert_eq!(world.max_active_risk(), RiskLevel::new(5));

        // Terminal quests stop counting.
        world
            .transition_quest(&QuestId::from("q1"), QuestStatus::Failed)
            .expect("fail");
        assert_eq!(world.max_active_risk(), RiskLevel::new(2));
    }

    #[test]
    fn relationships_clamp() {
        let mut world = manager();
        world.register_npc(NpcState::new(
            NpcId::from("a"),
            "A",
            NodeId::from("tavern_square"),
        ));
        for _ in 0..30 {
            world
                .adjust_relationship(&NpcId::from("a"), &NpcId::from("b"), 10)
                .expect("adjust");
        }
        assert_eq!(
            world.npc(&NpcId::from("a")).expect("npc").relationships["b"],
            100
        );
    }

    #[test]
    fn colocated_excludes_self_and_dead() {
        let mut world = manager();
        world.register_npc(NpcState::new(
            NpcId::from("a"),
            "A",
            NodeId::from("tavern_square"),
        ));
        world.register_npc(NpcState::new(
            NpcId::from("b"),
            "B",
            NodeId::from("tavern_square"),
        ));
        let mut dead = NpcState::new(NpcId::from("c"), "C", NodeId::from("tavern_square"));
        dead.alive = false;
        world.register_npc(dead);

        let nearby = world.npcs_colocated_with(&NpcId::from("a"));
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, NpcId::from("b"));
    }
}
