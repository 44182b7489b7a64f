//! World tick simulator — advances a session's world by a duration and
//! produces a deterministic, ordered list of world events.
//!
//! A tick runs `IDLE -> ADVANCING_TIME -> PROCESSING_NPCS ->
//! EVALUATING_CRISIS -> EMITTING_EVENTS -> IDLE`, repeated per sub-step
//! when the requested duration exceeds the configured granularity so that
//! probability rolls scale with elapsed time instead of being evaluated
//! once against the whole span.
//!
//! The simulator owns no persistent state: it is a transformation over the
//! world state manager and map engine, committing through them as the last
//! step. Every probabilistic decision is seeded from
//! `(session, tick counter, sub-step, entity)`, so identical seeds and
//! identical starting state replay to identical event lists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::events::{EventKind, EventLog, WorldEvent};
use crate::lazy::LazyGenerator;
use crate::map::MapTopologyEngine;
use crate::oracle::{ContentKind, OracleRequest};
use crate::types::{CrisisLevel, DayPeriod, NpcId, Weather};
use crate::world::{WorldStateData, WorldStateManager};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// The per-sub-step stage sequence. Exposed for log readability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStage {
    /// Nothing running.
    Idle,
    /// Clock moves forward.
    AdvancingTime,
    /// Each registered NPC decides what, if anything, it does.
    ProcessingNpcs,
    /// Crisis escalation roll, ambient events, weather drift.
    EvaluatingCrisis,
    /// Ordering, id assignment, persistence.
    EmittingEvents,
}

// ---------------------------------------------------------------------------
// Pending events
// ---------------------------------------------------------------------------

/// Event collected during a tick, before ordering and id assignment.
struct PendingEvent {
    sub_step: u32,
    kind: EventKind,
    summary: String,
    affected: Vec<String>,
    at_minutes: u64,
    /// Link this event to the sub-step's crisis escalation, if one fired.
    caused_by_escalation: bool,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Tick driver for one deployment. Stateless between calls; safe to share.
pub struct WorldTickSimulator {
    config: SimulationConfig,
    lazy: Arc<LazyGenerator>,
}

impl std::fmt::Debug for WorldTickSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldTickSimulator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorldTickSimulator {
    /// Build a simulator.
    #[must_use]
    pub fn new(config: SimulationConfig, lazy: Arc<LazyGenerator>) -> Self {
        Self { config, lazy }
    }

    /// Advance the world by `minutes` (clamped to the configured maximum)
    /// and return the events produced, ordered by sub-step then stable
    /// event priority.
    ///
    /// The tick is transactional: on an unrecoverable failure all
    /// in-memory mutations are discarded, nothing is persisted, and
    /// [`WorldError::TickFailed`] is returned. A cancellation flag raised
    /// between sub-steps keeps completed sub-steps committed, drops the
    /// rest, and returns [`WorldError::TickCancelled`].
    ///
    /// # Errors
    /// [`WorldError::TickFailed`] and [`WorldError::TickCancelled`] as
    /// above. Oracle failures never fail a tick: an NPC move into an
    /// unmaterializable node is skipped, and ambient flavour falls back to
    /// canned text.
    pub async fn tick(
        &self,
        world: &mut WorldStateManager,
        map: &MapTopologyEngine,
        log: &EventLog,
        minutes: u64,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<WorldEvent>> {
        let minutes = minutes.min(self.config.max_tick_minutes);
        if minutes == 0 {
            return Ok(Vec::new());
        }

        let initial = world.snapshot_data();
        let tick = world.begin_tick();
        let session = world.session().clone();

        let mut chunks = Vec::new();
        let mut remaining = minutes;
        while remaining > 0 {
            let chunk = remaining.min(self.config.step_minutes);
            chunks.push(chunk);
            remaining -= chunk;
        }

        let mut pending: Vec<PendingEvent> = Vec::new();
        let mut committed: WorldStateData = world.snapshot_data();
        let mut committed_events = 0usize;
        let mut completed_substeps = 0u32;
        let mut cancelled = false;

        for (index, chunk) in chunks.iter().enumerate() {
            let sub_step = index as u32;
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                cancelled = true;
                break;
            }
            let scale = *chunk as f64 / self.config.step_minutes as f64;

            let result = self
                .run_substep(
                    world,
                    map,
                    &session,
                    tick,
                    sub_step,
                    *chunk,
                    scale,
                    &mut pending,
                )
                .await;
            if let Err(err) = result {
                warn!(session = %session, tick, sub_step, error = %err, "tick failed, discarding");
                world.restore_data(initial.clone());
                return Err(WorldError::TickFailed(err.to_string()));
            }

            committed = world.snapshot_data();
            committed_events = pending.len();
            completed_substeps += 1;
        }

        // EMITTING_EVENTS: order, assign ids, commit. On cancellation only
        // the completed sub-steps' mutations and events go out.
        debug!(session = %session, tick, stage = ?TickStage::EmittingEvents, "committing tick");
        if cancelled {
            world.restore_data(committed.clone());
            pending.truncate(committed_events);
        }

        let events = finalize_events(&session, tick, pending);
        let commit = world.persist().and_then(|()| log.append_batch(&events));
        if let Err(err) = commit {
            world.restore_data(initial);
            return Err(WorldError::TickFailed(err.to_string()));
        }

        if cancelled {
            return Err(WorldError::TickCancelled {
                completed_substeps,
            });
        }
        Ok(events)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_substep(
        &self,
        world: &mut WorldStateManager,
        map: &MapTopologyEngine,
        session: &crate::types::SessionId,
        tick: u64,
        sub_step: u32,
        chunk: u64,
        scale: f64,
        pending: &mut Vec<PendingEvent>,
    ) -> Result<()> {
        debug!(session = %session, tick, sub_step, stage = ?TickStage::AdvancingTime, minutes = chunk, "sub-step");
        world.advance_time(chunk);
        let now = world.clock().total_minutes();

        debug!(session = %session, tick, sub_step, stage = ?TickStage::ProcessingNpcs, "sub-step");
        self.process_npcs(world, map, session, tick, sub_step, scale, now, pending)
            .await?;

        debug!(session = %session, tick, sub_step, stage = ?TickStage::EvaluatingCrisis, "sub-step");
        self.evaluate_crisis(world, session, tick, sub_step, scale, now, pending);
        self.roll_ambient(world, session, tick, sub_step, scale, now, pending)
            .await;
        self.drift_weather(world, session, tick, sub_step, scale, now, pending);
        Ok(())
    }

    // ------------------------------------------------------------------
    // NPC processing
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn process_npcs(
        &self,
        world: &mut WorldStateManager,
        map: &MapTopologyEngine,
        session: &crate::types::SessionId,
        tick: u64,
        sub_step: u32,
        scale: f64,
        now: u64,
        pending: &mut Vec<PendingEvent>,
    ) -> Result<()> {
        // BTreeMap keys are already sorted; the order of decisions is part
        // of the replay contract.
        let npc_ids: Vec<NpcId> = world
            .data()
            .npcs
            .values()
            .filter(|n| n.alive)
            .map(|n| n.id.clone())
            .collect();

        for npc_id in npc_ids {
            let mut rng = decision_rng(&[
                session.as_str(),
                &tick.to_string(),
                &sub_step.to_string(),
                "npc",
                npc_id.as_str(),
            ]);

            if rng.r#gen::<f64>() >= self.config.npc_activity_chance * scale {
                continue;
            }

            let kind_roll: f64 = rng.r#gen();
            if kind_roll < self.config.npc_move_chance {
                self.try_move_npc(world, map, &npc_id, tick, now, sub_step, &mut rng, pending)
                    .await?;
            } else if kind_roll < self.config.npc_move_chance + self.config.npc_social_chance {
                socialize_npc(world, &npc_id, tick, &mut rng)?;
            } else {
                let activity = routine_activity(world.clock().period_of_day(), &mut rng);
                world.set_npc_activity(&npc_id, activity, tick)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_move_npc(
        &self,
        world: &mut WorldStateManager,
        map: &MapTopologyEngine,
        npc_id: &NpcId,
        tick: u64,
        now: u64,
        sub_step: u32,
        rng: &mut StdRng,
        pending: &mut Vec<PendingEvent>,
    ) -> Result<()> {
        let (from, npc_name) = {
            let npc = world.npc(npc_id)?;
            (npc.location.clone(), npc.name.clone())
        };

        let neighbors = match map.get_neighbors(&from) {
            Ok(neighbors) => neighbors,
            Err(WorldError::NotFound { .. }) => {
                warn!(npc = %npc_id, node = %from, "npc stands on an unknown node, staying put");
                return Ok(());
            }
            Err(other) => return Err(other),
        };
        if neighbors.is_empty() {
            return Ok(());
        }

        let edge = &neighbors[rng.gen_range(0..neighbors.len())];
        let target = edge.to.clone();

        // A destination that is only a stub must be materialized before
        // anything stands in it. A failed materialization skips the move
        // for this tick; it is not a tick failure.
        let target_node = match map.get_node(&target) {
            Ok(node) if node.materialized => node,
            Ok(_) => match map.materialize(&target).await {
                Ok(node) => node,
                Err(WorldError::GenerationFailed(err)) => {
                    debug!(npc = %npc_id, target = %target, error = %err, "move skipped, destination unmaterializable");
                    return Ok(());
                }
                Err(other) => return Err(other),
            },
            Err(WorldError::NotFound { .. }) => {
                warn!(npc = %npc_id, target = %target, "edge points at a missing node, staying put");
                return Ok(());
            }
            Err(other) => return Err(other),
        };

        let from_name = map
            .get_node(&from)
            .map(|n| n.name)
            .unwrap_or_else(|_| from.to_string());

        world.move_npc(npc_id, target.clone(), tick)?;
        pending.push(PendingEvent {
            sub_step,
            kind: EventKind::NpcMove,
            summary: format!("{npc_name} went from {from_name} to {}.", target_node.name),
            affected: vec![npc_id.to_string(), from.to_string(), target.to_string()],
            at_minutes: now,
            caused_by_escalation: false,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Crisis, ambient, weather
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn evaluate_crisis(
        &self,
        world: &mut WorldStateManager,
        session: &crate::types::SessionId,
        tick: u64,
        sub_step: u32,
        scale: f64,
        now: u64,
        pending: &mut Vec<PendingEvent>,
    ) {
        let crisis = world.crisis();
        if crisis == CrisisLevel::Critical {
            // Ceiling: escalating past CRITICAL has no further effect.
            return;
        }

        // Probability proportional to the current level and to the highest
        // risk among regions holding active NPCs/quests. De-escalation is
        // never rolled here; only quest resolution lowers the level.
        let risk = world.max_active_risk().fraction();
        let chance = self.config.crisis_escalation_base
            * f64::from(crisis.index() + 1)
            * risk
            * scale;

        let mut rng = decision_rng(&[
            session.as_str(),
            &tick.to_string(),
            &sub_step.to_string(),
            "crisis",
        ]);
        if rng.r#gen::<f64>() < chance {
            let level = world.escalate_crisis();
            pending.push(PendingEvent {
                sub_step,
                kind: EventKind::CrisisEscalation,
                summary: format!("The crisis deepens; the danger is now {level}."),
                affected: Vec::new(),
                at_minutes: now,
                caused_by_escalation: false,
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn roll_ambient(
        &self,
        world: &mut WorldStateManager,
        session: &crate::types::SessionId,
        tick: u64,
        sub_step: u32,
        scale: f64,
        now: u64,
        pending: &mut Vec<PendingEvent>,
    ) {
        let crisis = world.crisis();
        let chance = (self.config.ambient_base_chance
            + self.config.crisis_event_bonus * f64::from(crisis.index()))
            * scale;

        let mut rng = decision_rng(&[
            session.as_str(),
            &tick.to_string(),
            &sub_step.to_string(),
            "ambient",
        ]);
        if rng.r#gen::<f64>() >= chance {
            return;
        }

        let discovered: Vec<_> = world
            .data()
            .regions
            .values()
            .filter(|r| r.discovered)
            .map(|r| (r.id.clone(), r.name.clone()))
            .collect();
        if discovered.is_empty() {
            return;
        }
        let (region_id, region_name) = discovered[rng.gen_range(0..discovered.len())].clone();

        let template = pick_ambient_template(crisis, &mut rng);
        let request = OracleRequest::new(
            ContentKind::AmbientFlavor,
            template.name,
            vec![region_name.clone(), crisis.to_string()],
            vec![template.category.to_string()],
        );
        // Flavour text is optional content: a failed generation degrades to
        // the canned line, it never aborts the tick.
        let summary = match self.lazy.get_or_generate(&request).await {
            Ok(generated) => generated.text,
            Err(_) => format!("{} {}", region_name, template.fallback),
        };

        pending.push(PendingEvent {
            sub_step,
            kind: EventKind::Ambient,
            summary,
            affected: vec![region_id.to_string()],
            at_minutes: now,
            caused_by_escalation: true,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn drift_weather(
        &self,
        world: &mut WorldStateManager,
        session: &crate::types::SessionId,
        tick: u64,
        sub_step: u32,
        scale: f64,
        now: u64,
        pending: &mut Vec<PendingEvent>,
    ) {
        let crisis = world.crisis();
        let regions: Vec<_> = world
            .data()
            .regions
            .values()
            .filter(|r| r.discovered)
            .map(|r| (r.id.clone(), r.name.clone(), r.weather))
            .collect();

        for (region_id, region_name, current) in regions {
            let mut rng = decision_rng(&[
                session.as_str(),
                &tick.to_string(),
                &sub_step.to_string(),
                "weather",
                region_id.as_str(),
            ]);
            if rng.r#gen::<f64>() >= self.config.weather_shift_chance * scale {
                continue;
            }
            let next = pick_weather(crisis, &mut rng);
            if next == current {
                continue;
            }
            if world.set_region_weather(&region_id, next).is_err() {
                continue;
            }
            pending.push(PendingEvent {
                sub_step,
                kind: EventKind::RegionChange,
                summary: format!("The weather over {region_name} turns {next}."),
                affected: vec![region_id.to_string()],
                at_minutes: now,
                caused_by_escalation: false,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Decision seeding
// ---------------------------------------------------------------------------

/// Deterministic RNG for one decision, derived from its identifying parts.
/// No global random source anywhere in the simulator.
fn decision_rng(parts: &[&str]) -> StdRng {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_be_bytes(seed))
}

// ---------------------------------------------------------------------------
// NPC helpers
// ---------------------------------------------------------------------------

fn socialize_npc(
    world: &mut WorldStateManager,
    npc_id: &NpcId,
    tick: u64,
    rng: &mut StdRng,
) -> Result<()> {
    let nearby: Vec<NpcId> = world
        .npcs_colocated_with(npc_id)
        .into_iter()
        .map(|n| n.id.clone())
        .collect();
    if nearby.is_empty() {
        world.set_npc_activity(npc_id, "idle", tick)?;
        return Ok(());
    }
    let other = nearby[rng.gen_range(0..nearby.len())].clone();
    let delta = rng.gen_range(-5..=10);
    world.adjust_relationship(npc_id, &other, delta)?;
    world.set_npc_activity(npc_id, "socialising", tick)?;
    Ok(())
}

fn routine_activity(period: DayPeriod, rng: &mut StdRng) -> &'static str {
    let options: &[&'static str] = match period {
        DayPeriod::Dawn | DayPeriod::Morning => &["working", "gathering supplies", "patrolling"],
        DayPeriod::Midday | DayPeriod::Afternoon => &["working", "trading", "resting"],
        DayPeriod::Evening | DayPeriod::Night | DayPeriod::DeepNight => {
            &["resting", "swapping stories", "keeping watch"]
        }
    };
    options[rng.gen_range(0..options.len())]
}

// ---------------------------------------------------------------------------
// Ambient tables
// ---------------------------------------------------------------------------

struct AmbientTemplate {
    category: &'static str,
    name: &'static str,
    fallback: &'static str,
}

const NATURAL_EVENTS: &[AmbientTemplate] = &[
    AmbientTemplate {
        category: "natural",
        name: "sudden storm",
        fallback: "is lashed by a storm that came out of nowhere.",
    },
    AmbientTemplate {
        category: "natural",
        name: "quiet harvest",
        fallback: "enjoys an unremarkable, plentiful day.",
    },
    AmbientTemplate {
        category: "natural",
        name: "tremor",
        fallback: "shakes briefly; dust drifts from the eaves.",
    },
];

const SOCIAL_EVENTS: &[AmbientTemplate] = &[
    AmbientTemplate {
        category: "social",
        name: "festival night",
        fallback: "fills with lanterns and music.",
    },
    AmbientTemplate {
        category: "social",
        name: "rumors in the lanes",
        fallback: "hums with whispered rumors.",
    },
];

const MYSTICAL_EVENTS: &[AmbientTemplate] = &[
    AmbientTemplate {
        category: "mystical",
        name: "strange lights",
        fallback: "glimmers with lights that should not be there.",
    },
    AmbientTemplate {
        category: "mystical",
        name: "unquiet air",
        fallback: "feels wrong in a way no one can name.",
    },
];

const CRISIS_EVENTS: &[AmbientTemplate] = &[
    AmbientTemplate {
        category: "crisis",
        name: "grim tidings",
        fallback: "receives word that matters have worsened elsewhere.",
    },
    AmbientTemplate {
        category: "crisis",
        name: "a glimmer of hope",
        fallback: "hears a rumor that someone is fighting back.",
    },
];

/// Category weights shift with the crisis level: calm worlds lean natural
/// and social, strained worlds lean mystical and crisis-bound.
fn pick_ambient_template(crisis: CrisisLevel, rng: &mut StdRng) -> &'static AmbientTemplate {
    let idx = u32::from(crisis.index());
    let tables: [(&[AmbientTemplate], u32); 4] = [
        (NATURAL_EVENTS, 30_u32.saturating_sub(idx * 3).max(5)),
        (SOCIAL_EVENTS, 20),
        (MYSTICAL_EVENTS, 5 + idx * 2),
        (CRISIS_EVENTS, 5 + idx * 4),
    ];
    let total: u32 = tables.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total);
    for (table, weight) in tables {
        if roll < weight {
            return &table[rng.gen_range(0..table.len())];
        }
        roll -= weight;
    }
    &NATURAL_EVENTS[0]
}

fn pick_weather(crisis: CrisisLevel, rng: &mut StdRng) -> Weather {
    // Same order as Weather::ALL.
    let weights: [u32; 7] = if crisis >= CrisisLevel::High {
        [10, 15, 20, 15, 10, 5, 25]
    } else {
        [30, 25, 15, 5, 10, 5, 10]
    };
    let total: u32 = weights.iter().sum();
    let mut roll = rng.gen_range(0..total);
    for (weather, weight) in Weather::ALL.iter().zip(weights) {
        if roll < weight {
            return *weather;
        }
        roll -= weight;
    }
    Weather::Clear
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Order events by (sub-step, stable priority), assign deterministic ids,
/// and wire causal links to the sub-step's crisis escalation where marked.
fn finalize_events(
    session: &crate::types::SessionId,
    tick: u64,
    mut pending: Vec<PendingEvent>,
) -> Vec<WorldEvent> {
    pending.sort_by_key(|e| (e.sub_step, e.kind.priority()));

    let mut escalation_ids: Vec<(u32, String)> = Vec::new();
    let mut events = Vec::with_capacity(pending.len());
    for (seq, entry) in pending.into_iter().enumerate() {
        let id = format!("{session}:{tick}:{seq}");
        if entry.kind == EventKind::CrisisEscalation {
            escalation_ids.push((entry.sub_step, id.clone()));
        }
        let caused_by = if entry.caused_by_escalation {
            escalation_ids
                .iter()
                .find(|(s, _)| *s == entry.sub_step)
                .map(|(_, id)| id.clone())
        } else {
            None
        };
        events.push(WorldEvent {
            id,
            kind: entry.kind,
            summary: entry.summary,
            affected: entry.affected,
            at_minutes: entry.at_minutes,
            caused_by,
        });
    }
    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
