//! Explicit command registry.
//!
//! Commands are registered by name against a polymorphic handler trait —
//! registration is explicit, never reflective. The core command surface
//! (`/move`, `/look`, `/world`, `/events`) lives here; embedders add their
//! own handlers through [`CommandRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use wyrld_core::error::Result;
use wyrld_core::lazy::LazyGenerator;
use wyrld_core::{EventKind, WorldError, WorldEvent};

use crate::session::Session;

// ---------------------------------------------------------------------------
// Handler trait & registry
// ---------------------------------------------------------------------------

/// Everything a command may touch while handling one input.
pub struct CommandContext<'a> {
    /// The locked session.
    pub session: &'a mut Session,
    /// The generation admission layer, for commands that need content.
    pub lazy: &'a LazyGenerator,
}

/// One command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle `args` (the input after the command word) and return the
    /// text shown to the player.
    async fn handle(&self, args: &[&str], ctx: &mut CommandContext<'_>) -> Result<String>;
}

/// Name → handler mapping.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    /// A registry with the built-in command surface installed.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("move", Arc::new(MoveCommand));
        registry.register("look", Arc::new(LookCommand));
        registry.register("who", Arc::new(WhoCommand));
        registry.register("world", Arc::new(WorldCommand));
        registry.register("events", Arc::new(EventsCommand));
        registry
    }

    /// Register (or replace) a handler under `name`, without the slash.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Registered command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch one slash input (e.g. `/move market`).
    ///
    /// # Errors
    /// Propagates handler failures; an unknown command is an answer, not
    /// an error.
    pub async fn dispatch(&self, input: &str, ctx: &mut CommandContext<'_>) -> Result<String> {
        let trimmed = input.trim_start_matches('/').trim();
        let mut parts = trimmed.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok("Say what you want to do, or try /look.".to_string());
        };
        let args: Vec<&str> = parts.collect();

        match self.handlers.get(name) {
            Some(handler) => {
                debug!(command = name, "dispatching");
                handler.handle(&args, ctx).await
            }
            None => Ok(format!(
                "Unknown command '/{name}'. Available: {}.",
                self.names()
                    .iter()
                    .map(|n| format!("/{n}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

/// `/move <target>` — travel along an exit of the current location.
struct MoveCommand;

#[async_trait]
impl CommandHandler for MoveCommand {
    async fn handle(&self, args: &[&str], ctx: &mut CommandContext<'_>) -> Result<String> {
        let Some(target) = args.first() else {
            return Ok("Move where? Try /look to see the exits.".to_string());
        };

        let here = ctx.session.actor_location.clone();
        let neighbors = ctx.session.map.get_neighbors(&here)?;
        let wanted = target.to_lowercase();
        let edge = neighbors.iter().find(|e| {
            e.to.as_str() == wanted
                || e.to.as_str().rsplit(':').next() == Some(wanted.as_str())
                || e.direction.to_lowercase().contains(&wanted)
        });
        let Some(edge) = edge else {
            return Ok(format!("There is no way toward '{target}' from here."));
        };

        // Walking into a stub forces materialization; a failed generation
        // is the user-visible "path unavailable" condition, and the node
        // stays untouched for a later retry.
        let destination = match ctx.session.map.materialize(&edge.to).await {
            Ok(node) => node,
            Err(WorldError::GenerationFailed(_)) => {
                return Ok(format!(
                    "The way {} is currently unavailable. Try again shortly.",
                    edge.direction
                ));
            }
            Err(other) => return Err(other),
        };

        ctx.session.set_actor_location(destination.id.clone())?;
        let region_id = ctx
            .session
            .world
            .region_of(&destination.id)
            .map(|r| r.id.clone());
        if let Some(region_id) = region_id {
            ctx.session.world.discover_region(&region_id)?;
        }
        ctx.session.world.persist()?;

        let event = WorldEvent {
            id: format!(
                "{}:step:{}:{}",
                ctx.session.id,
                ctx.session.world.clock().total_minutes(),
                destination.id
            ),
            kind: EventKind::NpcMove,
            summary: format!("You go {} and arrive at {}.", edge.direction, destination.name),
            affected: vec!["actor".to_string(), here.to_string(), destination.id.to_string()],
            at_minutes: ctx.session.world.clock().total_minutes(),
            caused_by: None,
        };
        ctx.session.log.append_batch(&[event])?;

        Ok(format!(
            "{}\n\n{}",
            edge.description, destination.description
        ))
    }
}

/// `/look` — describe the current location and its exits.
struct LookCommand;

#[async_trait]
impl CommandHandler for LookCommand {
    async fn handle(&self, _args: &[&str], ctx: &mut CommandContext<'_>) -> Result<String> {
        let here = ctx.session.actor_location.clone();
        let node = ctx.session.map.get_node(&here)?;

        let mut lines = vec![node.name.clone()];
        if node.description.is_empty() {
            lines.push("You can make out very little of this place yet.".to_string());
        } else {
            lines.push(node.description.clone());
        }

        if let Some(region) = ctx.session.world.region_of(&here) {
            lines.push(format!("The weather is {}.", region.weather));
        }

        let npcs: Vec<String> = ctx
            .session
            .world
            .data()
            .npcs
            .values()
            .filter(|n| n.alive && n.location == here)
            .map(|n| format!("{} ({})", n.name, n.activity))
            .collect();
        if !npcs.is_empty() {
            lines.push(format!("Here: {}.", npcs.join(", ")));
        }

        let exits = ctx.session.map.get_neighbors(&here)?;
        if exits.is_empty() {
            lines.push("There are no obvious ways out.".to_string());
        } else {
            let listed: Vec<String> = exits
                .iter()
                .map(|e| format!("{} ({})", e.direction, e.to))
                .collect();
            lines.push(format!("Exits: {}.", listed.join("; ")));
        }

        Ok(lines.join("\n"))
    }
}

/// `/who <npc>` — a short biography of a known NPC, cache-first through
/// the generation layer.
struct WhoCommand;

#[async_trait]
impl CommandHandler for WhoCommand {
    async fn handle(&self, args: &[&str], ctx: &mut CommandContext<'_>) -> Result<String> {
        let Some(wanted) = args.first() else {
            return Ok("Who? Give a name or id.".to_string());
        };
        let wanted = wanted.to_lowercase();

        let found = ctx
            .session
            .world
            .data()
            .npcs
            .values()
            .find(|n| n.id.as_str().to_lowercase() == wanted || n.name.to_lowercase() == wanted)
            .map(|n| (n.name.clone(), n.activity.clone(), n.location.clone()));
        let Some((name, activity, location)) = found else {
            return Ok(format!("Nobody called '{wanted}' is known here."));
        };

        let place = ctx
            .session
            .map
            .get_node(&location)
            .map(|n| n.name)
            .unwrap_or_else(|_| location.to_string());
        let request = wyrld_core::OracleRequest::new(
            wyrld_core::ContentKind::NpcBio,
            name.clone(),
            vec![place.clone()],
            Vec::new(),
        );
        match ctx.lazy.get_or_generate(&request).await {
            Ok(generated) => Ok(generated.text),
            Err(WorldError::GenerationFailed(_)) => {
                Ok(format!("{name} is at {place}, {activity}. Little else is known."))
            }
            Err(other) => Err(other),
        }
    }
}

/// `/world` — clock, crisis, and known regions.
struct WorldCommand;

#[async_trait]
impl CommandHandler for WorldCommand {
    async fn handle(&self, _args: &[&str], ctx: &mut CommandContext<'_>) -> Result<String> {
        let world = &ctx.session.world;
        let mut lines = vec![
            format!("It is {}.", world.clock()),
            format!("Crisis level: {}.", world.crisis()),
        ];
        for region in world.data().regions.values().filter(|r| r.discovered) {
            lines.push(format!(
                "{} — weather {}, risk {}",
                region.name, region.weather, region.risk
            ));
        }
        Ok(lines.join("\n"))
    }
}

/// `/events` — recent happenings.
struct EventsCommand;

#[async_trait]
impl CommandHandler for EventsCommand {
    async fn handle(&self, _args: &[&str], ctx: &mut CommandContext<'_>) -> Result<String> {
        Ok(ctx.session.log.recent_narrative(10))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NpcSeed, RootSeed, SessionSeed};
    use std::sync::Arc;
    use wyrld_core::config::CacheConfig;
    use wyrld_core::oracle::ScriptedOracle;
    use wyrld_core::store::{KvStore, MemoryKvStore};

    fn session_with(oracle: Arc<ScriptedOracle>) -> (Session, Arc<LazyGenerator>) {
        let lazy = Arc::new(LazyGenerator::new(oracle, &CacheConfig::default()));
        let seed = SessionSeed {
            session_id: "cmd-test".into(),
            root: RootSeed {
                id: "tavern_square".into(),
                name: "Tavern Square".into(),
                description: "Cobbles and chatter.".into(),
                tags: vec!["lowtown".into()],
                risk: 2,
            },
            sub_locations: vec!["Market".into()],
            npcs: vec![NpcSeed {
                id: "merchant_001".into(),
                name: "Marla".into(),
                location: "tavern_square".into(),
            }],
        };
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let session = Session::genesis(&seed, kv, lazy.clone()).expect("genesis");
        (session, lazy)
    }

    #[tokio::test]
    async fn move_materializes_and_relocates() {
        let oracle = Arc::new(ScriptedOracle::new());
        let (mut session, lazy) = session_with(oracle.clone());
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry.dispatch("/move market", &mut ctx).await.expect("move");
        assert!(out.contains("Market") || out.contains("market"));
        assert_eq!(
            session.actor_location.as_str(),
            "tavern_square:market"
        );
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn move_to_nowhere_is_friendly() {
        let oracle = Arc::new(ScriptedOracle::new());
        let (mut session, lazy) = session_with(oracle);
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry
            .dispatch("/move the_void", &mut ctx)
            .await
            .expect("answer");
        assert!(out.contains("no way toward"));
        assert_eq!(session.actor_location.as_str(), "tavern_square");
    }

    #[tokio::test]
    async fn move_into_failed_generation_reports_unavailable() {
        let oracle = Arc::new(ScriptedOracle::failing());
        let (mut session, lazy) = session_with(oracle);
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry.dispatch("/move market", &mut ctx).await.expect("answer");
        assert!(out.contains("currently unavailable"));
        // The actor did not move, and the node is still unmaterialized for
        // a later retry.
        assert_eq!(session.actor_location.as_str(), "tavern_square");
        let node = session
            .map
            .get_node(&wyrld_core::NodeId::from("tavern_square:market"))
            .expect("node");
        assert!(!node.materialized);
    }

    #[tokio::test]
    async fn look_lists_exits_and_npcs() {
        let oracle = Arc::new(ScriptedOracle::new());
        let (mut session, lazy) = session_with(oracle);
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry.dispatch("/look", &mut ctx).await.expect("look");
        assert!(out.contains("Tavern Square"));
        assert!(out.contains("Marla"));
        assert!(out.contains("Exits:"));
    }

    #[tokio::test]
    async fn who_generates_a_bio_once() {
        let oracle = Arc::new(ScriptedOracle::new());
        let (mut session, lazy) = session_with(oracle.clone());
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry.dispatch("/who marla", &mut ctx).await.expect("who");
        assert!(out.contains("Marla"));
        assert_eq!(oracle.calls(), 1);

        // Cache-first on repeat.
        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        registry.dispatch("/who merchant_001", &mut ctx).await.expect("who again");
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn who_degrades_without_oracle() {
        let oracle = Arc::new(ScriptedOracle::failing());
        let (mut session, lazy) = session_with(oracle);
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry.dispatch("/who marla", &mut ctx).await.expect("who");
        assert!(out.contains("Marla"));
        assert!(out.contains("Little else is known"));
    }

    #[tokio::test]
    async fn unknown_command_lists_options() {
        let oracle = Arc::new(ScriptedOracle::new());
        let (mut session, lazy) = session_with(oracle);
        let registry = CommandRegistry::with_builtins();

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry
            .dispatch("/dance", &mut ctx)
            .await
            .expect("answer");
        assert!(out.contains("Unknown command"));
        assert!(out.contains("/move"));
    }

    #[tokio::test]
    async fn custom_handlers_can_be_registered() {
        struct PingCommand;

        #[async_trait]
        impl CommandHandler for PingCommand {
            async fn handle(
                &self,
                _args: &[&str],
                _ctx: &mut CommandContext<'_>,
            ) -> Result<String> {
                Ok("pong".to_string())
            }
        }

        let oracle = Arc::new(ScriptedOracle::new());
        let (mut session, lazy) = session_with(oracle);
        let mut registry = CommandRegistry::with_builtins();
        registry.register("ping", Arc::new(PingCommand));

        let mut ctx = CommandContext {
            session: &mut session,
            lazy: &lazy,
        };
        let out = registry.dispatch("/ping", &mut ctx).await.expect("ping");
        assert_eq!(out, "pong");
    }
}
