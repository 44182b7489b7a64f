//! Append-only event log, keyed by session.
//!
//! Everything the simulator (and the rest of the system) emits lands here.
//! Events are never mutated after the fact; a tick's batch is appended as
//! one unit so the log always matches the mutations actually committed.
//! Retention/expiry belongs to the underlying store's TTL policy, not to
//! this module.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::KvStore;
use crate::types::SessionId;

/// How many events the in-memory narration ring keeps.
const MAX_RECENT: usize = 50;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What kind of thing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The global crisis level went up.
    CrisisEscalation,
    /// An agent changed location.
    NpcMove,
    /// Ambient color: weather omens, festivals, rumors.
    Ambient,
    /// A region's state (weather, risk) changed.
    RegionChange,
}

impl EventKind {
    /// Stable ordering priority inside one tick sub-step; lower sorts
    /// first. Required for reproducible output under identical seeds.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::CrisisEscalation => 0,
            Self::NpcMove => 1,
            Self::Ambient => 2,
            Self::RegionChange => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CrisisEscalation => "crisis_escalation",
            Self::NpcMove => "npc_move",
            Self::Ambient => "ambient",
            Self::RegionChange => "region_change",
        };
        write!(f, "{s}")
    }
}

/// One recorded world event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEvent {
    /// Deterministic id: `{session}:{tick}:{seq}`.
    pub id: String,
    /// Category.
    pub kind: EventKind,
    /// One-line summary, narration-ready.
    pub summary: String,
    /// Keys of the entities involved.
    pub affected: Vec<String>,
    /// In-world minute the event occurred.
    pub at_minutes: u64,
    /// Id of the event that caused this one, if any.
    pub caused_by: Option<String>,
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Per-session append-only log over the key-value store, with a small
/// in-memory ring for narration context.
pub struct EventLog {
    session: SessionId,
    kv: Arc<dyn KvStore>,
    recent: Mutex<VecDeque<WorldEvent>>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl EventLog {
    /// Create a log over a session's slice of the key-value store.
    #[must_use]
    pub fn new(session: SessionId, kv: Arc<dyn KvStore>) -> Self {
        Self {
            session,
            kv,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    fn log_key(&self) -> String {
        format!("wyrld:{}:events", self.session)
    }

    /// Append a batch of events as one logical unit.
    ///
    /// # Errors
    /// Propagates storage failures; on error nothing from the batch is
    /// recorded.
    pub fn append_batch(&self, events: &[WorldEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let raw = serde_json::to_string(events)?;
        self.kv.list_append(&self.log_key(), &raw)?;

        let mut recent = self.recent.lock();
        for event in events {
            recent.push_back(event.clone());
            while recent.len() > MAX_RECENT {
                recent.pop_front();
            }
        }
        Ok(())
    }

    /// Every event ever logged for this session, in order.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn all(&self) -> Result<Vec<WorldEvent>> {
        let mut out = Vec::new();
        for raw in self.kv.list_all(&self.log_key())? {
            let batch: Vec<WorldEvent> = serde_json::from_str(&raw)?;
            out.extend(batch);
        }
        Ok(out)
    }

    /// All events of one kind.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn by_kind(&self, kind: EventKind) -> Result<Vec<WorldEvent>> {
        Ok(self.all()?.into_iter().filter(|e| e.kind == kind).collect())
    }

    /// All events touching an entity key.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn by_entity(&self, entity: &str) -> Result<Vec<WorldEvent>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|e| e.affected.iter().any(|a| a == entity))
            .collect())
    }

    /// The most recent events, newest last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<WorldEvent> {
        let recent = self.recent.lock();
        recent
            .iter()
            .skip(recent.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    /// A compact narrative of recent happenings, used as oracle context
    /// and the `/events` command output.
    #[must_use]
    pub fn recent_narrative(&self, limit: usize) -> String {
        let events = self.recent(limit);
        if events.is_empty() {
            return "Nothing of note has happened lately.".to_string();
        }
        let mut lines = vec!["Recent happenings:".to_string()];
        for event in events {
            lines.push(format!("- [{}] {}", event.kind, event.summary));
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn event(id: &str, kind: EventKind, summary: &str) -> WorldEvent {
        WorldEvent {
            id: id.to_string(),
            kind,
            summary: summary.to_string(),
            affected: vec!["merchant_001".to_string()],
            at_minutes: 480,
            caused_by: None,
        }
    }

    fn log() -> EventLog {
        EventLog::new(SessionId::from("s1"), Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn batches_append_in_order() {
        let log = log();
        log.append_batch(&[
            event("s1:1:0", EventKind::NpcMove, "moved"),
            event("s1:1:1", EventKind::Ambient, "rain omens"),
        ])
        .expect("batch 1");
        log.append_batch(&[event("s1:2:0", EventKind::CrisisEscalation, "worse")])
            .expect("batch 2");

        let all = log.all().expect("all");
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s1:1:0", "s1:1:1", "s1:2:0"]);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let log = log();
        log.append_batch(&[]).expect("empty");
        assert!(log.all().expect("all").is_empty());
    }

    #[test]
    fn kind_and_entity_queries_filter() {
        let log = log();
        log.append_batch(&[
            event("s1:1:0", EventKind::NpcMove, "moved"),
            event("s1:1:1", EventKind::Ambient, "rain omens"),
        ])
        .expect("batch");

        assert_eq!(log.by_kind(EventKind::Ambient).expect("kind").len(), 1);
        assert_eq!(log.by_entity("merchant_001").expect("entity").len(), 2);
        assert!(log.by_entity("nobody").expect("entity").is_empty());
    }

    #[test]
    fn recent_ring_is_bounded() {
        let log = log();
        for i in 0..(MAX_RECENT + 10) {
            log.append_batch(&[event(
                &format!("s1:{i}:0"),
                EventKind::Ambient,
                "tick",
            )])
            .expect("append");
        }
        assert_eq!(log.recent(usize::MAX).len(), MAX_RECENT);

        let tail = log.recent(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[2].id, format!("s1:{}:0", MAX_RECENT + 9));
    }

    #[test]
    fn narrative_mentions_events() {
        let log = log();
        assert!(log.recent_narrative(5).contains("Nothing of note"));
        log.append_batch(&[event("s1:1:0", EventKind::NpcMove, "the merchant left")])
            .expect("append");
        assert!(log.recent_narrative(5).contains("the merchant left"));
    }

    #[test]
    fn priorities_order_crisis_first() {
        assert!(EventKind::CrisisEscalation.priority() < EventKind::NpcMove.priority());
        assert!(EventKind::NpcMove.priority() < EventKind::Ambient.priority());
        assert!(EventKind::Ambient.priority() < EventKind::RegionChange.priority());
    }
}
