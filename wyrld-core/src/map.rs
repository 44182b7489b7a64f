//! Map topology engine — the mutable, lazily-expanded location graph.
//!
//! Nodes are created as stubs on first reference and *materialized*
//! (description generated) only when something actually needs them.
//! Parent links are tree-shaped to bound generation fan-out; edges form a
//! general directed graph, symmetric by default so the world stays
//! navigable in both directions.
//!
//! The engine itself imposes no depth limit on dynamic expansion — every
//! generation call is charged against the lazy generation strategy, which
//! is the actual throttle. Its one structural defense is deterministic
//! child-id derivation, which makes re-exploration idempotent instead of
//! fanning out duplicates.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::lazy::LazyGenerator;
use crate::oracle::{ContentKind, OracleRequest};
use crate::store::KvStore;
use crate::types::{NodeId, RiskLevel, SessionId};
use crate::WorldError;

/// Parent chains longer than this are treated as corrupt data rather than
/// walked forever.
const MAX_ANCESTRY_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One location in the world graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    /// Stable key.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Generated description; empty until materialized.
    pub description: String,
    /// Parent in the generation tree. Root nodes have none.
    pub parent: Option<NodeId>,
    /// Generation hints carried into child nodes and oracle requests.
    pub tags: Vec<String>,
    /// Danger rating of the location.
    pub risk: RiskLevel,
    /// In-world minute the node was first referenced.
    pub created_at_minutes: u64,
    /// Whether description content has been generated.
    pub materialized: bool,
}

/// One directed traversal between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    /// Source node.
    pub from: NodeId,
    /// Destination node.
    pub to: NodeId,
    /// Direction label shown to the actor ("north", "down the stairwell").
    pub direction: String,
    /// Short traversal description.
    pub description: String,
    /// When true, no reverse edge was created alongside this one.
    pub one_way: bool,
}

/// Named route data attached to a pair of edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConcept {
    /// Direction label for the forward edge.
    pub direction: String,
    /// Direction label for the reverse edge.
    pub reverse_direction: String,
    /// Traversal description shared by both edges.
    pub description: String,
}

impl RouteConcept {
    /// The fallback concept used when route generation is unavailable.
    #[must_use]
    pub fn plain(direction: impl Into<String>, reverse: impl Into<String>) -> Self {
        Self {
            direction: direction.into(),
            reverse_direction: reverse.into(),
            description: "A long, unremarkable way between the two.".to_string(),
        }
    }
}

/// Serializable dump of a session's graph, used by session snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// Every node, in creation order.
    pub nodes: Vec<MapNode>,
    /// Adjacency lists per source node, insertion-ordered.
    pub edges: Vec<(NodeId, Vec<MapEdge>)>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owner of the location graph for one session.
pub struct MapTopologyEngine {
    session: SessionId,
    kv: Arc<dyn KvStore>,
    lazy: Arc<LazyGenerator>,
}

impl std::fmt::Debug for MapTopologyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapTopologyEngine")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl MapTopologyEngine {
    /// Create an engine over a session's slice of the key-value store.
    #[must_use]
    pub fn new(session: SessionId, kv: Arc<dyn KvStore>, lazy: Arc<LazyGenerator>) -> Self {
        Self { session, kv, lazy }
    }

    fn node_key(&self, id: &NodeId) -> String {
        format!("wyrld:{}:map:node:{}", self.session, id)
    }

    fn edges_key(&self, id: &NodeId) -> String {
        format!("wyrld:{}:map:edges:{}", self.session, id)
    }

    fn index_key(&self) -> String {
        format!("wyrld:{}:map:index", self.session)
    }

    // ------------------------------------------------------------------
    // Node CRUD
    // ------------------------------------------------------------------

    /// Fetch a node.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] if the node has never been created.
    pub fn get_node(&self, id: &NodeId) -> Result<MapNode> {
        match self.kv.get(&self.node_key(id))? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(WorldError::not_found("node", id.as_str())),
        }
    }

    /// Whether a node record exists.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn node_exists(&self, id: &NodeId) -> Result<bool> {
        self.kv.exists(&self.node_key(id))
    }

    fn put_node(&self, node: &MapNode) -> Result<()> {
        let raw = serde_json::to_string(node)?;
        self.kv.set(&self.node_key(&node.id), &raw)
    }

    /// Outbound edges of a node, in insertion order. Empty for a node with
    /// no exits; an error only if the node itself has never been created.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown node.
    pub fn get_neighbors(&self, id: &NodeId) -> Result<Vec<MapEdge>> {
        if !self.node_exists(id)? {
            return Err(WorldError::not_found("node", id.as_str()));
        }
        let mut edges = Vec::new();
        for raw in self.kv.list_all(&self.edges_key(id))? {
            edges.push(serde_json::from_str(&raw)?);
        }
        Ok(edges)
    }

    /// Every node id ever created in this session, in creation order.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn node_ids(&self) -> Result<Vec<NodeId>> {
        Ok(self
            .kv
            .list_all(&self.index_key())?
            .into_iter()
            .map(NodeId::new)
            .collect())
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a root node. Idempotent: an existing record is returned
    /// untouched.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn create_root(
        &self,
        id: NodeId,
        name: impl Into<String>,
        description: Option<String>,
        tags: Vec<String>,
        risk: RiskLevel,
        created_at_minutes: u64,
    ) -> Result<MapNode> {
        if self.node_exists(&id)? {
            return self.get_node(&id);
        }
        let materialized = description.is_some();
        let node = MapNode {
            id: id.clone(),
            name: name.into(),
            description: description.unwrap_or_default(),
            parent: None,
            tags,
            risk,
            created_at_minutes,
            materialized,
        };
        self.put_node(&node)?;
        self.kv.list_append(&self.index_key(), id.as_str())?;
        info!(session = %self.session, node = %id, "root node created");
        Ok(node)
    }

    /// Create (or return) the sub-location of `parent` named by `keyword`.
    ///
    /// The child id is derived deterministically from `(parent, keyword)`,
    /// so repeated calls with identical inputs converge on one record —
    /// the primary defense against redundant generation triggered by
    /// re-exploration. The child starts unmaterialized, inheriting the
    /// parent's tags and risk, and is linked to the parent in both
    /// directions.
    ///
    /// # Errors
    /// [`WorldError::ParentNotFound`] if the parent is missing or not yet
    /// materialized.
    pub fn create_dynamic_sub_location(
        &self,
        parent_id: &NodeId,
        keyword: &str,
        created_at_minutes: u64,
    ) -> Result<MapNode> {
        let parent = match self.get_node(parent_id) {
            Ok(node) if node.materialized => node,
            Ok(_) => return Err(WorldError::ParentNotFound(parent_id.to_string())),
            Err(WorldError::NotFound { .. }) => {
                return Err(WorldError::ParentNotFound(parent_id.to_string()));
            }
            Err(other) => return Err(other),
        };

        let slug = slugify(keyword);
        let child_id = NodeId::new(format!("{parent_id}:{slug}"));
        if self.node_exists(&child_id)? {
            return self.get_node(&child_id);
        }

        let child = MapNode {
            id: child_id.clone(),
            name: title_case(keyword),
            description: String::new(),
            parent: Some(parent_id.clone()),
            tags: parent.tags.clone(),
            risk: parent.risk,
            created_at_minutes,
            materialized: false,
        };
        self.put_node(&child)?;
        self.kv.list_append(&self.index_key(), child_id.as_str())?;

        let route = RouteConcept {
            direction: format!("toward the {}", child.name.to_lowercase()),
            reverse_direction: format!("back to {}", parent.name),
            description: format!("A narrow way leads toward the {}.", child.name.to_lowercase()),
        };
        self.connect_nodes(parent_id, &child_id, &route, false)?;

        debug!(session = %self.session, parent = %parent_id, child = %child_id, "sub-location created");
        Ok(child)
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Link two nodes. Symmetric by default; pass `one_way` to suppress
    /// the reverse edge. A destination referenced before it exists gets a
    /// stub record so edge endpoints always resolve.
    ///
    /// An edge that already exists between the pair is left untouched.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] if the source node has never been created.
    pub fn connect_nodes(
        &self,
        from: &NodeId,
        to: &NodeId,
        route: &RouteConcept,
        one_way: bool,
    ) -> Result<()> {
        let from_node = self.get_node(from)?;
        if !self.node_exists(to)? {
            // Lazily created endpoint: a stub that materialization fills in.
            let stub = MapNode {
                id: to.clone(),
                name: title_case(to.as_str().rsplit(':').next().unwrap_or(to.as_str())),
                description: String::new(),
                parent: None,
                tags: from_node.tags.clone(),
                risk: from_node.risk,
                created_at_minutes: from_node.created_at_minutes,
                materialized: false,
            };
            self.put_node(&stub)?;
            self.kv.list_append(&self.index_key(), to.as_str())?;
        }

        if self.has_edge(from, to)? {
            return Ok(());
        }

        let forward = MapEdge {
            from: from.clone(),
            to: to.clone(),
            direction: route.direction.clone(),
            description: route.description.clone(),
            one_way,
        };
        self.kv
            .list_append(&self.edges_key(from), &serde_json::to_string(&forward)?)?;

        if !one_way && !self.has_edge(to, from)? {
            let reverse = MapEdge {
                from: to.clone(),
                to: from.clone(),
                direction: route.reverse_direction.clone(),
                description: route.description.clone(),
                one_way: false,
            };
            self.kv
                .list_append(&self.edges_key(to), &serde_json::to_string(&reverse)?)?;
        }
        Ok(())
    }

    fn has_edge(&self, from: &NodeId, to: &NodeId) -> Result<bool> {
        for raw in self.kv.list_all(&self.edges_key(from))? {
            let edge: MapEdge = serde_json::from_str(&raw)?;
            if &edge.to == to {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Link two nodes with an oracle-described route, falling back to a
    /// plain concept when generation is unavailable. Cache-first: the same
    /// pair of location names anywhere in the deployment reuses one
    /// description.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] if the source node has never been created.
    pub async fn connect_with_generated_route(
        &self,
        from: &NodeId,
        to: &NodeId,
        direction: impl Into<String>,
        reverse_direction: impl Into<String>,
    ) -> Result<()> {
        let from_node = self.get_node(from)?;
        let to_name = match self.get_node(to) {
            Ok(node) => node.name,
            Err(_) => title_case(to.as_str().rsplit(':').next().unwrap_or(to.as_str())),
        };

        let direction = direction.into();
        let reverse_direction = reverse_direction.into();
        let request = OracleRequest::new(
            ContentKind::Route,
            format!("{} to {}", from_node.name, to_name),
            vec![from_node.name.clone(), to_name],
            from_node.tags.clone(),
        );
        let description = match self.lazy.get_or_generate(&request).await {
            Ok(generated) => generated.text,
            Err(WorldError::GenerationFailed(err)) => {
                debug!(from = %from, to = %to, error = %err, "route generation unavailable, using fallback");
                RouteConcept::plain(&direction, &reverse_direction).description
            }
            Err(other) => return Err(other),
        };

        let route = RouteConcept {
            direction,
            reverse_direction,
            description,
        };
        self.connect_nodes(from, to, &route, false)
    }

    // ------------------------------------------------------------------
    // Materialization
    // ------------------------------------------------------------------

    /// Parent chain of a node, root first, ending with the node itself.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] if the node or any ancestor is missing;
    /// [`WorldError::ParentNotFound`] if the chain cycles or exceeds the
    /// depth bound.
    pub fn ancestry(&self, id: &NodeId) -> Result<Vec<MapNode>> {
        let mut chain = vec![self.get_node(id)?];
        let mut seen: HashSet<NodeId> = HashSet::from([id.clone()]);
        while let Some(parent_id) = chain.last().and_then(|n| n.parent.clone()) {
            if !seen.insert(parent_id.clone()) || chain.len() >= MAX_ANCESTRY_DEPTH {
                return Err(WorldError::ParentNotFound(parent_id.to_string()));
            }
            chain.push(self.get_node(&parent_id)?);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Generate a node's descriptive content, on first real need.
    ///
    /// Already-materialized nodes return immediately. On oracle failure the
    /// node record is left byte-for-byte unchanged (no partial node) so the
    /// next attempt can retry; success commits description and flag in one
    /// node write.
    ///
    /// # Errors
    /// [`WorldError::NotFound`] for an unknown node,
    /// [`WorldError::GenerationFailed`] when the oracle fails or times out.
    pub async fn materialize(&self, id: &NodeId) -> Result<MapNode> {
        let mut node = self.get_node(id)?;
        if node.materialized {
            return Ok(node);
        }

        let chain = self.ancestry(id)?;
        let context: Vec<String> = chain.iter().map(|n| n.name.clone()).collect();
        let request = OracleRequest::new(
            ContentKind::Location,
            node.name.clone(),
            context,
            node.tags.clone(),
        );

        let generated = self.lazy.get_or_generate(&request).await?;
        node.description = generated.text;
        node.materialized = true;
        self.put_node(&node)?;
        info!(session = %self.session, node = %id, from_cache = generated.from_cache, "node materialized");
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// Dump the whole graph for a session snapshot.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn export_snapshot(&self) -> Result<MapSnapshot> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for id in self.node_ids()? {
            nodes.push(self.get_node(&id)?);
            let adjacency = self.get_neighbors(&id)?;
            if !adjacency.is_empty() {
                edges.push((id, adjacency));
            }
        }
        Ok(MapSnapshot { nodes, edges })
    }

    /// Restore a graph dumped by [`export_snapshot`](Self::export_snapshot)
    /// into this session's (assumed empty) namespace.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn import_snapshot(&self, snapshot: &MapSnapshot) -> Result<()> {
        for node in &snapshot.nodes {
            self.put_node(node)?;
            self.kv.list_append(&self.index_key(), node.id.as_str())?;
        }
        for (source, adjacency) in &snapshot.edges {
            for edge in adjacency {
                self.kv
                    .list_append(&self.edges_key(source), &serde_json::to_string(edge)?)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Key derivation helpers
// ---------------------------------------------------------------------------

/// Lowercase a keyword into a stable id fragment: alphanumerics kept,
/// everything else collapsed to single underscores.
#[must_use]
pub fn slugify(keyword: &str) -> String {
    let mut slug = String::with_capacity(keyword.len());
    let mut last_was_sep = true;
    for c in keyword.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

fn title_case(text: &str) -> String {
    text.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::oracle::ScriptedOracle;
    use crate::store::MemoryKvStore;

    fn engine() -> (MapTopologyEngine, Arc<ScriptedOracle>) {
        let oracle = Arc::new(ScriptedOracle::new());
        let lazy = Arc::new(LazyGenerator::new(oracle.clone(), &CacheConfig::default()));
        let map = MapTopologyEngine::new(
            SessionId::from("test-session"),
            Arc::new(MemoryKvStore::new()),
            lazy,
        );
        (map, oracle)
    }

    fn seeded_root(map: &MapTopologyEngine) -> MapNode {
        map.create_root(
            NodeId::from("tavern_square"),
            "Tavern Square",
            Some("Cobbles, chatter, the smell of spilled ale.".into()),
            vec!["lowtown".into()],
            RiskLevel::new(2),
            0,
        )
        .expect("root")
    }

    #[test]
    fn get_node_unknown_is_not_found() {
        let (map, _) = engine();
        let err = map.get_node(&NodeId::from("nowhere")).expect_err("missing");
        assert!(matches!(err, WorldError::NotFound { .. }));
    }

    #[test]
    fn sub_location_ids_are_idempotent() {
        let (map, _) = engine();
        let root = seeded_root(&map);

        let first = map
            .create_dynamic_sub_location(&root.id, "Dusty Cellar", 10)
            .expect("create");
        let second = map
            .create_dynamic_sub_location(&root.id, "Dusty Cellar", 99)
            .expect("repeat");

        assert_eq!(first.id, second.id);
        assert_eq!(first.id.as_str(), "tavern_square:dusty_cellar");
        // The repeat returned the original record, not a re-creation.
        assert_eq!(second.created_at_minutes, 10);
        assert_eq!(map.node_ids().expect("index").len(), 2);
    }

    #[test]
    fn sub_location_requires_materialized_parent() {
        let (map, _) = engine();
        map.create_root(
            NodeId::from("fog_bank"),
            "Fog Bank",
            None,
            vec![],
            RiskLevel::MIN,
            0,
        )
        .expect("unmaterialized root");

        let err = map
            .create_dynamic_sub_location(&NodeId::from("fog_bank"), "inner fog", 0)
            .expect_err("parent unmaterialized");
        assert!(matches!(err, WorldError::ParentNotFound(_)));

        let err = map
            .create_dynamic_sub_location(&NodeId::from("missing"), "anything", 0)
            .expect_err("parent missing");
        assert!(matches!(err, WorldError::ParentNotFound(_)));
    }

    #[test]
    fn edges_are_symmetric_and_ordered() {
        let (map, _) = engine();
        let root = seeded_root(&map);

        let a = map
            .create_dynamic_sub_location(&root.id, "Dusty Cellar", 0)
            .expect("a");
        let b = map
            .create_dynamic_sub_location(&root.id, "Bell Tower", 0)
            .expect("b");

        let neighbors = map.get_neighbors(&root.id).expect("neighbors");
        assert_eq!(neighbors.len(), 2);
        // Insertion order preserved.
        assert_eq!(neighbors[0].to, a.id);
        assert_eq!(neighbors[1].to, b.id);

        // Reverse edges exist and every endpoint resolves.
        let back = map.get_neighbors(&a.id).expect("reverse");
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].to, root.id);
        for edge in neighbors.iter().chain(back.iter()) {
            map.get_node(&edge.from).expect("from resolves");
            map.get_node(&edge.to).expect("to resolves");
        }
    }

    #[test]
    fn neighbors_of_leaf_is_empty_not_error() {
        let (map, _) = engine();
        map.create_root(
            NodeId::from("island"),
            "Island",
            Some("Alone in the grey sea.".into()),
            vec![],
            RiskLevel::MIN,
            0,
        )
        .expect("root");
        assert!(map
            .get_neighbors(&NodeId::from("island"))
            .expect("empty")
            .is_empty());
    }

    #[test]
    fn one_way_edges_skip_reverse() {
        let (map, _) = engine();
        let root = seeded_root(&map);
        map.connect_nodes(
            &root.id,
            &NodeId::from("chute_bottom"),
            &RouteConcept::plain("down the chute", "unreachable"),
            true,
        )
        .expect("connect");

        assert_eq!(map.get_neighbors(&root.id).expect("fwd").len(), 1);
        assert!(map
            .get_neighbors(&NodeId::from("chute_bottom"))
            .expect("rev")
            .is_empty());
    }

    #[tokio::test]
    async fn materialize_fills_description_once() {
        let (map, oracle) = engine();
        let root = seeded_root(&map);
        let cellar = map
            .create_dynamic_sub_location(&root.id, "Dusty Cellar", 0)
            .expect("create");
        assert!(!cellar.materialized);

        let materialized = map.materialize(&cellar.id).await.expect("materialize");
        assert!(materialized.materialized);
        assert!(!materialized.description.is_empty());
        assert_eq!(oracle.calls(), 1);

        // Second call is a no-op.
        map.materialize(&cellar.id).await.expect("idempotent");
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn failed_materialization_leaves_node_unchanged() {
        let oracle = Arc::new(ScriptedOracle::failing());
        let lazy = Arc::new(LazyGenerator::new(oracle, &CacheConfig::default()));
        let map = MapTopologyEngine::new(
            SessionId::from("test-session"),
            Arc::new(MemoryKvStore::new()),
            lazy,
        );

        let root = map
            .create_root(
                NodeId::from("tavern_square"),
                "Tavern Square",
                Some("Cobbles.".into()),
                vec![],
                RiskLevel::MIN,
                0,
            )
            .expect("root");
        let cellar = map
            .create_dynamic_sub_location(&root.id, "Dusty Cellar", 0)
            .expect("create");

        let err = map.materialize(&cellar.id).await.expect_err("oracle down");
        assert!(matches!(err, WorldError::GenerationFailed(_)));

        let reread = map.get_node(&cellar.id).expect("still there");
        assert_eq!(reread, cellar);
    }

    #[tokio::test]
    async fn generated_routes_describe_both_edges() {
        let (map, oracle) = engine();
        let root = seeded_root(&map);
        map.create_root(
            NodeId::from("harbor"),
            "Harbor",
            Some("Masts and gull-cries.".into()),
            vec!["lowtown".into()],
            RiskLevel::new(2),
            0,
        )
        .expect("harbor");

        map.connect_with_generated_route(&root.id, &NodeId::from("harbor"), "seaward", "inland")
            .await
            .expect("connect");
        assert_eq!(oracle.calls(), 1);

        let out = map.get_neighbors(&root.id).expect("out");
        let back = map.get_neighbors(&NodeId::from("harbor")).expect("back");
        assert_eq!(out[0].direction, "seaward");
        assert_eq!(back[0].direction, "inland");
        assert_eq!(out[0].description, back[0].description);
        assert!(!out[0].description.is_empty());
    }

    #[tokio::test]
    async fn route_generation_failure_falls_back_to_plain_text() {
        let oracle = Arc::new(ScriptedOracle::failing());
        let lazy = Arc::new(LazyGenerator::new(oracle, &CacheConfig::default()));
        let map = MapTopologyEngine::new(
            SessionId::from("test-session"),
            Arc::new(MemoryKvStore::new()),
            lazy,
        );
        let root = map
            .create_root(
                NodeId::from("tavern_square"),
                "Tavern Square",
                Some("Cobbles.".into()),
                vec![],
                RiskLevel::MIN,
                0,
            )
            .expect("root");

        map.connect_with_generated_route(&root.id, &NodeId::from("harbor"), "seaward", "inland")
            .await
            .expect("fallback connect");
        let out = map.get_neighbors(&root.id).expect("out");
        assert_eq!(out.len(), 1);
        assert!(out[0].description.contains("unremarkable"));
    }

    #[test]
    fn ancestry_walks_root_first() {
        let (map, _) = engine();
        let root = seeded_root(&map);
        let cellar = map
            .create_dynamic_sub_location(&root.id, "Dusty Cellar", 0)
            .expect("cellar");

        let chain = map.ancestry(&cellar.id).expect("chain");
        let names: Vec<_> = chain.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Tavern Square", "Dusty Cellar"]);
    }

    #[test]
    fn snapshot_roundtrip_preserves_graph() {
        let (map, _) = engine();
        let root = seeded_root(&map);
        map.create_dynamic_sub_location(&root.id, "Dusty Cellar", 0)
            .expect("cellar");

        let snapshot = map.export_snapshot().expect("export");

        let oracle = Arc::new(ScriptedOracle::new());
        let lazy = Arc::new(LazyGenerator::new(oracle, &CacheConfig::default()));
        let restored = MapTopologyEngine::new(
            SessionId::from("restored"),
            Arc::new(MemoryKvStore::new()),
            lazy,
        );
        restored.import_snapshot(&snapshot).expect("import");

        assert_eq!(restored.node_ids().expect("ids").len(), 2);
        let neighbors = restored.get_neighbors(&root.id).expect("edges");
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].to.as_str(), "tavern_square:dusty_cellar");
    }

    #[test]
    fn slugify_normalizes() {
        assert_eq!(slugify("Dusty Cellar"), "dusty_cellar");
        assert_eq!(slugify("  the -- Old Well! "), "the_old_well");
        assert_eq!(slugify("A"), "a");
    }
}
