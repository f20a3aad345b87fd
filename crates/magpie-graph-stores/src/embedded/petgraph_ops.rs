//! In-memory entity graph using petgraph DiGraph.
//!
//! Holds the current revision of every entity, the same-as link log and the
//! relation adjacency. Entity-to-entity relations are edges; literal
//! relations hang off their subject node.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use ordered_float::OrderedFloat;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use magpie_core::resolution::{LinkLookup, SameAsLinkLog};
use magpie_core::similarity::cosine_similarity;
use magpie_core::types::{Entity, EntityStatus, Relation};

/// Node data: an entity id and its literal-valued relations.
#[derive(Debug, Clone, Default)]
pub struct EntityNode {
    /// Entity id.
    pub entity_id: String,
    /// Relations from this entity to literal values.
    pub literals: Vec<Relation>,
}

impl EntityNode {
    /// Create a node for `entity_id`.
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            literals: Vec::new(),
        }
    }
}

/// Edge data: a relation between two entities.
#[derive(Debug, Clone)]
pub struct RelationEdge {
    /// The relation, subject to object.
    pub relation: Relation,
}

/// The in-memory graph type using petgraph.
pub type EntityGraph = DiGraph<EntityNode, RelationEdge>;

/// Index for O(1) lookups by entity id.
pub type NodeIndexMap = HashMap<String, NodeIndex>;

/// Everything the store answers reads from.
#[derive(Debug, Default)]
pub struct GraphState {
    graph: EntityGraph,
    nodes: NodeIndexMap,
    entities: HashMap<String, Entity>,
    retired_into: HashMap<String, BTreeSet<String>>,
    relation_ids: HashSet<String>,
    links: SameAsLinkLog,
}

impl GraphState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all nodes, edges, entities and links.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn ensure_node(&mut self, entity_id: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(entity_id) {
            return idx;
        }
        let idx = self.graph.add_node(EntityNode::new(entity_id));
        self.nodes.insert(entity_id.to_string(), idx);
        idx
    }

    /// Install the current revision of an entity.
    pub fn upsert_entity(&mut self, entity: Entity) {
        self.ensure_node(&entity.id);
        if let Some(previous) = self.entities.get(&entity.id) {
            if let EntityStatus::Retired { canonical_id } = &previous.status {
                if let Some(members) = self.retired_into.get_mut(canonical_id) {
                    members.remove(&entity.id);
                }
            }
        }
        if let EntityStatus::Retired { canonical_id } = &entity.status {
            self.retired_into
                .entry(canonical_id.clone())
                .or_default()
                .insert(entity.id.clone());
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Add a relation. Returns false if a relation with the same id is known.
    pub fn add_relation(&mut self, relation: Relation) -> bool {
        if !self.relation_ids.insert(relation.id.clone()) {
            return false;
        }
        let subject = self.ensure_node(&relation.subject_entity_id);
        match relation.object.entity_id().map(str::to_string) {
            Some(object_id) => {
                let object = self.ensure_node(&object_id);
                self.graph.add_edge(subject, object, RelationEdge { relation });
            }
            None => {
                if let Some(node) = self.graph.node_weight_mut(subject) {
                    node.literals.push(relation);
                }
            }
        }
        true
    }

    /// Mutable access to the link log.
    pub fn links_mut(&mut self) -> &mut SameAsLinkLog {
        &mut self.links
    }

    /// The link log.
    pub fn links(&self) -> &SameAsLinkLog {
        &self.links
    }

    /// Current revision of an entity.
    pub fn entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    /// Whether the entity is active and has no outgoing active link.
    pub fn is_canonical(&self, entity_id: &str) -> bool {
        self.entities
            .get(entity_id)
            .map(|e| e.is_active() && self.links.active_link(entity_id).is_none())
            .unwrap_or(false)
    }

    /// Relations with `entity_id` at either end, sorted by relation id.
    ///
    /// O(degree) via the petgraph adjacency lists.
    pub fn relations_touching(&self, entity_id: &str) -> Vec<Relation> {
        let Some(&idx) = self.nodes.get(entity_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut relations: Vec<Relation> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|edge| &edge.weight().relation)
            .chain(self.graph[idx].literals.iter())
            .filter(|relation| seen.insert(relation.id.as_str()))
            .cloned()
            .collect();
        relations.sort_by(|a, b| a.id.cmp(&b.id));
        relations
    }

    /// Entities that resolve into `canonical_id`: retired members and linked
    /// sources, transitively.
    pub fn linked_aliases(&self, canonical_id: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([canonical_id.to_string()]);
        while let Some(current) = queue.pop_front() {
            let retired = self
                .retired_into
                .get(&current)
                .into_iter()
                .flatten()
                .cloned();
            let linked = self
                .links
                .sources_of(&current)
                .into_iter()
                .map(str::to_string);
            for alias in retired.chain(linked).collect::<Vec<_>>() {
                if alias != canonical_id && seen.insert(alias.clone()) {
                    queue.push_back(alias);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Brute-force cosine search over active entities with embeddings.
    ///
    /// Vectors of a different dimension are skipped.
    pub fn search_embeddings(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        let mut hits: Vec<(String, f32)> = self
            .entities
            .values()
            .filter(|e| e.is_active())
            .filter_map(|e| {
                let embedding = e.embedding.as_ref()?;
                Some((e.id.clone(), cosine_similarity(query, &embedding.vector)?))
            })
            .collect();
        hits.sort_by(|a, b| {
            OrderedFloat(b.1)
                .cmp(&OrderedFloat(a.1))
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        hits
    }

    /// Number of entities with a current revision.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of relations, edges and literals together.
    pub fn relation_count(&self) -> usize {
        self.relation_ids.len()
    }

    /// Number of entity-to-entity edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
