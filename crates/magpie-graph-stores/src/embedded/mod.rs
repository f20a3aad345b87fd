//! Embedded graph store using petgraph + SQLite hybrid architecture.
//!
//! This module provides a graph store implementation that:
//! - Uses SQLite for persistent, append-only history
//! - Uses petgraph DiGraph for O(1) in-memory neighbor lookups
//! - Synchronizes between the two on open and after every commit
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          EmbeddedGraphStore             │
//! ├─────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌────────────────┐  │
//! │  │   SQLite    │    │   petgraph     │  │
//! │  │ (revisions, │───►│  (current      │  │
//! │  │  link log)  │    │   graph)       │  │
//! │  └─────────────┘    └────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```

pub mod petgraph_ops;
pub mod schema;
pub mod sync;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use rusqlite::Connection;

use magpie_core::config::EngineConfig;
use magpie_core::error::{MagpieError, MagpieResult};
use magpie_core::resolution::LinkLookup;
use magpie_core::traits::GraphStore;
use magpie_core::types::{BlockingKey, Entity, RejectedRelation, Relation, ResolutionCommit, SameAsLink};

use petgraph_ops::GraphState;

/// Default blocking prefix length, matching the resolver default.
pub const DEFAULT_BLOCKING_PREFIX_LEN: usize = 3;

/// Embedded graph store using petgraph + SQLite.
///
/// Thread-safe via a Mutex on the connection and an RwLock on the graph.
/// Writers take the connection first, then the graph.
pub struct EmbeddedGraphStore {
    /// SQLite connection (wrapped in Mutex for Send + Sync).
    conn: Mutex<Connection>,
    /// In-memory graph for fast traversal.
    state: RwLock<GraphState>,
    /// Prefix length used for the persisted blocking keys.
    blocking_prefix_len: usize,
}

impl EmbeddedGraphStore {
    /// Open (or create) a store at the given database path.
    pub fn new(db_path: impl AsRef<Path>) -> MagpieResult<Self> {
        Self::open(Connection::open(db_path)?, DEFAULT_BLOCKING_PREFIX_LEN)
    }

    /// Create a new in-memory embedded graph store.
    pub fn in_memory() -> MagpieResult<Self> {
        Self::open(Connection::open_in_memory()?, DEFAULT_BLOCKING_PREFIX_LEN)
    }

    /// Open the store configured in an `EngineConfig`.
    ///
    /// A path of `:memory:` opens an in-memory store. Parent directories are
    /// created as needed.
    pub fn from_config(config: &EngineConfig) -> MagpieResult<Self> {
        let path = &config.store.path;
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        };
        Self::open(conn, config.resolution.blocking_prefix_len)
    }

    fn open(conn: Connection, blocking_prefix_len: usize) -> MagpieResult<Self> {
        schema::init_schema(&conn)?;

        // Load existing data
        let mut state = GraphState::new();
        sync::load_graph(&conn, &mut state)?;
        tracing::debug!(
            entities = state.entity_count(),
            relations = state.relation_count(),
            links = state.links().len(),
            "graph store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            state: RwLock::new(state),
            blocking_prefix_len,
        })
    }

    /// Every stored revision of an entity, oldest first.
    pub fn entity_history(&self, entity_id: &str) -> MagpieResult<Vec<Entity>> {
        let conn = self.lock_conn()?;
        sync::entity_history(&conn, entity_id)
    }

    /// Every same-as link ever appended for a source entity, oldest first.
    pub fn link_history(&self, from_entity_id: &str) -> MagpieResult<Vec<SameAsLink>> {
        let state = self.read_state()?;
        Ok(state
            .links()
            .history(from_entity_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Number of commits recorded for a batch.
    pub fn commit_count(&self, batch_id: &str) -> MagpieResult<usize> {
        let conn = self.lock_conn()?;
        sync::commit_count(&conn, batch_id)
    }

    /// Get entity count.
    pub fn entity_count(&self) -> MagpieResult<usize> {
        Ok(self.read_state()?.entity_count())
    }

    /// Get relation count.
    pub fn relation_count(&self) -> MagpieResult<usize> {
        Ok(self.read_state()?.relation_count())
    }

    fn lock_conn(&self) -> MagpieResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))
    }

    fn read_state(&self) -> MagpieResult<RwLockReadGuard<'_, GraphState>> {
        self.state
            .read()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl GraphStore for EmbeddedGraphStore {
    /// Persist a commit in one transaction, then apply it to the in-memory graph.
    async fn commit(&self, commit: &ResolutionCommit) -> MagpieResult<()> {
        let commit_id = uuid::Uuid::new_v4().to_string();
        let mut conn = self.lock_conn()?;

        let tx = conn.transaction()?;
        let revisions = sync::save_commit(&tx, commit, &commit_id, self.blocking_prefix_len)?;
        tx.commit()?;

        let mut state = self
            .state
            .write()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))?;
        for entity in &commit.entities {
            state.upsert_entity(entity.clone());
        }
        for link in &commit.links {
            state.links_mut().append(link.clone());
        }
        for relation in &commit.relations {
            state.add_relation(relation.clone());
        }

        tracing::debug!(
            batch_id = %commit.batch_id,
            commit_id = %commit_id,
            revisions,
            links = commit.links.len(),
            relations = commit.relations.len(),
            rejected = commit.rejected_relations.len(),
            "commit persisted"
        );
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> MagpieResult<Option<Entity>> {
        Ok(self.read_state()?.entity(id).cloned())
    }

    /// Canonical entities under a blocking key, from the persisted key index.
    async fn canonical_entities(&self, key: &BlockingKey) -> MagpieResult<Vec<Entity>> {
        let ids = {
            let conn = self.lock_conn()?;
            sync::entity_ids_for_key(&conn, key)?
        };
        let state = self.read_state()?;
        Ok(ids
            .iter()
            .filter(|id| state.is_canonical(id))
            .filter_map(|id| state.entity(id).cloned())
            .collect())
    }

    async fn active_same_as_link(&self, from_entity_id: &str) -> MagpieResult<Option<SameAsLink>> {
        Ok(self.read_state()?.links().active_link(from_entity_id).cloned())
    }

    async fn linked_aliases(&self, canonical_id: &str) -> MagpieResult<Vec<String>> {
        Ok(self.read_state()?.linked_aliases(canonical_id))
    }

    async fn relations_touching(&self, entity_id: &str) -> MagpieResult<Vec<Relation>> {
        Ok(self.read_state()?.relations_touching(entity_id))
    }

    async fn search_embeddings(&self, query: &[f32], limit: usize) -> MagpieResult<Vec<(String, f32)>> {
        Ok(self.read_state()?.search_embeddings(query, limit))
    }

    async fn rejected_relations(&self, batch_id: Option<&str>) -> MagpieResult<Vec<RejectedRelation>> {
        let conn = self.lock_conn()?;
        sync::load_rejected(&conn, batch_id)
    }
}

// Implement Debug for EmbeddedGraphStore
impl std::fmt::Debug for EmbeddedGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedGraphStore")
            .field("entity_count", &self.entity_count().unwrap_or(0))
            .field("relation_count", &self.relation_count().unwrap_or(0))
            .field("blocking_prefix_len", &self.blocking_prefix_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::types::{EntityCluster, EntityStatus, RejectionReason};

    fn acme_commit() -> ResolutionCommit {
        let e1 = Entity::new("e1", "Acme Corp")
            .with_type("organization")
            .with_embedding(vec![1.0, 0.0], "m");
        let e2 = Entity {
            status: EntityStatus::Retired {
                canonical_id: "e1".into(),
            },
            ..Entity::new("e2", "ACME Corporation").with_type("organization")
        };
        let ungrounded = Relation::between("r2", "e3", "ex:rumoredToOwn", "e1").with_grounding(0.2);
        ResolutionCommit {
            batch_id: "b1".into(),
            clusters: vec![EntityCluster::new("e1", ["e1".to_string(), "e2".to_string()]).unwrap()],
            entities: vec![e1, e2, Entity::new("e3", "Wile E. Coyote").with_type("person")],
            relations: vec![Relation::between("r1", "e3", "ex:worksFor", "e2")],
            rejected_relations: vec![RejectedRelation {
                reason: RejectionReason::Ungrounded {
                    grounding_confidence: 0.2,
                    threshold: 0.8,
                },
                relation: ungrounded,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_commit_and_read_back() {
        let store = EmbeddedGraphStore::in_memory().unwrap();
        store.commit(&acme_commit()).await.unwrap();

        assert_eq!(store.entity_count().unwrap(), 3);
        assert_eq!(store.get_entity("e1").await.unwrap().unwrap().name(), Some("Acme Corp"));
        assert_eq!(store.linked_aliases("e1").await.unwrap(), vec!["e2"]);
        assert_eq!(store.relations_touching("e2").await.unwrap().len(), 1);
        assert_eq!(store.rejected_relations(Some("b1")).await.unwrap().len(), 1);
        assert!(store.rejected_relations(Some("other")).await.unwrap().is_empty());
        assert_eq!(store.commit_count("b1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_canonical_entities_by_key() {
        let store = EmbeddedGraphStore::in_memory().unwrap();
        store.commit(&acme_commit()).await.unwrap();

        let ids = |entities: Vec<Entity>| entities.into_iter().map(|e| e.id).collect::<Vec<_>>();
        let org = store
            .canonical_entities(&BlockingKey::new("organization", "acm"))
            .await
            .unwrap();
        // The retired member is not a candidate.
        assert_eq!(ids(org), vec!["e1"]);

        store
            .commit(&ResolutionCommit {
                batch_id: "b2".into(),
                entities: vec![Entity::new("e9", "Acme").with_type("organization")],
                links: vec![SameAsLink::new("e9", "e1", 0.93)],
                ..Default::default()
            })
            .await
            .unwrap();
        let org = store
            .canonical_entities(&BlockingKey::new("organization", "acm"))
            .await
            .unwrap();
        // Linked entities are not candidates either.
        assert_eq!(ids(org), vec!["e1"]);
        assert_eq!(
            store.active_same_as_link("e9").await.unwrap().unwrap().to_canonical_entity_id,
            "e1"
        );
    }

    #[tokio::test]
    async fn test_search_embeddings() {
        let store = EmbeddedGraphStore::in_memory().unwrap();
        store.commit(&acme_commit()).await.unwrap();

        let hits = store.search_embeddings(&[0.9, 0.1], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "e1");
    }

    #[tokio::test]
    async fn test_resubmitted_commit_adds_no_revisions() {
        let store = EmbeddedGraphStore::in_memory().unwrap();
        store.commit(&acme_commit()).await.unwrap();
        store.commit(&acme_commit()).await.unwrap();

        assert_eq!(store.entity_history("e1").unwrap().len(), 1);
        assert_eq!(store.relation_count().unwrap(), 1);
        assert_eq!(store.commit_count("b1").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_link_log_is_append_only() {
        let store = EmbeddedGraphStore::in_memory().unwrap();
        store.commit(&acme_commit()).await.unwrap();
        for (target, confidence) in [("e1", 0.91), ("e3", 0.95)] {
            store
                .commit(&ResolutionCommit {
                    batch_id: format!("link-{}", target),
                    entities: vec![Entity::new("e9", "Acme").with_type("organization")],
                    links: vec![SameAsLink::new("e9", target, confidence)],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let history = store.link_history("e9").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            store.active_same_as_link("e9").await.unwrap().unwrap().to_canonical_entity_id,
            "e3"
        );
    }
}
