//! Graph store trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MagpieResult;
use crate::types::{BlockingKey, Entity, RejectedRelation, Relation, ResolutionCommit, SameAsLink};

/// Core GraphStore trait - persistent storage for committed resolution output.
///
/// Implementations keep entities and embeddings as an append/supersede log
/// and same-as links, clusters and rejected relations as append-only logs.
/// Reads never mutate history.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Persist the output of one resolution pass atomically.
    async fn commit(&self, commit: &ResolutionCommit) -> MagpieResult<()>;

    /// Current revision of an entity, active or retired.
    async fn get_entity(&self, id: &str) -> MagpieResult<Option<Entity>>;

    /// Currently-canonical entities under a blocking key: active, not absorbed
    /// into a cluster, and without an outgoing same-as link.
    async fn canonical_entities(&self, key: &BlockingKey) -> MagpieResult<Vec<Entity>>;

    /// The active (highest-confidence) same-as link leaving an entity.
    async fn active_same_as_link(&self, from_entity_id: &str) -> MagpieResult<Option<SameAsLink>>;

    /// Entities whose identity resolves to `canonical_id`: retired cluster
    /// members and same-as sources, followed transitively.
    async fn linked_aliases(&self, canonical_id: &str) -> MagpieResult<Vec<String>>;

    /// Stored relations with `entity_id` as subject or object.
    async fn relations_touching(&self, entity_id: &str) -> MagpieResult<Vec<Relation>>;

    /// Nearest active entities by embedding similarity, best first.
    async fn search_embeddings(&self, query: &[f32], limit: usize) -> MagpieResult<Vec<(String, f32)>>;

    /// Relations held for review, optionally restricted to one batch.
    async fn rejected_relations(&self, batch_id: Option<&str>) -> MagpieResult<Vec<RejectedRelation>>;
}

#[async_trait]
impl<T: GraphStore + ?Sized> GraphStore for Arc<T> {
    async fn commit(&self, commit: &ResolutionCommit) -> MagpieResult<()> {
        (**self).commit(commit).await
    }

    async fn get_entity(&self, id: &str) -> MagpieResult<Option<Entity>> {
        (**self).get_entity(id).await
    }

    async fn canonical_entities(&self, key: &BlockingKey) -> MagpieResult<Vec<Entity>> {
        (**self).canonical_entities(key).await
    }

    async fn active_same_as_link(&self, from_entity_id: &str) -> MagpieResult<Option<SameAsLink>> {
        (**self).active_same_as_link(from_entity_id).await
    }

    async fn linked_aliases(&self, canonical_id: &str) -> MagpieResult<Vec<String>> {
        (**self).linked_aliases(canonical_id).await
    }

    async fn relations_touching(&self, entity_id: &str) -> MagpieResult<Vec<Relation>> {
        (**self).relations_touching(entity_id).await
    }

    async fn search_embeddings(&self, query: &[f32], limit: usize) -> MagpieResult<Vec<(String, f32)>> {
        (**self).search_embeddings(query, limit).await
    }

    async fn rejected_relations(&self, batch_id: Option<&str>) -> MagpieResult<Vec<RejectedRelation>> {
        (**self).rejected_relations(batch_id).await
    }
}
