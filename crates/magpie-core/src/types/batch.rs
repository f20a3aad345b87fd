//! Extraction batch, pipeline stage and commit types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::cluster::{EntityCluster, SameAsLink};
use super::entity::Entity;
use super::mention::Mention;
use super::relation::Relation;

/// One unit of extraction output to be resolved together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionBatch {
    /// Batch identifier.
    pub batch_id: String,
    /// Mentions referenced by the entities.
    #[serde(default)]
    pub mentions: Vec<Mention>,
    /// Candidate entities.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Candidate relations.
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl ExtractionBatch {
    /// Create an empty batch.
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            ..Default::default()
        }
    }

    /// Add a mention.
    pub fn with_mention(mut self, mention: Mention) -> Self {
        self.mentions.push(mention);
        self
    }

    /// Add an entity.
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }
}

/// Stages of the per-batch resolution pipeline, in order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStage {
    /// Input validated and (optionally) embeddings back-filled.
    Extracted,
    /// Candidates partitioned into clusters.
    Clustered,
    /// A canonical entity chosen per cluster and attributes merged.
    Canonicalized,
    /// Canonical entities linked to prior canonical entities.
    Linked,
    /// Low-confidence entities and ungrounded relations removed.
    Filtered,
    /// Results persisted and the canonical index updated.
    Committed,
}

/// Why a relation was set aside for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Grounding confidence below the compliance threshold.
    Ungrounded { grounding_confidence: f32, threshold: f32 },
    /// The ontology validator rejected it.
    Ontology { message: String },
    /// An endpoint entity was dropped or skipped.
    DanglingReference { entity_id: String },
}

/// A relation rejected by filtering, retained for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRelation {
    /// The relation as it was when rejected.
    pub relation: Relation,
    /// Why it was rejected.
    pub reason: RejectionReason,
}

/// Why an entity was dropped during filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EntityRejection {
    /// Confidence below the configured minimum.
    LowConfidence { confidence: f32, threshold: f32 },
    /// The ontology validator rejected it.
    Ontology { message: String },
}

/// An entity dropped by filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedEntity {
    /// The entity as it was when rejected.
    pub entity: Entity,
    /// Why it was rejected.
    pub reason: EntityRejection,
}

/// Everything one successful resolution pass writes to the graph store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionCommit {
    /// Originating batch.
    pub batch_id: String,
    /// Canonical entities (active) and absorbed members (retired).
    pub entities: Vec<Entity>,
    /// Finalized clusters.
    pub clusters: Vec<EntityCluster>,
    /// New same-as links.
    pub links: Vec<SameAsLink>,
    /// Grounded relations, endpoints rewritten to canonical ids.
    pub relations: Vec<Relation>,
    /// Relations set aside for review.
    pub rejected_relations: Vec<RejectedRelation>,
}
