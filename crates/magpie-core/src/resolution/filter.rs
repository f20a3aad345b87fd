//! Confidence and grounding filters.
//!
//! Every input item leaves the filter exactly once, either kept or rejected
//! with a reason. Rejected relations go to the review side channel rather
//! than being discarded.

use std::collections::{HashMap, HashSet};

use crate::traits::{OntologyValidator, Verdict};
use crate::types::{
    Entity, EntityRejection, RejectedEntity, RejectedRelation, RejectionReason, Relation,
};

/// Splits relations on grounding confidence.
#[derive(Debug, Clone, Copy)]
pub struct GroundingFilter {
    threshold: f32,
}

impl Default for GroundingFilter {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

impl GroundingFilter {
    /// Create a filter keeping relations with grounding at or above `threshold`.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// The configured threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether a relation is grounded well enough to keep.
    pub fn is_grounded(&self, relation: &Relation) -> bool {
        relation.grounding_confidence >= self.threshold
    }

    /// Partition relations into (kept, rejected).
    pub fn partition(&self, relations: Vec<Relation>) -> (Vec<Relation>, Vec<RejectedRelation>) {
        let mut kept = Vec::with_capacity(relations.len());
        let mut rejected = Vec::new();
        for relation in relations {
            if self.is_grounded(&relation) {
                kept.push(relation);
            } else {
                rejected.push(self.reject(relation));
            }
        }
        (kept, rejected)
    }

    fn reject(&self, relation: Relation) -> RejectedRelation {
        RejectedRelation {
            reason: RejectionReason::Ungrounded {
                grounding_confidence: relation.grounding_confidence,
                threshold: self.threshold,
            },
            relation,
        }
    }
}

/// Output of the resolution filter stage.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Canonical entities that passed.
    pub kept_entities: Vec<Entity>,
    /// Canonical entities dropped, with reasons.
    pub rejected_entities: Vec<RejectedEntity>,
    /// Relations that passed.
    pub kept_relations: Vec<Relation>,
    /// Relations held for review.
    pub rejected_relations: Vec<RejectedRelation>,
    /// Evidence spans detached for low confidence.
    pub detached_evidence: usize,
}

/// Entity confidence, evidence confidence, ontology and grounding checks.
#[derive(Debug, Clone)]
pub struct ConfidenceFilter {
    min_entity_confidence: f32,
    min_evidence_confidence: f32,
    grounding: GroundingFilter,
}

impl Default for ConfidenceFilter {
    fn default() -> Self {
        Self {
            min_entity_confidence: 0.3,
            min_evidence_confidence: 0.5,
            grounding: GroundingFilter::default(),
        }
    }
}

impl ConfidenceFilter {
    /// Create a filter.
    pub fn new(min_entity_confidence: f32, min_evidence_confidence: f32, grounding: GroundingFilter) -> Self {
        Self {
            min_entity_confidence,
            min_evidence_confidence,
            grounding,
        }
    }

    /// Filter canonical entities and relations.
    ///
    /// `resolvable` maps every entity id a relation may reference (batch
    /// members and already-stored entities) to the canonical id it answers
    /// to in this pass. A relation touching an unknown id, or one whose
    /// canonical is rejected here, is a dangling reference.
    pub fn apply<V: OntologyValidator + ?Sized>(
        &self,
        canonicals: Vec<Entity>,
        relations: Vec<Relation>,
        resolvable: &HashMap<String, String>,
        validator: &V,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut dropped: HashSet<String> = HashSet::new();

        for entity in canonicals {
            let reason = if entity.confidence < self.min_entity_confidence {
                Some(EntityRejection::LowConfidence {
                    confidence: entity.confidence,
                    threshold: self.min_entity_confidence,
                })
            } else {
                match validator.validate_entity(&entity) {
                    Verdict::Accept => None,
                    Verdict::Reject(message) => Some(EntityRejection::Ontology { message }),
                }
            };
            match reason {
                Some(reason) => {
                    tracing::debug!(entity = %entity.id, ?reason, "entity dropped");
                    dropped.insert(entity.id.clone());
                    outcome.rejected_entities.push(RejectedEntity { entity, reason });
                }
                None => outcome.kept_entities.push(entity),
            }
        }

        for mut relation in relations {
            if relation
                .evidence_span
                .as_ref()
                .is_some_and(|span| span.confidence < self.min_evidence_confidence)
            {
                relation.evidence_span = None;
                outcome.detached_evidence += 1;
            }

            let dangling = relation
                .entity_ids()
                .find(|id| match resolvable.get(*id) {
                    Some(canonical) => dropped.contains(canonical),
                    None => true,
                })
                .map(str::to_string);

            let reason = if let Some(entity_id) = dangling {
                Some(RejectionReason::DanglingReference { entity_id })
            } else if let Verdict::Reject(message) = validator.validate_relation(&relation) {
                Some(RejectionReason::Ontology { message })
            } else if !self.grounding.is_grounded(&relation) {
                Some(RejectionReason::Ungrounded {
                    grounding_confidence: relation.grounding_confidence,
                    threshold: self.grounding.threshold(),
                })
            } else {
                None
            };

            match reason {
                Some(reason) => outcome
                    .rejected_relations
                    .push(RejectedRelation { relation, reason }),
                None => outcome.kept_relations.push(relation),
            }
        }

        tracing::debug!(
            kept_entities = outcome.kept_entities.len(),
            rejected_entities = outcome.rejected_entities.len(),
            kept_relations = outcome.kept_relations.len(),
            rejected_relations = outcome.rejected_relations.len(),
            detached_evidence = outcome.detached_evidence,
            "filter stage complete"
        );
        outcome
    }
}
