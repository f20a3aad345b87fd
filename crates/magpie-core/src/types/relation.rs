//! Relation and evidence types.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};

use super::check_unit_interval;

/// Provenance for a relation: the source span that supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    /// The supporting text.
    pub text: String,
    /// Start character offset.
    pub start_char: usize,
    /// End character offset (exclusive).
    pub end_char: usize,
    /// Confidence that the span supports the relation (0.0-1.0).
    pub confidence: f32,
}

impl EvidenceSpan {
    /// Create a new evidence span.
    pub fn new(text: impl Into<String>, start_char: usize, end_char: usize, confidence: f32) -> Self {
        Self {
            text: text.into(),
            start_char,
            end_char,
            confidence,
        }
    }
}

/// Object position of a relation: another entity or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RelationObject {
    /// Points at another entity by id.
    Entity(String),
    /// A literal value.
    Literal(String),
}

impl RelationObject {
    /// The entity id, if the object is an entity.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::Entity(id) => Some(id),
            Self::Literal(_) => None,
        }
    }
}

/// A predicate linking an entity to another entity or a literal.
///
/// Relations are read-only once created by extraction or grounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Unique identifier for the relation.
    pub id: String,
    /// Subject entity id.
    pub subject_entity_id: String,
    /// Predicate IRI (e.g. "http://schema.org/worksFor").
    pub predicate_iri: String,
    /// Object entity or literal.
    pub object: RelationObject,
    /// Extraction confidence (0.0-1.0).
    pub confidence: f32,
    /// Confidence that the relation is grounded in source text (0.0-1.0).
    pub grounding_confidence: f32,
    /// Supporting span, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_span: Option<EvidenceSpan>,
}

impl Relation {
    /// Create a relation between two entities.
    pub fn between(
        id: impl Into<String>,
        subject_entity_id: impl Into<String>,
        predicate_iri: impl Into<String>,
        object_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject_entity_id: subject_entity_id.into(),
            predicate_iri: predicate_iri.into(),
            object: RelationObject::Entity(object_entity_id.into()),
            confidence: 1.0,
            grounding_confidence: 1.0,
            evidence_span: None,
        }
    }

    /// Create a relation from an entity to a literal value.
    pub fn literal(
        id: impl Into<String>,
        subject_entity_id: impl Into<String>,
        predicate_iri: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject_entity_id: subject_entity_id.into(),
            predicate_iri: predicate_iri.into(),
            object: RelationObject::Literal(value.into()),
            confidence: 1.0,
            grounding_confidence: 1.0,
            evidence_span: None,
        }
    }

    /// Set the extraction confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the grounding confidence.
    pub fn with_grounding(mut self, grounding_confidence: f32) -> Self {
        self.grounding_confidence = grounding_confidence;
        self
    }

    /// Attach an evidence span.
    pub fn with_evidence(mut self, span: EvidenceSpan) -> Self {
        self.evidence_span = Some(span);
        self
    }

    /// Entity ids this relation touches (subject, plus object if it is an entity).
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.subject_entity_id.as_str()).chain(self.object.entity_id())
    }

    /// The entity on the other end of the relation from `entity_id`, if any.
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        match self.object.entity_id() {
            Some(object) if self.subject_entity_id == entity_id => Some(object),
            Some(object) if object == entity_id => Some(self.subject_entity_id.as_str()),
            _ => None,
        }
    }

    /// Check the relation is well formed.
    pub fn validate(&self) -> MagpieResult<()> {
        if self.id.trim().is_empty() || self.subject_entity_id.trim().is_empty() {
            return Err(MagpieError::invalid_item(
                &self.id,
                ErrorCode::ValMissingField,
                "relation id or subject is empty",
            ));
        }
        if self.predicate_iri.trim().is_empty() {
            return Err(MagpieError::invalid_item(
                &self.id,
                ErrorCode::ValMissingField,
                "relation predicate is empty",
            ));
        }
        if matches!(&self.object, RelationObject::Entity(id) if id.trim().is_empty()) {
            return Err(MagpieError::invalid_item(
                &self.id,
                ErrorCode::ValMissingField,
                "relation object entity id is empty",
            ));
        }
        check_unit_interval(&self.id, "relation confidence", self.confidence)?;
        check_unit_interval(&self.id, "grounding confidence", self.grounding_confidence)?;
        if let Some(span) = &self.evidence_span {
            if span.start_char > span.end_char {
                return Err(MagpieError::invalid_item(
                    &self.id,
                    ErrorCode::ValInvalidSpan,
                    format!(
                        "evidence span start {} is after end {}",
                        span.start_char, span.end_char
                    ),
                ));
            }
            check_unit_interval(&self.id, "evidence confidence", span.confidence)?;
        }
        Ok(())
    }
}
