//! Ontology validator trait.

use crate::types::{Entity, Relation};

/// Outcome of an ontology check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The item conforms to the ontology.
    Accept,
    /// The item violates the ontology, with a reason for reviewers.
    Reject(String),
}

impl Verdict {
    /// Whether the item was accepted.
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Class/property validation service consulted during filtering.
#[cfg_attr(test, mockall::automock)]
pub trait OntologyValidator: Send + Sync {
    /// Check an entity's types and attributes.
    fn validate_entity(&self, entity: &Entity) -> Verdict;

    /// Check a relation's predicate and endpoints.
    fn validate_relation(&self, relation: &Relation) -> Verdict;
}

/// Validator that accepts everything. Used when no ontology is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl OntologyValidator for AcceptAll {
    fn validate_entity(&self, _entity: &Entity) -> Verdict {
        Verdict::Accept
    }

    fn validate_relation(&self, _relation: &Relation) -> Verdict {
        Verdict::Accept
    }
}
