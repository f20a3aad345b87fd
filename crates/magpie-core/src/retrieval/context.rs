//! Formats ranked entities and their relations into a bounded context string.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::types::{Entity, Relation, RelationObject, NAME_ATTRIBUTE};

/// Formatted context plus what made it in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    /// The context text, one item per line.
    pub text: String,
    /// Ids of entities included, in rank order.
    pub entities: Vec<String>,
    /// Ids of relations included.
    pub relations: Vec<String>,
    /// Items dropped to stay within the budget.
    pub truncated_items: usize,
}

enum Item<'a> {
    Entity(&'a Entity),
    Relation(&'a Relation),
}

/// Builds context text under a character budget.
///
/// Each entity line is followed by the relations anchored on it: a relation
/// is listed under whichever of its endpoints ranks higher. Items are emitted
/// in rank order and the first item that would overflow the budget ends the
/// context, so the lowest-ranked items are the ones dropped.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    budget_chars: usize,
}

impl ContextBuilder {
    /// Create a builder with the given character budget.
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    /// The character budget.
    pub fn budget_chars(&self) -> usize {
        self.budget_chars
    }

    /// Format `ranked` entities (best first) and the `relations` between them.
    ///
    /// `canonical_of` maps raw endpoint ids to canonical ids; relations with
    /// no endpoint among `ranked` are left out.
    pub fn build(
        &self,
        ranked: &[Entity],
        relations: &[Relation],
        canonical_of: &HashMap<String, String>,
    ) -> BuiltContext {
        let position: HashMap<&str, usize> = ranked
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.id.as_str(), idx))
            .collect();
        let canonical = |id: &str| -> String {
            canonical_of.get(id).cloned().unwrap_or_else(|| id.to_string())
        };

        let mut anchored: Vec<Vec<&Relation>> = vec![Vec::new(); ranked.len()];
        for relation in relations {
            let anchor = relation
                .entity_ids()
                .filter_map(|id| position.get(canonical(id).as_str()).copied())
                .min();
            if let Some(idx) = anchor {
                anchored[idx].push(relation);
            }
        }
        for group in &mut anchored {
            group.sort_by(|a, b| {
                OrderedFloat(b.confidence)
                    .cmp(&OrderedFloat(a.confidence))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        let items: Vec<Item<'_>> = ranked
            .iter()
            .zip(&anchored)
            .flat_map(|(entity, group)| {
                std::iter::once(Item::Entity(entity)).chain(group.iter().copied().map(Item::Relation))
            })
            .collect();

        let names: HashMap<&str, &str> = ranked
            .iter()
            .map(|e| (e.id.as_str(), e.name().unwrap_or(e.id.as_str())))
            .collect();
        let display = |id: &str| -> String {
            let canonical_id = canonical(id);
            names
                .get(canonical_id.as_str())
                .map(|name| name.to_string())
                .unwrap_or(canonical_id)
        };

        let mut built = BuiltContext::default();
        let mut used = 0usize;
        for (idx, item) in items.iter().enumerate() {
            let line = match item {
                Item::Entity(entity) => format_entity(entity),
                Item::Relation(relation) => format_relation(relation, &display),
            };
            let cost = line.chars().count() + 1;
            if used + cost > self.budget_chars {
                built.truncated_items = items.len() - idx;
                break;
            }
            used += cost;
            built.text.push_str(&line);
            built.text.push('\n');
            match item {
                Item::Entity(entity) => built.entities.push(entity.id.clone()),
                Item::Relation(relation) => built.relations.push(relation.id.clone()),
            }
        }

        if built.truncated_items > 0 {
            tracing::debug!(
                budget = self.budget_chars,
                truncated = built.truncated_items,
                "context truncated"
            );
        }
        built
    }
}

fn format_entity(entity: &Entity) -> String {
    let mut line = format!("Entity: {}", entity.name().unwrap_or(&entity.id));
    if !entity.types.is_empty() {
        let types: Vec<&str> = entity.types.iter().map(String::as_str).collect();
        line.push_str(&format!(" [{}]", types.join(", ")));
    }
    let attributes: Vec<String> = entity
        .attributes
        .iter()
        .filter(|(key, _)| key.as_str() != NAME_ATTRIBUTE)
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    if !attributes.is_empty() {
        line.push_str(&format!(" {{{}}}", attributes.join(", ")));
    }
    line
}

fn format_relation(relation: &Relation, display: &impl Fn(&str) -> String) -> String {
    let object = match &relation.object {
        RelationObject::Entity(id) => display(id),
        RelationObject::Literal(value) => format!("\"{}\"", value),
    };
    format!(
        "  Relation: {} --{}--> {} ({:.2})",
        display(&relation.subject_entity_id),
        relation.predicate_iri,
        object,
        relation.confidence
    )
}
