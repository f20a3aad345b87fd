//! Canonical entity selection and attribute merge.
//!
//! Members of a cluster are ranked by a total order, applied in sequence:
//! 1. highest confidence
//! 2. longest normalized mention text (normalized name if no mentions are known)
//! 3. earliest `(source_document_id, start_offset)` among its mentions, no mentions last
//! 4. lowest entity id
//!
//! The first member is the canonical entity. Because the order is total the
//! choice never depends on input order.

use std::cmp::Ordering;
use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::error::{ErrorCode, MagpieError, MagpieResult};
use crate::types::{normalize_name, CandidateCluster, Entity, EntityCluster, EntityStatus, Mention};

/// Result of canonicalizing one cluster.
#[derive(Debug, Clone)]
pub struct CanonicalSelection {
    /// The finalized cluster.
    pub cluster: EntityCluster,
    /// Canonical entity with attributes merged from the other members.
    pub canonical: Entity,
    /// Other members, marked retired in favour of the canonical.
    pub retired: Vec<Entity>,
}

/// Precomputed ranking keys for one member.
#[derive(Debug)]
struct RankKey<'a> {
    entity: &'a Entity,
    mention_len: usize,
    first_seen: Option<(&'a str, usize)>,
}

/// Picks one representative per cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalSelector;

impl CanonicalSelector {
    /// Create a selector.
    pub fn new() -> Self {
        Self
    }

    /// Canonicalize a candidate cluster.
    ///
    /// `entities` and `mentions` are lookups by id over the current batch.
    pub fn select(
        &self,
        candidate: &CandidateCluster,
        entities: &HashMap<&str, &Entity>,
        mentions: &HashMap<&str, &Mention>,
    ) -> MagpieResult<CanonicalSelection> {
        let mut keys = Vec::with_capacity(candidate.len());
        for id in candidate.member_ids() {
            let entity = entities.get(id.as_str()).ok_or_else(|| {
                MagpieError::invalid_item(
                    id,
                    ErrorCode::ValMissingField,
                    "cluster member is not part of the batch",
                )
            })?;
            keys.push(Self::rank_key(entity, mentions));
        }
        keys.sort_by(Self::compare);

        let Some(first) = keys.first() else {
            return Err(MagpieError::internal("cannot canonicalize an empty cluster"));
        };
        let canonical_id = first.entity.id.clone();

        let mut canonical = first.entity.clone();
        canonical.status = EntityStatus::Active;
        let mut retired = Vec::with_capacity(keys.len().saturating_sub(1));

        for key in keys.iter().skip(1) {
            let member = key.entity;
            for (attr, value) in &member.attributes {
                canonical
                    .attributes
                    .entry(attr.clone())
                    .or_insert_with(|| value.clone());
            }
            canonical.types.extend(member.types.iter().cloned());
            canonical
                .source_mention_ids
                .extend(member.source_mention_ids.iter().cloned());
            if canonical.embedding.is_none() {
                if let Some(embedding) = &member.embedding {
                    let mut inherited = embedding.clone();
                    inherited.owner_id = canonical_id.clone();
                    canonical.embedding = Some(inherited);
                }
            }

            let mut retired_member = member.clone();
            retired_member.status = EntityStatus::Retired {
                canonical_id: canonical_id.clone(),
            };
            retired.push(retired_member);
        }

        let cluster = EntityCluster::new(
            canonical_id.clone(),
            candidate.member_ids().iter().cloned(),
        )?;

        tracing::trace!(
            cluster_id = %cluster.id,
            canonical = %canonical_id,
            members = cluster.member_ids.len(),
            "selected canonical entity"
        );

        Ok(CanonicalSelection {
            cluster,
            canonical,
            retired,
        })
    }

    /// Rank two entities. `Less` means `a` is the better canonical.
    pub fn rank(a: &Entity, b: &Entity, mentions: &HashMap<&str, &Mention>) -> Ordering {
        Self::compare(&Self::rank_key(a, mentions), &Self::rank_key(b, mentions))
    }

    fn rank_key<'a>(entity: &'a Entity, mentions: &HashMap<&str, &'a Mention>) -> RankKey<'a> {
        let known: Vec<&Mention> = entity
            .source_mention_ids
            .iter()
            .filter_map(|id| mentions.get(id.as_str()).copied())
            .collect();

        let mention_len = if known.is_empty() {
            entity
                .normalized_name()
                .map(|n| n.chars().count())
                .unwrap_or(0)
        } else {
            known
                .iter()
                .map(|m| normalize_name(&m.text).chars().count())
                .max()
                .unwrap_or(0)
        };

        let first_seen = known
            .iter()
            .map(|m| (m.source_document_id.as_str(), m.start_offset))
            .min();

        RankKey {
            entity,
            mention_len,
            first_seen,
        }
    }

    fn compare(a: &RankKey<'_>, b: &RankKey<'_>) -> Ordering {
        OrderedFloat(b.entity.confidence)
            .cmp(&OrderedFloat(a.entity.confidence))
            .then_with(|| b.mention_len.cmp(&a.mention_len))
            .then_with(|| match (&a.first_seen, &b.first_seen) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.entity.id.cmp(&b.entity.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(entities: &[Entity], mentions: &[Mention]) -> CanonicalSelection {
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
        let mention_map: HashMap<&str, &Mention> =
            mentions.iter().map(|m| (m.id.as_str(), m)).collect();
        let candidate = CandidateCluster::new(entities.iter().map(|e| e.id.clone())).unwrap();
        CanonicalSelector::new()
            .select(&candidate, &by_id, &mention_map)
            .unwrap()
    }

    #[test]
    fn test_highest_confidence_wins() {
        let selection = select(
            &[
                Entity::new("e1", "Acme Corp").with_confidence(0.9),
                Entity::new("e2", "ACME Corporation").with_confidence(0.6),
            ],
            &[],
        );
        assert_eq!(selection.canonical.id, "e1");
        assert_eq!(selection.canonical.name(), Some("Acme Corp"));
        assert_eq!(selection.cluster.canonical_entity_id, "e1");
        assert_eq!(selection.retired.len(), 1);
        assert_eq!(
            selection.retired[0].status,
            EntityStatus::Retired {
                canonical_id: "e1".to_string()
            }
        );
    }

    #[test]
    fn test_longest_mention_breaks_confidence_tie() {
        let mentions = vec![
            Mention::new("m1", "Acme", "doc-a", 0, 4),
            Mention::new("m2", "Acme Corporation", "doc-b", 10, 26),
        ];
        let selection = select(
            &[
                Entity::new("e1", "Acme").with_mention("m1"),
                Entity::new("e2", "Acme").with_mention("m2"),
            ],
            &mentions,
        );
        assert_eq!(selection.canonical.id, "e2");
    }

    #[test]
    fn test_name_length_used_without_mentions() {
        let selection = select(
            &[
                Entity::new("e1", "Acme"),
                Entity::new("e2", "Acme Corporation"),
            ],
            &[],
        );
        assert_eq!(selection.canonical.id, "e2");
    }

    #[test]
    fn test_earliest_mention_breaks_length_tie() {
        let mentions = vec![
            Mention::new("m1", "Acme Corp", "doc-b", 0, 9),
            Mention::new("m2", "Acme Corp", "doc-a", 50, 59),
            Mention::new("m3", "Acme Corp", "doc-a", 5, 14),
        ];
        let selection = select(
            &[
                Entity::new("e1", "Acme Corp").with_mention("m1"),
                Entity::new("e2", "Acme Corp").with_mention("m2"),
                Entity::new("e3", "Acme Corp").with_mention("m3"),
            ],
            &mentions,
        );
        assert_eq!(selection.canonical.id, "e3");
    }

    #[test]
    fn test_entity_without_mentions_sorts_last() {
        let mentions = vec![Mention::new("m9", "Acme Corp", "doc-z", 900, 909)];
        let selection = select(
            &[
                Entity::new("a", "Acme Corp"),
                Entity::new("b", "Acme Corp").with_mention("m9"),
            ],
            &mentions,
        );
        assert_eq!(selection.canonical.id, "b");
    }

    #[test]
    fn test_lowest_id_is_final_tiebreak() {
        let entities = vec![Entity::new("e2", "Acme"), Entity::new("e1", "Acme")];
        let selection = select(&entities, &[]);
        assert_eq!(selection.canonical.id, "e1");

        let reversed: Vec<Entity> = entities.into_iter().rev().collect();
        assert_eq!(select(&reversed, &[]).canonical.id, "e1");
    }

    #[test]
    fn test_attribute_merge_fills_gaps_only() {
        let selection = select(
            &[
                Entity::new("e1", "Acme Corp")
                    .with_confidence(0.9)
                    .with_type("organization")
                    .with_attribute("country", "US")
                    .with_mention("m1"),
                Entity::new("e2", "ACME Corporation")
                    .with_confidence(0.6)
                    .with_type("company")
                    .with_attribute("country", "CA")
                    .with_attribute("founded", "1947")
                    .with_mention("m2")
                    .with_embedding(vec![0.1, 0.2], "m"),
            ],
            &[],
        );
        let canonical = &selection.canonical;
        assert_eq!(canonical.attributes["name"], "Acme Corp");
        assert_eq!(canonical.attributes["country"], "US");
        assert_eq!(canonical.attributes["founded"], "1947");
        assert_eq!(canonical.types.len(), 2);
        assert_eq!(canonical.source_mention_ids.len(), 2);
        assert_eq!(canonical.confidence, 0.9);
        assert_eq!(canonical.embedding.as_ref().unwrap().owner_id, "e1");
    }

    #[test]
    fn test_missing_member_is_error() {
        let entities = [Entity::new("e1", "Acme")];
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();
        let candidate = CandidateCluster::new(vec!["e1".to_string(), "ghost".to_string()]).unwrap();
        assert!(CanonicalSelector::new()
            .select(&candidate, &by_id, &HashMap::new())
            .is_err());
    }
}
