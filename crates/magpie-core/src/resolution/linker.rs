//! Cross-batch identity linking.
//!
//! New canonical entities are compared against prior canonical entities that
//! share a blocking key. A match at or above the link threshold produces a
//! same-as link; links are appended to a log and never rewritten. Readers
//! follow active links until they reach an entity with no outgoing link.

use std::collections::{HashMap, HashSet};

use crate::error::{MagpieError, MagpieResult};
use crate::similarity::SimilarityEngine;
use crate::traits::GraphStore;
use crate::types::{Entity, EntityStatus, SameAsLink};

/// Read access to active same-as links.
pub trait LinkLookup {
    /// The active link leaving `from_entity_id`, if any.
    fn active_link(&self, from_entity_id: &str) -> Option<&SameAsLink>;
}

/// Append-only same-as link log.
///
/// For each source entity the active link is the one with the highest
/// confidence. A later link replaces it only with strictly higher confidence
/// and a different target; every link stays in the log.
#[derive(Debug, Clone, Default)]
pub struct SameAsLinkLog {
    links: Vec<SameAsLink>,
    active: HashMap<String, usize>,
}

impl SameAsLinkLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a link. Returns true if it became the active link for its source.
    pub fn append(&mut self, link: SameAsLink) -> bool {
        let idx = self.links.len();
        let becomes_active = match self.active.get(&link.from_entity_id) {
            None => true,
            Some(&current) => {
                let current = &self.links[current];
                link.confidence > current.confidence
                    && link.to_canonical_entity_id != current.to_canonical_entity_id
            }
        };
        if becomes_active {
            self.active.insert(link.from_entity_id.clone(), idx);
        }
        self.links.push(link);
        becomes_active
    }

    /// Every link ever appended for a source, oldest first.
    pub fn history(&self, from_entity_id: &str) -> Vec<&SameAsLink> {
        self.links
            .iter()
            .filter(|l| l.from_entity_id == from_entity_id)
            .collect()
    }

    /// Sources whose active link points at `canonical_id`.
    pub fn sources_of(&self, canonical_id: &str) -> Vec<&str> {
        let mut sources: Vec<&str> = self
            .active
            .values()
            .map(|&idx| &self.links[idx])
            .filter(|l| l.to_canonical_entity_id == canonical_id)
            .map(|l| l.from_entity_id.as_str())
            .collect();
        sources.sort_unstable();
        sources
    }

    /// All links in append order.
    pub fn iter(&self) -> impl Iterator<Item = &SameAsLink> {
        self.links.iter()
    }

    /// Number of links in the log.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl LinkLookup for SameAsLinkLog {
    fn active_link(&self, from_entity_id: &str) -> Option<&SameAsLink> {
        self.active
            .get(from_entity_id)
            .map(|&idx| &self.links[idx])
    }
}

/// Follow active links from `entity_id` to the entity currently canonical for it.
///
/// Fails with `LinkCycleGuardTripped` if an entity is revisited or more than
/// `max_hops` links are followed.
pub fn resolve_canonical<L: LinkLookup + ?Sized>(
    links: &L,
    entity_id: &str,
    max_hops: usize,
) -> MagpieResult<String> {
    let mut current = entity_id.to_string();
    let mut visited = HashSet::from([current.clone()]);
    let mut path = vec![current.clone()];

    while let Some(link) = links.active_link(&current) {
        let next = link.to_canonical_entity_id.clone();
        path.push(next.clone());
        let hops = path.len() - 1;
        if hops > max_hops || !visited.insert(next.clone()) {
            tracing::error!(start = %entity_id, hops, ?path, "same-as link guard tripped");
            return Err(MagpieError::LinkCycleGuardTripped {
                start_entity_id: entity_id.to_string(),
                hops,
                path,
            });
        }
        current = next;
    }
    Ok(current)
}

/// Like [`resolve_canonical`], reading through a [`GraphStore`].
///
/// Retired cluster members hop to their cluster's canonical entity before
/// same-as links are followed.
pub async fn resolve_canonical_in_store<S: GraphStore + ?Sized>(
    store: &S,
    entity_id: &str,
    max_hops: usize,
) -> MagpieResult<String> {
    let mut current = entity_id.to_string();
    let mut visited = HashSet::from([current.clone()]);
    let mut path = vec![current.clone()];

    loop {
        let next = match store.get_entity(&current).await? {
            Some(Entity {
                status: EntityStatus::Retired { canonical_id },
                ..
            }) => Some(canonical_id),
            _ => store
                .active_same_as_link(&current)
                .await?
                .map(|link| link.to_canonical_entity_id),
        };
        let Some(next) = next else {
            return Ok(current);
        };

        path.push(next.clone());
        let hops = path.len() - 1;
        if hops > max_hops || !visited.insert(next.clone()) {
            tracing::error!(start = %entity_id, hops, ?path, "same-as link guard tripped");
            return Err(MagpieError::LinkCycleGuardTripped {
                start_entity_id: entity_id.to_string(),
                hops,
                path,
            });
        }
        current = next;
    }
}

/// Decides whether a new canonical entity is the same as a prior one.
#[derive(Debug, Clone)]
pub struct SameAsLinker {
    similarity: SimilarityEngine,
    threshold: f32,
}

impl SameAsLinker {
    /// Create a linker.
    pub fn new(similarity: SimilarityEngine, threshold: f32) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    /// Best-matching prior canonical for `entity`, as a link, if it clears the threshold.
    ///
    /// Ties on score go to the lowest candidate id. Candidates with the same
    /// id as `entity` are ignored.
    pub fn decide(&self, entity: &Entity, candidates: &[Entity]) -> Option<SameAsLink> {
        let mut best: Option<(&Entity, f32)> = None;
        for candidate in candidates.iter().filter(|c| c.id != entity.id) {
            let score = self.similarity.score_or_zero(entity, candidate);
            best = match best {
                Some((current, best_score))
                    if best_score > score
                        || (best_score == score && current.id <= candidate.id) =>
                {
                    Some((current, best_score))
                }
                _ => Some((candidate, score)),
            };
        }

        match best {
            Some((target, score)) if score >= self.threshold => {
                tracing::debug!(
                    from = %entity.id,
                    to = %target.id,
                    score,
                    "linking to prior canonical"
                );
                Some(SameAsLink::new(&entity.id, &target.id, score))
            }
            Some((target, score)) => {
                tracing::trace!(from = %entity.id, nearest = %target.id, score, "no link");
                None
            }
            None => None,
        }
    }
}
