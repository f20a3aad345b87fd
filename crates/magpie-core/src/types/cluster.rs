//! Cluster and same-as link types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};

/// A group of entity ids the clusterer believes denote one real-world object,
/// before a canonical entity has been chosen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateCluster {
    member_ids: Vec<String>,
}

impl CandidateCluster {
    /// Build a candidate cluster. Members are sorted and deduplicated.
    ///
    /// Returns `None` for an empty member list.
    pub fn new(member_ids: impl IntoIterator<Item = String>) -> Option<Self> {
        let members: BTreeSet<String> = member_ids.into_iter().collect();
        if members.is_empty() {
            return None;
        }
        Some(Self {
            member_ids: members.into_iter().collect(),
        })
    }

    /// Member ids in ascending order. Never empty.
    pub fn member_ids(&self) -> &[String] {
        &self.member_ids
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// A finalized cluster with exactly one canonical entity, itself a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCluster {
    /// Cluster id, derived from the canonical entity id.
    pub id: String,
    /// All member entity ids, canonical included.
    pub member_ids: BTreeSet<String>,
    /// The chosen representative.
    pub canonical_entity_id: String,
}

impl EntityCluster {
    /// Finalize a cluster around `canonical_entity_id`.
    pub fn new(
        canonical_entity_id: impl Into<String>,
        member_ids: impl IntoIterator<Item = String>,
    ) -> MagpieResult<Self> {
        let canonical_entity_id = canonical_entity_id.into();
        let member_ids: BTreeSet<String> = member_ids.into_iter().collect();
        if !member_ids.contains(&canonical_entity_id) {
            return Err(MagpieError::invalid_item(
                &canonical_entity_id,
                ErrorCode::ValInvalidInput,
                "canonical entity is not a member of its cluster",
            ));
        }
        Ok(Self {
            id: Self::id_for(&canonical_entity_id),
            member_ids,
            canonical_entity_id,
        })
    }

    /// The cluster id for a given canonical entity.
    pub fn id_for(canonical_entity_id: &str) -> String {
        format!("cluster:{}", canonical_entity_id)
    }

    /// Members other than the canonical entity.
    pub fn retired_ids(&self) -> impl Iterator<Item = &str> {
        self.member_ids
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self.canonical_entity_id)
    }
}

/// A directed cross-batch identity assertion.
///
/// Links are append-only. A link is superseded only by a strictly
/// higher-confidence link from the same entity; the old link is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SameAsLink {
    /// The newly canonicalized entity.
    pub from_entity_id: String,
    /// The previously canonical entity it denotes.
    pub to_canonical_entity_id: String,
    /// Similarity score that justified the link.
    pub confidence: f32,
    /// When the link was recorded.
    pub created_at: DateTime<Utc>,
}

impl SameAsLink {
    /// Create a new link stamped with the current time.
    pub fn new(
        from_entity_id: impl Into<String>,
        to_canonical_entity_id: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            from_entity_id: from_entity_id.into(),
            to_canonical_entity_id: to_canonical_entity_id.into(),
            confidence,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_cluster_sorted_and_non_empty() {
        let cluster = CandidateCluster::new(vec!["b".to_string(), "a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(cluster.member_ids(), &["a".to_string(), "b".to_string()]);
        assert!(CandidateCluster::new(Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_entity_cluster_requires_member_canonical() {
        let ok = EntityCluster::new("a", vec!["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(ok.id, "cluster:a");
        assert_eq!(ok.retired_ids().collect::<Vec<_>>(), vec!["b"]);

        assert!(EntityCluster::new("z", vec!["a".to_string()]).is_err());
    }
}
