//! Entity types and blocking keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};

use super::check_unit_interval;
use super::embedding::Embedding;

/// Attribute key holding an entity's primary name.
pub const NAME_ATTRIBUTE: &str = "name";

/// Type label used for blocking entities that carry no type.
pub const UNTYPED: &str = "_";

/// Lifecycle state of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntityStatus {
    /// Entity is live (either a canonical entity or not yet resolved).
    #[default]
    Active,
    /// Entity was absorbed into a cluster whose canonical entity is `canonical_id`.
    Retired { canonical_id: String },
}

/// A candidate node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier assigned at creation.
    pub id: String,
    /// Type labels (e.g. "organization").
    #[serde(default)]
    pub types: BTreeSet<String>,
    /// Literal attributes. The primary name lives under [`NAME_ATTRIBUTE`].
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Extraction confidence (0.0-1.0).
    pub confidence: f32,
    /// Mentions this entity was extracted from.
    #[serde(default)]
    pub source_mention_ids: BTreeSet<String>,
    /// Current embedding, if one was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: EntityStatus,
}

impl Entity {
    /// Create a new active entity with a primary name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(NAME_ATTRIBUTE.to_string(), name.into());
        Self {
            id: id.into(),
            types: BTreeSet::new(),
            attributes,
            confidence: 1.0,
            source_mention_ids: BTreeSet::new(),
            embedding: None,
            status: EntityStatus::Active,
        }
    }

    /// Add a type label.
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.types.insert(entity_type.into());
        self
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Record a source mention.
    pub fn with_mention(mut self, mention_id: impl Into<String>) -> Self {
        self.source_mention_ids.insert(mention_id.into());
        self
    }

    /// Attach an embedding vector.
    pub fn with_embedding(mut self, vector: Vec<f32>, model: impl Into<String>) -> Self {
        self.embedding = Some(Embedding::new(self.id.clone(), vector, model));
        self
    }

    /// The primary name, if any.
    pub fn name(&self) -> Option<&str> {
        self.attributes.get(NAME_ATTRIBUTE).map(String::as_str)
    }

    /// The primary name after normalization, if it is non-empty.
    pub fn normalized_name(&self) -> Option<String> {
        self.name()
            .map(normalize_name)
            .filter(|normalized| !normalized.is_empty())
    }

    /// Whether the entity is still active.
    pub fn is_active(&self) -> bool {
        matches!(self.status, EntityStatus::Active)
    }

    /// Blocking keys for this entity, one per type label.
    pub fn blocking_keys(&self, prefix_len: usize) -> Vec<BlockingKey> {
        let prefix: String = self
            .normalized_name()
            .map(|n| n.chars().take(prefix_len).collect())
            .unwrap_or_default();

        if self.types.is_empty() {
            return vec![BlockingKey::new(UNTYPED, prefix)];
        }
        self.types
            .iter()
            .map(|t| BlockingKey::new(normalize_name(t), prefix.clone()))
            .collect()
    }

    /// Check the entity is well formed.
    pub fn validate(&self) -> MagpieResult<()> {
        if self.id.trim().is_empty() {
            return Err(MagpieError::invalid_item(
                &self.id,
                ErrorCode::ValMissingField,
                "entity id is empty",
            ));
        }
        check_unit_interval(&self.id, "entity confidence", self.confidence)?;
        if let Some(embedding) = &self.embedding {
            embedding.validate().map_err(|_| {
                MagpieError::invalid_item(
                    &self.id,
                    ErrorCode::ValOutOfRange,
                    "entity embedding is empty or non-finite",
                )
            })?;
        }
        Ok(())
    }
}

/// Normalize a name for comparison: lowercase, punctuation to spaces,
/// whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Coarse index key used to limit candidate comparisons: a type label plus a
/// prefix of the normalized name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockingKey {
    /// Normalized type label, or [`UNTYPED`].
    pub entity_type: String,
    /// Leading characters of the normalized name.
    pub prefix: String,
}

impl BlockingKey {
    /// Create a new blocking key.
    pub fn new(entity_type: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            prefix: prefix.into(),
        }
    }
}

impl fmt::Display for BlockingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.prefix)
    }
}
