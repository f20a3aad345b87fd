//! Embedding records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};

/// An embedding vector owned by an entity or relation at a point in time.
///
/// Regenerating an embedding produces a new record; the old one is superseded
/// by the store, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Id of the entity or relation this vector describes.
    pub owner_id: String,
    /// The vector itself.
    pub vector: Vec<f32>,
    /// Model that produced the vector.
    pub model: String,
    /// When the vector was generated.
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    /// Create a new embedding stamped with the current time.
    pub fn new(owner_id: impl Into<String>, vector: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            vector,
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    /// Number of dimensions.
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Check the vector is non-empty and finite.
    pub fn validate(&self) -> MagpieResult<()> {
        if self.vector.is_empty() {
            return Err(MagpieError::invalid_item(
                &self.owner_id,
                ErrorCode::ValInvalidInput,
                "embedding vector is empty",
            ));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err(MagpieError::invalid_item(
                &self.owner_id,
                ErrorCode::ValOutOfRange,
                "embedding vector contains non-finite values",
            ));
        }
        Ok(())
    }
}
