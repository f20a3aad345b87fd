//! Pairwise similarity between entity candidates.
//!
//! Combines three signals into one score in [0, 1]:
//! - Jaro-Winkler similarity of normalized primary names
//! - cosine similarity of embeddings, when both sides have one
//! - type compatibility (0 when the type sets are disjoint, else 1)
//!
//! Weights are renormalized over the signals that are actually available,
//! so an entity without an embedding is scored on name and type alone.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};
use crate::types::{normalize_name, Entity};

/// Weights and gates for the similarity engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Weight of the name signal. Default: 0.5
    pub string_weight: f32,
    /// Weight of the embedding signal. Default: 0.35
    pub embedding_weight: f32,
    /// Weight of the type-compatibility signal. Default: 0.15
    pub type_weight: f32,
    /// Score disjoint-type pairs 0 regardless of other signals. Default: false
    pub require_type_compatibility: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            string_weight: 0.5,
            embedding_weight: 0.35,
            type_weight: 0.15,
            require_type_compatibility: false,
        }
    }
}

impl SimilarityConfig {
    /// Validate that weights are finite, non-negative and not all zero.
    pub fn validate(&self) -> Result<(), &'static str> {
        let weights = [self.string_weight, self.embedding_weight, self.type_weight];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err("similarity weights must be finite");
        }
        if self.string_weight < 0.0 || self.embedding_weight < 0.0 || self.type_weight < 0.0 {
            return Err("similarity weights must be non-negative");
        }
        if self.string_weight + self.embedding_weight <= 0.0 {
            return Err("at least one of string_weight or embedding_weight must be positive");
        }
        Ok(())
    }
}

/// Per-signal scores behind a similarity result.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    /// Name similarity, if both sides have a name.
    pub string: Option<f32>,
    /// Embedding similarity, if both sides have a usable embedding.
    pub embedding: Option<f32>,
    /// Type compatibility indicator.
    pub type_compatibility: f32,
    /// Combined score.
    pub score: f32,
}

/// Scores pairs of entities. Side-effect free.
#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine {
    config: SimilarityConfig,
}

impl SimilarityEngine {
    /// Create a new engine.
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    /// Get the config.
    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Score a pair, reporting malformed input as an error.
    pub fn score(&self, a: &Entity, b: &Entity) -> MagpieResult<f32> {
        self.breakdown(a, b).map(|b| b.score)
    }

    /// Score a pair, treating any computation failure as 0.
    pub fn score_or_zero(&self, a: &Entity, b: &Entity) -> f32 {
        match self.score(a, b) {
            Ok(score) => score,
            Err(err) => {
                tracing::warn!(left = %a.id, right = %b.id, error = %err, "similarity failed, scoring 0");
                0.0
            }
        }
    }

    /// Score a pair and return each contributing signal.
    pub fn breakdown(&self, a: &Entity, b: &Entity) -> MagpieResult<SimilarityBreakdown> {
        let string = match (a.normalized_name(), b.normalized_name()) {
            (Some(na), Some(nb)) => Some(strsim::jaro_winkler(&na, &nb) as f32),
            _ => None,
        };

        let embedding = match (&a.embedding, &b.embedding) {
            (Some(ea), Some(eb)) => {
                if ea.vector.len() != eb.vector.len() {
                    return Err(MagpieError::similarity(
                        &a.id,
                        &b.id,
                        ErrorCode::SimDimensionMismatch,
                        format!(
                            "embedding dimensions differ ({} vs {})",
                            ea.vector.len(),
                            eb.vector.len()
                        ),
                    ));
                }
                if ea.vector.iter().chain(eb.vector.iter()).any(|v| !v.is_finite()) {
                    return Err(MagpieError::similarity(
                        &a.id,
                        &b.id,
                        ErrorCode::SimNonFinite,
                        "embedding contains non-finite values",
                    ));
                }
                cosine_similarity(&ea.vector, &eb.vector).map(|c| c.clamp(0.0, 1.0))
            }
            _ => None,
        };

        let type_compatibility = if types_compatible(a, b) { 1.0 } else { 0.0 };

        // Type agreement alone says nothing about identity.
        if string.is_none() && embedding.is_none() {
            return Ok(SimilarityBreakdown {
                string,
                embedding,
                type_compatibility,
                score: 0.0,
            });
        }
        if self.config.require_type_compatibility && type_compatibility == 0.0 {
            return Ok(SimilarityBreakdown {
                string,
                embedding,
                type_compatibility,
                score: 0.0,
            });
        }

        let mut weighted = self.config.type_weight * type_compatibility;
        let mut total_weight = self.config.type_weight;
        if let Some(s) = string {
            weighted += self.config.string_weight * s;
            total_weight += self.config.string_weight;
        }
        if let Some(e) = embedding {
            weighted += self.config.embedding_weight * e;
            total_weight += self.config.embedding_weight;
        }

        let score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(SimilarityBreakdown {
            string,
            embedding,
            type_compatibility,
            score,
        })
    }
}

/// Types are compatible unless both sides are typed and share no type.
fn types_compatible(a: &Entity, b: &Entity) -> bool {
    if a.types.is_empty() || b.types.is_empty() {
        return true;
    }
    a.types
        .iter()
        .map(|t| normalize_name(t))
        .any(|ta| b.types.iter().any(|tb| normalize_name(tb) == ta))
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns `None` if either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}
