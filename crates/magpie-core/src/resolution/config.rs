//! Configuration for the resolution pipeline.

use serde::{Deserialize, Serialize};

/// Thresholds and limits for clustering, linking and filtering.
///
/// All thresholds are inclusive: a score equal to the threshold passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum pairwise similarity to merge two batch entities.
    /// Default: 0.85
    pub cluster_threshold: f32,

    /// Minimum similarity to link a batch canonical to an existing canonical.
    /// Default: 0.90
    pub link_threshold: f32,

    /// Minimum grounding confidence for a relation to be kept.
    /// Default: 0.8
    pub grounding_threshold: f32,

    /// Entities below this confidence are dropped before commit.
    /// Default: 0.3
    pub min_entity_confidence: f32,

    /// Evidence spans below this confidence are detached from their relation.
    /// Default: 0.5
    pub min_evidence_confidence: f32,

    /// Characters of normalized name used for blocking keys. Default: 3
    pub blocking_prefix_len: usize,

    /// Batches up to this size are compared pairwise in full; larger ones
    /// only compare entities sharing a blocking key. Default: 2000
    pub exhaustive_pair_limit: usize,

    /// Hop guard when following same-as links. Default: 16
    pub max_link_hops: usize,

    /// Attempts per batch, including the first. Default: 3
    pub max_attempts: usize,

    /// Backoff before the first retry. Default: 100ms
    pub retry_initial_delay_ms: u64,

    /// Backoff ceiling. Default: 5000ms
    pub retry_max_delay_ms: u64,

    /// Embed entities that arrive without an embedding, when an embedder is
    /// configured. Default: true
    pub backfill_embeddings: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: 0.85,
            link_threshold: 0.90,
            grounding_threshold: 0.8,
            min_entity_confidence: 0.3,
            min_evidence_confidence: 0.5,
            blocking_prefix_len: 3,
            exhaustive_pair_limit: 2000,
            max_link_hops: 16,
            max_attempts: 3,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 5000,
            backfill_embeddings: true,
        }
    }
}

impl ResolutionConfig {
    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        for value in [
            self.cluster_threshold,
            self.link_threshold,
            self.grounding_threshold,
            self.min_entity_confidence,
            self.min_evidence_confidence,
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err("thresholds must be between 0.0 and 1.0");
            }
        }
        if self.blocking_prefix_len == 0 {
            return Err("blocking_prefix_len must be at least 1");
        }
        if self.max_link_hops == 0 {
            return Err("max_link_hops must be at least 1");
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1");
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err("retry_initial_delay_ms must not exceed retry_max_delay_ms");
        }
        Ok(())
    }
}
