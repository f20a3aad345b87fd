//! Configuration for GraphRAG retrieval.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for seeding, traversal, fusion and context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Entities taken from vector search. Default: 10
    pub top_k: usize,

    /// Maximum traversal depth from the seed set.
    /// Prevents unbounded traversal. Default: 2
    pub max_hops: usize,

    /// RRF k parameter. Must be positive. Default: 60
    pub rrf_k: f64,

    /// Wall-clock budget for one query in milliseconds. Default: 2000
    pub timeout_ms: u64,

    /// Maximum characters in the formatted context. Default: 4000
    pub context_budget_chars: usize,

    /// Minimum grounding confidence for relations in the context. Default: 0.8
    pub grounding_threshold: f32,

    /// Hop guard when resolving ids to canonical entities. Default: 16
    pub max_link_hops: usize,

    /// Cap on entities visited by one traversal. Default: 1000
    pub max_visited: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            max_hops: 2,
            rrf_k: 60.0,
            timeout_ms: 2000,
            context_budget_chars: 4000,
            grounding_threshold: 0.8,
            max_link_hops: 16,
            max_visited: 1000,
        }
    }
}

impl RetrievalConfig {
    /// Query timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.top_k == 0 {
            return Err("top_k must be at least 1");
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err("rrf_k must be positive");
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.grounding_threshold) {
            return Err("grounding_threshold must be between 0.0 and 1.0");
        }
        if self.max_link_hops == 0 {
            return Err("max_link_hops must be at least 1");
        }
        if self.max_visited == 0 {
            return Err("max_visited must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = RetrievalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_rrf_k() {
        let config = RetrievalConfig {
            rrf_k: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
