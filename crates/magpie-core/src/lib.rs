//! magpie-core - Core library for magpie.
//!
//! This crate provides entity resolution over extraction batches and GraphRAG
//! retrieval over the resolved graph: similarity scoring, clustering,
//! canonical selection, same-as linking, grounding filters, a shared
//! embedding rate limiter and reciprocal rank fusion.
//!
//! # Example
//!
//! ```ignore
//! use magpie_core::{CanonicalIndex, EngineConfig, EntityResolver, GraphRagEngine, QueryRequest};
//!
//! let config = EngineConfig::from_file("magpie.toml")?;
//! let index = Arc::new(CanonicalIndex::new(config.resolution.blocking_prefix_len));
//! let resolver = EntityResolver::new(store.clone(), AcceptAll, SimilarityEngine::new(config.similarity.clone()), config.resolution.clone(), index)?;
//! let result = resolver.resolve_batch(&batch).await?;
//!
//! let engine = GraphRagEngine::new(store, embedder, config.retrieval.clone())?;
//! let context = engine.query(&QueryRequest::new("who founded Acme?")).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod ratelimit;
pub mod resolution;
pub mod retrieval;
pub mod similarity;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{EngineConfig, StoreConfig};
pub use error::{ErrorCode, MagpieError, MagpieResult};
pub use ratelimit::{EmbeddingRateLimiter, RateLimitConfig, RateLimitPermit, RateLimitedEmbedder};
pub use resolution::{
    resolve_canonical, CanonicalIndex, EntityResolver, ResolutionConfig, ResolutionResult,
    SameAsLinkLog,
};
pub use retrieval::{ContextResult, GraphRagEngine, QueryRequest, RetrievalConfig, RrfFusion};
pub use similarity::{SimilarityConfig, SimilarityEngine};
pub use traits::{AcceptAll, Embedder, GraphStore, OntologyValidator, Verdict};
pub use types::{
    BatchStage, BlockingKey, CandidateCluster, Entity, EntityCluster, EntityStatus, EvidenceSpan,
    ExtractionBatch, Mention, RejectedRelation, Relation, ResolutionCommit, SameAsLink,
};
