//! GraphRAG retrieval over the resolved entity graph.
//!
//! A query is answered in stages:
//! - Vector search seeds the ranking with the nearest canonical entities
//! - Bounded traversal expands the seeds through relations and aliases
//! - RRF fuses both rankings
//! - Grounded relations and ranked entities are formatted under a budget

mod config;
mod context;
mod engine;
mod fusion;
mod traversal;

pub use config::RetrievalConfig;
pub use context::{BuiltContext, ContextBuilder};
pub use engine::{ContextResult, GraphRagEngine, QueryRequest};
pub use fusion::{FusedItem, RrfFusion};
pub use traversal::{GraphTraversal, TraversalHit, TraversalOutcome};
