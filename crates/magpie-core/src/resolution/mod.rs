//! Entity resolution: clustering, canonicalization, linking and filtering.
//!
//! [`EntityResolver`] drives a batch through every stage; the pieces are
//! usable on their own for offline analysis and tests.

mod canonical;
mod clusterer;
mod config;
mod filter;
mod index;
mod linker;
mod orchestrator;

pub use canonical::{CanonicalSelection, CanonicalSelector};
pub use clusterer::{Clusterer, ClusteringStats};
pub use config::ResolutionConfig;
pub use filter::{ConfidenceFilter, FilterOutcome, GroundingFilter};
pub use index::{CanonicalIndex, Partition, PartitionGuards};
pub use linker::{
    resolve_canonical, resolve_canonical_in_store, LinkLookup, SameAsLinkLog, SameAsLinker,
};
pub use orchestrator::{
    BatchState, BatchTransition, EntityResolver, ResolutionResult, ResolutionStats, SkippedItem,
};
