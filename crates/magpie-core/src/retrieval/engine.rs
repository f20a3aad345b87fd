//! GraphRAG query engine.
//!
//! Seeds come from vector search over entity embeddings plus any ids the
//! caller supplies. A bounded traversal expands the seeds, the two rankings
//! are fused with RRF, and the grounded relations between the surviving
//! entities are formatted into a context string. Queries never write to the
//! store.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{MagpieError, MagpieResult};
use crate::ratelimit::RateLimitedEmbedder;
use crate::resolution::{resolve_canonical_in_store, GroundingFilter};
use crate::traits::{Embedder, GraphStore};
use crate::types::{Entity, Relation};

use super::config::RetrievalConfig;
use super::context::ContextBuilder;
use super::fusion::{FusedItem, RrfFusion};
use super::traversal::{within, GraphTraversal};

/// A retrieval request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language query text.
    pub text: String,
    /// Entity ids to seed traversal with, in addition to vector hits.
    pub seed_ids: Vec<String>,
    /// Overrides the configured traversal depth.
    pub max_hops: Option<usize>,
    /// Overrides the configured query timeout.
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    /// Create a request for `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Add a seed entity id.
    pub fn with_seed(mut self, entity_id: impl Into<String>) -> Self {
        self.seed_ids.push(entity_id.into());
        self
    }

    /// Set the traversal depth for this query.
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    /// Set the timeout for this query.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextResult {
    /// Formatted context text.
    pub context: String,
    /// Ranked canonical entities, best first.
    pub entities: Vec<Entity>,
    /// Grounded relations touched during traversal.
    pub relations: Vec<Relation>,
    /// Fused ranking with per-list ranks.
    pub fused: Vec<FusedItem>,
    /// Items left out of `context` by the character budget.
    pub truncated_items: usize,
    /// Set when the timeout expired or the query could not be embedded.
    pub partial: bool,
    /// Touched relations dropped by the grounding filter.
    pub rejected_relation_count: usize,
}

/// Retrieval over a committed entity graph.
pub struct GraphRagEngine<S, E> {
    store: S,
    embedder: RateLimitedEmbedder<E>,
    config: RetrievalConfig,
    fusion: RrfFusion,
    grounding: GroundingFilter,
    context: ContextBuilder,
}

impl<S: GraphStore, E: Embedder> GraphRagEngine<S, E> {
    /// Create an engine. Fails with a configuration error on invalid settings.
    pub fn new(store: S, embedder: RateLimitedEmbedder<E>, config: RetrievalConfig) -> MagpieResult<Self> {
        config
            .validate()
            .map_err(|e| MagpieError::Configuration(e.to_string()))?;
        Ok(Self {
            store,
            embedder,
            fusion: RrfFusion::new(config.rrf_k)?,
            grounding: GroundingFilter::new(config.grounding_threshold),
            context: ContextBuilder::new(config.context_budget_chars),
            config,
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Answer a query with a ranked, grounded context.
    ///
    /// Timeouts and embedding failures do not fail the query; they return
    /// what was gathered with `partial` set. Store errors are returned.
    pub async fn query(&self, request: &QueryRequest) -> MagpieResult<ContextResult> {
        let started = Instant::now();
        let deadline = started + request.timeout.unwrap_or_else(|| self.config.timeout());
        let max_hops = request.max_hops.unwrap_or(self.config.max_hops);
        let mut partial = false;

        let vector_hits = match self.vector_seeds(&request.text, started, deadline).await {
            Ok(hits) => hits,
            Err(MagpieError::RetrievalTimeout { elapsed_ms }) => {
                debug!(elapsed_ms, "query timed out during vector search");
                partial = true;
                Vec::new()
            }
            Err(err @ MagpieError::Embedding { .. }) | Err(err @ MagpieError::RateLimitTimeout { .. }) => {
                warn!(error = %err, "query embedding failed, using caller seeds only");
                partial = true;
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let mut seeds = vector_hits.clone();
        for seed in &request.seed_ids {
            if !seeds.contains(seed) {
                seeds.push(seed.clone());
            }
        }

        let outcome = GraphTraversal::new(&self.store, max_hops)
            .with_max_link_hops(self.config.max_link_hops)
            .with_max_visited(self.config.max_visited)
            .traverse(&seeds, deadline)
            .await?;
        partial |= outcome.timed_out;
        let traversal_ranked: Vec<&str> = outcome.ranked.iter().map(|hit| hit.id.as_str()).collect();

        let fused = self.fusion.fuse(&[
            vector_hits.iter().map(String::as_str).collect::<Vec<_>>(),
            traversal_ranked,
        ]);

        let (relations, rejected) = self.grounding.partition(outcome.touched_relations);
        if !rejected.is_empty() {
            debug!(rejected = rejected.len(), "ungrounded relations left out of context");
        }

        let mut entities = Vec::with_capacity(fused.len());
        for item in &fused {
            match within(started, deadline, self.store.get_entity(&item.id)).await {
                Ok(Some(entity)) => entities.push(entity),
                Ok(None) => debug!(entity_id = %item.id, "ranked entity missing from store"),
                Err(MagpieError::RetrievalTimeout { .. }) => {
                    partial = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let built = self.context.build(&entities, &relations, &outcome.canonical_of);
        debug!(
            seeds = seeds.len(),
            fused = fused.len(),
            relations = relations.len(),
            truncated = built.truncated_items,
            partial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query complete"
        );

        Ok(ContextResult {
            context: built.text,
            entities,
            relations,
            fused,
            truncated_items: built.truncated_items,
            partial,
            rejected_relation_count: rejected.len(),
        })
    }

    /// Canonical ids of the nearest entities to `text`, best first, deduplicated.
    async fn vector_seeds(&self, text: &str, started: Instant, deadline: Instant) -> MagpieResult<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = within(started, deadline, self.embedder.embed(text)).await?;
        let hits = within(
            started,
            deadline,
            self.store.search_embeddings(&vector, self.config.top_k),
        )
        .await?;

        let mut seen = HashSet::new();
        let mut ranked = Vec::with_capacity(hits.len());
        for (id, _score) in hits {
            let canonical = match within(
                started,
                deadline,
                resolve_canonical_in_store(&self.store, &id, self.config.max_link_hops),
            )
            .await
            {
                Ok(canonical) => canonical,
                Err(err @ MagpieError::LinkCycleGuardTripped { .. }) => {
                    tracing::error!(entity_id = %id, error = %err, "skipping vector hit");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if seen.insert(canonical.clone()) {
                ranked.push(canonical);
            }
        }
        Ok(ranked)
    }
}
