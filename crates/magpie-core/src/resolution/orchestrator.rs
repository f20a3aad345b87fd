//! Entity resolution orchestrator.
//!
//! Runs one extraction batch through
//! `Extracted -> Clustered -> Canonicalized -> Linked -> Filtered -> Committed`.
//! Any failure fails the attempt; a retry starts again from `Extracted` with
//! exponential backoff. Every stage is deterministic for a given batch and
//! store state, so a retried batch converges on the same result.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};
use crate::ratelimit::RateLimitedEmbedder;
use crate::similarity::SimilarityEngine;
use crate::traits::{Embedder, GraphStore, OntologyValidator};
use crate::types::{
    BatchStage, Embedding, Entity, EntityCluster, ExtractionBatch, Mention, RejectedEntity,
    RejectedRelation, Relation, ResolutionCommit, SameAsLink,
};

use super::canonical::{CanonicalSelection, CanonicalSelector};
use super::clusterer::{Clusterer, ClusteringStats};
use super::config::ResolutionConfig;
use super::filter::{ConfidenceFilter, GroundingFilter};
use super::index::CanonicalIndex;
use super::linker::{resolve_canonical_in_store, SameAsLinker};

/// Where a batch is in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchState {
    /// The stage completed.
    Stage { stage: BatchStage },
    /// The attempt failed at a stage.
    Failed { stage: BatchStage, cause: String },
}

/// One entry in a batch's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTransition {
    /// 1-based attempt number.
    pub attempt: usize,
    /// State reached.
    pub state: BatchState,
}

/// An input item skipped during validation.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    /// Id of the skipped mention, entity or relation.
    pub item_id: String,
    /// Validation code.
    pub code: ErrorCode,
    /// Human-readable reason.
    pub message: String,
}

/// Counters for one successful batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionStats {
    /// Mentions submitted, before validation.
    pub mentions_in: usize,
    /// Entities submitted, before validation.
    pub entities_in: usize,
    /// Relations submitted, before validation.
    pub relations_in: usize,
    /// Pair comparison counters from the clusterer.
    pub clustering: ClusteringStats,
    /// Entities that received an embedding during back-fill.
    pub embeddings_backfilled: usize,
    /// Entities left without an embedding after a failed back-fill.
    pub embedding_failures: usize,
    /// Evidence spans detached for low confidence.
    pub detached_evidence: usize,
}

/// Output of [`EntityResolver::resolve_batch`].
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    /// The resolved batch.
    pub batch_id: String,
    /// Attempts used, including the successful one.
    pub attempts: usize,
    /// Committed clusters, singletons included.
    pub clusters: Vec<EntityCluster>,
    /// Same-as links appended by this batch.
    pub links: Vec<SameAsLink>,
    /// Committed canonical entities, with merged attributes.
    pub canonical_entities: Vec<Entity>,
    /// Committed non-canonical cluster members.
    pub retired_entities: Vec<Entity>,
    /// Relations that passed the grounding filter and were committed.
    pub kept_relations: Vec<Relation>,
    /// Review side channel.
    pub rejected_relations: Vec<RejectedRelation>,
    /// Entities dropped by the confidence floor or the ontology validator.
    pub rejected_entities: Vec<RejectedEntity>,
    /// Malformed items skipped during validation.
    pub skipped: Vec<SkippedItem>,
    /// Counters for the successful attempt.
    pub stats: ResolutionStats,
    /// Stage transitions and failures across every attempt.
    pub history: Vec<BatchTransition>,
}

/// Failure of one attempt.
#[derive(Debug)]
struct AttemptError {
    stage: BatchStage,
    error: MagpieError,
    entity_ids: Vec<String>,
}

impl AttemptError {
    fn at(stage: BatchStage, entity_ids: Vec<String>) -> impl FnOnce(MagpieError) -> Self {
        move |error| Self {
            stage,
            error,
            entity_ids,
        }
    }
}

/// Validated, possibly enriched, batch contents.
struct Extracted {
    mentions: Vec<Mention>,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    skipped: Vec<SkippedItem>,
    embeddings_backfilled: usize,
    embedding_failures: usize,
}

/// Resolves extraction batches into committed canonical entities.
pub struct EntityResolver<S, V> {
    store: S,
    validator: V,
    index: Arc<CanonicalIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    config: ResolutionConfig,
    clusterer: Clusterer,
    selector: CanonicalSelector,
    linker: SameAsLinker,
    filter: ConfidenceFilter,
}

impl<S: GraphStore, V: OntologyValidator> EntityResolver<S, V> {
    /// Create a resolver over `store`.
    ///
    /// Every resolver writing to the same store must share one `index`;
    /// cross-batch linking is only serialized between resolvers that do.
    pub fn new(
        store: S,
        validator: V,
        similarity: SimilarityEngine,
        config: ResolutionConfig,
        index: Arc<CanonicalIndex>,
    ) -> MagpieResult<Self> {
        config
            .validate()
            .map_err(|e| MagpieError::Configuration(e.to_string()))?;
        if index.blocking_prefix_len() != config.blocking_prefix_len {
            return Err(MagpieError::Configuration(format!(
                "canonical index uses blocking prefix length {}, resolution config {}",
                index.blocking_prefix_len(),
                config.blocking_prefix_len
            )));
        }
        similarity
            .config()
            .validate()
            .map_err(|e| MagpieError::Configuration(e.to_string()))?;

        let clusterer = Clusterer::new(similarity.clone(), config.cluster_threshold)
            .with_blocking_prefix_len(config.blocking_prefix_len)
            .with_exhaustive_pair_limit(config.exhaustive_pair_limit);
        let linker = SameAsLinker::new(similarity, config.link_threshold);
        let filter = ConfidenceFilter::new(
            config.min_entity_confidence,
            config.min_evidence_confidence,
            GroundingFilter::new(config.grounding_threshold),
        );

        Ok(Self {
            store,
            validator,
            index,
            embedder: None,
            config,
            clusterer,
            selector: CanonicalSelector::new(),
            linker,
            filter,
        })
    }

    /// Back-fill missing embeddings through a rate-limited embedder.
    pub fn with_embedder<E: Embedder + 'static>(mut self, embedder: RateLimitedEmbedder<E>) -> Self {
        self.embedder = Some(Arc::new(embedder));
        self
    }

    /// The shared canonical index.
    pub fn index(&self) -> &Arc<CanonicalIndex> {
        &self.index
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve one batch, retrying failed attempts with backoff.
    pub async fn resolve_batch(&self, batch: &ExtractionBatch) -> MagpieResult<ResolutionResult> {
        let history: Mutex<Vec<BatchTransition>> = Mutex::new(Vec::new());
        let attempts = AtomicUsize::new(0);
        let (history_ref, attempts_ref) = (&history, &attempts);

        let run = move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            match self.run_attempt(batch, attempt, history_ref).await {
                Ok(result) => Ok(result),
                Err(failure) => {
                    record(
                        history_ref,
                        &batch.batch_id,
                        attempt,
                        BatchState::Failed {
                            stage: failure.stage,
                            cause: failure.error.to_string(),
                        },
                    );
                    Err(failure)
                }
            }
        };

        let outcome = run
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(self.config.max_attempts.saturating_sub(1))
                    .with_min_delay(Duration::from_millis(self.config.retry_initial_delay_ms))
                    .with_max_delay(Duration::from_millis(self.config.retry_max_delay_ms)),
            )
            .when(|failure: &AttemptError| failure.error.is_retryable())
            .notify(|failure: &AttemptError, dur: Duration| {
                tracing::warn!(
                    batch_id = %batch.batch_id,
                    stage = %failure.stage,
                    error = %failure.error,
                    "batch attempt failed, retrying in {:?}",
                    dur
                );
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let history = history.lock().map(|h| h.clone()).unwrap_or_default();

        match outcome {
            Ok(mut result) => {
                result.attempts = attempts;
                result.history = history;
                tracing::info!(
                    batch_id = %batch.batch_id,
                    attempts,
                    clusters = result.clusters.len(),
                    links = result.links.len(),
                    rejected_relations = result.rejected_relations.len(),
                    "batch committed"
                );
                Ok(result)
            }
            Err(failure) => {
                tracing::error!(
                    batch_id = %batch.batch_id,
                    stage = %failure.stage,
                    attempts,
                    error = %failure.error,
                    "batch failed"
                );
                Err(MagpieError::BatchFailed {
                    batch_id: batch.batch_id.clone(),
                    stage: failure.stage,
                    cause: failure.error.to_string(),
                    entity_ids: failure.entity_ids,
                    attempts,
                })
            }
        }
    }

    async fn run_attempt(
        &self,
        batch: &ExtractionBatch,
        attempt: usize,
        history: &Mutex<Vec<BatchTransition>>,
    ) -> Result<ResolutionResult, AttemptError> {
        let batch_id = batch.batch_id.as_str();
        let stage_done = |stage: BatchStage| {
            record(history, batch_id, attempt, BatchState::Stage { stage });
        };

        // Extracted
        let extracted = self.extract(batch).await;
        stage_done(BatchStage::Extracted);

        // Clustered
        let (candidates, clustering) = self.clusterer.cluster(&extracted.entities);
        stage_done(BatchStage::Clustered);

        // Canonicalized
        let entities_by_id: HashMap<&str, &Entity> = extracted
            .entities
            .iter()
            .map(|e| (e.id.as_str(), e))
            .collect();
        let mentions_by_id: HashMap<&str, &Mention> = extracted
            .mentions
            .iter()
            .map(|m| (m.id.as_str(), m))
            .collect();
        let mut selections: Vec<CanonicalSelection> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let selection = self
                .selector
                .select(candidate, &entities_by_id, &mentions_by_id)
                .map_err(AttemptError::at(
                    BatchStage::Canonicalized,
                    candidate.member_ids().to_vec(),
                ))?;
            selections.push(selection);
        }
        stage_done(BatchStage::Canonicalized);

        // Linked: partition locks are held from here until the index update.
        let batch_ids: HashSet<&str> = entities_by_id.keys().copied().collect();
        let all_ids = || -> Vec<String> { extracted.entities.iter().map(|e| e.id.clone()).collect() };
        // Merged canonicals can carry type/prefix pairs no single member had.
        let keys: BTreeSet<_> = extracted
            .entities
            .iter()
            .chain(selections.iter().map(|s| &s.canonical))
            .flat_map(|e| e.blocking_keys(self.config.blocking_prefix_len))
            .collect();
        let mut guards = self
            .index
            .lock_partitions(keys, &self.store)
            .await
            .map_err(AttemptError::at(BatchStage::Linked, all_ids()))?;

        let mut links: HashMap<String, SameAsLink> = HashMap::new();
        for selection in &selections {
            let candidates: Vec<Entity> = guards
                .candidates(&selection.canonical)
                .map_err(AttemptError::at(
                    BatchStage::Linked,
                    selection.cluster.member_ids.iter().cloned().collect(),
                ))?
                .into_iter()
                .filter(|c| !batch_ids.contains(c.id.as_str()))
                .collect();
            let Some(mut link) = self.linker.decide(&selection.canonical, &candidates) else {
                continue;
            };

            let target = resolve_canonical_in_store(
                &self.store,
                &link.to_canonical_entity_id,
                self.config.max_link_hops,
            )
            .await
            .map_err(AttemptError::at(
                BatchStage::Linked,
                vec![selection.canonical.id.clone(), link.to_canonical_entity_id.clone()],
            ))?;
            if batch_ids.contains(target.as_str()) {
                continue;
            }
            link.to_canonical_entity_id = target;
            links.insert(selection.canonical.id.clone(), link);
        }
        stage_done(BatchStage::Linked);

        // Filtered
        let mut resolvable: HashMap<String, String> = HashMap::new();
        for selection in &selections {
            for member in &selection.cluster.member_ids {
                resolvable.insert(member.clone(), selection.canonical.id.clone());
            }
        }
        let external: BTreeSet<&str> = extracted
            .relations
            .iter()
            .flat_map(|r| r.entity_ids())
            .filter(|id| !resolvable.contains_key(*id))
            .collect();
        for id in external {
            let known = self
                .store
                .get_entity(id)
                .await
                .map_err(AttemptError::at(BatchStage::Filtered, vec![id.to_string()]))?;
            if known.is_some() {
                resolvable.insert(id.to_string(), id.to_string());
            }
        }

        let outcome = self.filter.apply(
            selections.iter().map(|s| s.canonical.clone()).collect(),
            extracted.relations.clone(),
            &resolvable,
            &self.validator,
        );
        let kept_ids: HashSet<&str> = outcome
            .kept_entities
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        let kept: Vec<&CanonicalSelection> = selections
            .iter()
            .filter(|s| kept_ids.contains(s.canonical.id.as_str()))
            .collect();

        let commit = ResolutionCommit {
            batch_id: batch.batch_id.clone(),
            entities: kept
                .iter()
                .flat_map(|s| std::iter::once(&s.canonical).chain(s.retired.iter()))
                .cloned()
                .collect(),
            clusters: kept.iter().map(|s| s.cluster.clone()).collect(),
            links: kept
                .iter()
                .filter_map(|s| links.get(&s.canonical.id).cloned())
                .collect(),
            relations: outcome.kept_relations.clone(),
            rejected_relations: outcome.rejected_relations.clone(),
        };
        stage_done(BatchStage::Filtered);

        // Committed
        self.store.commit(&commit).await.map_err(AttemptError::at(
            BatchStage::Committed,
            commit.entities.iter().map(|e| e.id.clone()).collect(),
        ))?;

        for selection in &kept {
            for retired in &selection.retired {
                guards.retire(&retired.id);
            }
            if links.contains_key(&selection.canonical.id) {
                guards.retire(&selection.canonical.id);
            } else {
                guards.register(&selection.canonical).map_err(AttemptError::at(
                    BatchStage::Committed,
                    vec![selection.canonical.id.clone()],
                ))?;
            }
        }
        drop(guards);
        stage_done(BatchStage::Committed);

        Ok(ResolutionResult {
            batch_id: batch.batch_id.clone(),
            attempts: attempt,
            clusters: commit.clusters,
            links: commit.links,
            canonical_entities: kept.iter().map(|s| s.canonical.clone()).collect(),
            retired_entities: kept.iter().flat_map(|s| s.retired.iter().cloned()).collect(),
            kept_relations: commit.relations,
            rejected_relations: commit.rejected_relations,
            rejected_entities: outcome.rejected_entities,
            skipped: extracted.skipped,
            stats: ResolutionStats {
                mentions_in: batch.mentions.len(),
                entities_in: batch.entities.len(),
                relations_in: batch.relations.len(),
                clustering,
                embeddings_backfilled: extracted.embeddings_backfilled,
                embedding_failures: extracted.embedding_failures,
                detached_evidence: outcome.detached_evidence,
            },
            history: Vec::new(),
        })
    }

    /// Validate items, skipping malformed ones, and back-fill embeddings.
    async fn extract(&self, batch: &ExtractionBatch) -> Extracted {
        let mut skipped = Vec::new();

        let mentions = keep_valid(&batch.mentions, |m| &m.id, Mention::validate, &mut skipped);
        let mut entities = keep_valid(&batch.entities, |e| &e.id, Entity::validate, &mut skipped);
        let relations = keep_valid(&batch.relations, |r| &r.id, Relation::validate, &mut skipped);

        for item in &skipped {
            tracing::warn!(
                batch_id = %batch.batch_id,
                item_id = %item.item_id,
                code = item.code.as_str(),
                "skipping invalid item: {}",
                item.message
            );
        }

        let (embeddings_backfilled, embedding_failures) = match &self.embedder {
            Some(embedder) if self.config.backfill_embeddings => {
                backfill_embeddings(embedder.as_ref(), &mut entities).await
            }
            _ => (0, 0),
        };

        Extracted {
            mentions,
            entities,
            relations,
            skipped,
            embeddings_backfilled,
            embedding_failures,
        }
    }
}

fn record(history: &Mutex<Vec<BatchTransition>>, batch_id: &str, attempt: usize, state: BatchState) {
    tracing::debug!(batch_id, attempt, ?state, "batch transition");
    if let Ok(mut history) = history.lock() {
        history.push(BatchTransition { attempt, state });
    }
}

/// Keep valid items with unseen ids, recording the rest as skipped.
fn keep_valid<T: Clone>(
    items: &[T],
    id: impl Fn(&T) -> &String,
    validate: impl Fn(&T) -> MagpieResult<()>,
    skipped: &mut Vec<SkippedItem>,
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let item_id = id(item);
        let problem = match validate(item) {
            Err(err) => Some((err.code(), err.to_string())),
            Ok(()) if !seen.insert(item_id.clone()) => {
                Some((ErrorCode::ValInvalidInput, format!("duplicate id '{}'", item_id)))
            }
            Ok(()) => None,
        };
        match problem {
            Some((code, message)) => skipped.push(SkippedItem {
                item_id: item_id.clone(),
                code,
                message,
            }),
            None => kept.push(item.clone()),
        }
    }
    kept
}

/// Embed named entities that lack an embedding. Failures leave the entity as is.
async fn backfill_embeddings(embedder: &dyn Embedder, entities: &mut [Entity]) -> (usize, usize) {
    let pending: Vec<(usize, String)> = entities
        .iter()
        .enumerate()
        .filter(|(_, e)| e.embedding.is_none())
        .filter_map(|(i, e)| e.name().map(|n| (i, n.to_string())))
        .collect();
    if pending.is_empty() {
        return (0, 0);
    }

    let results = join_all(pending.iter().map(|(_, name)| embedder.embed(name))).await;

    let mut filled = 0;
    let mut failed = 0;
    for ((idx, _), result) in pending.iter().zip(results) {
        let entity = &mut entities[*idx];
        match result {
            Ok(vector) => {
                let embedding = Embedding::new(entity.id.clone(), vector, embedder.model_name());
                if embedding.validate().is_ok() {
                    entity.embedding = Some(embedding);
                    filled += 1;
                } else {
                    failed += 1;
                }
            }
            Err(err) => {
                tracing::warn!(entity = %entity.id, error = %err, "embedding back-fill failed");
                failed += 1;
            }
        }
    }
    (filled, failed)
}
