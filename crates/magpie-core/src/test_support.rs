//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ordered_float::OrderedFloat;

use crate::error::{MagpieError, MagpieResult};
use crate::resolution::{LinkLookup, SameAsLinkLog};
use crate::similarity::cosine_similarity;
use crate::traits::{Embedder, GraphStore};
use crate::types::{
    BlockingKey, Entity, EntityCluster, EntityStatus, RejectedRelation, Relation, ResolutionCommit,
    SameAsLink,
};

#[derive(Default)]
struct State {
    entities: BTreeMap<String, Entity>,
    links: SameAsLinkLog,
    clusters: Vec<EntityCluster>,
    relations: BTreeMap<String, Relation>,
    rejected: Vec<(String, RejectedRelation)>,
}

/// Minimal `GraphStore` with failure injection.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
    hydrations: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with a retryable error.
    pub(crate) fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    pub(crate) fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn hydrations(&self) -> usize {
        self.hydrations.load(Ordering::SeqCst)
    }

    pub(crate) fn cluster_count(&self) -> usize {
        self.state.lock().map(|s| s.clusters.len()).unwrap_or(0)
    }

    /// Append a link directly, bypassing resolution.
    pub(crate) fn insert_link(&self, link: SameAsLink) {
        if let Ok(mut state) = self.state.lock() {
            state.links.append(link);
        }
    }

    fn lock(&self) -> MagpieResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| MagpieError::internal(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn commit(&self, commit: &ResolutionCommit) -> MagpieResult<()> {
        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(MagpieError::graph_store("injected commit failure"));
        }

        let mut state = self.lock()?;
        for entity in &commit.entities {
            state.entities.insert(entity.id.clone(), entity.clone());
        }
        for link in &commit.links {
            state.links.append(link.clone());
        }
        state.clusters.extend(commit.clusters.iter().cloned());
        for relation in &commit.relations {
            state.relations.insert(relation.id.clone(), relation.clone());
        }
        for rejected in &commit.rejected_relations {
            state.rejected.push((commit.batch_id.clone(), rejected.clone()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> MagpieResult<Option<Entity>> {
        Ok(self.lock()?.entities.get(id).cloned())
    }

    async fn canonical_entities(&self, key: &BlockingKey) -> MagpieResult<Vec<Entity>> {
        self.hydrations.fetch_add(1, Ordering::SeqCst);
        let state = self.lock()?;
        Ok(state
            .entities
            .values()
            .filter(|e| e.is_active() && state.links.active_link(&e.id).is_none())
            .filter(|e| e.blocking_keys(3).contains(key))
            .cloned()
            .collect())
    }

    async fn active_same_as_link(&self, from_entity_id: &str) -> MagpieResult<Option<SameAsLink>> {
        Ok(self.lock()?.links.active_link(from_entity_id).cloned())
    }

    async fn linked_aliases(&self, canonical_id: &str) -> MagpieResult<Vec<String>> {
        let state = self.lock()?;
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([canonical_id.to_string()]);
        while let Some(current) = queue.pop_front() {
            let retired = state.entities.values().filter_map(|e| match &e.status {
                EntityStatus::Retired { canonical_id } if *canonical_id == current => {
                    Some(e.id.clone())
                }
                _ => None,
            });
            let linked = state.links.sources_of(&current).into_iter().map(str::to_string);
            for alias in retired.chain(linked).collect::<Vec<_>>() {
                if alias != canonical_id && seen.insert(alias.clone()) {
                    queue.push_back(alias);
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    async fn relations_touching(&self, entity_id: &str) -> MagpieResult<Vec<Relation>> {
        Ok(self
            .lock()?
            .relations
            .values()
            .filter(|r| r.entity_ids().any(|id| id == entity_id))
            .cloned()
            .collect())
    }

    async fn search_embeddings(&self, query: &[f32], limit: usize) -> MagpieResult<Vec<(String, f32)>> {
        let state = self.lock()?;
        let mut hits: Vec<(String, f32)> = state
            .entities
            .values()
            .filter(|e| e.is_active())
            .filter_map(|e| {
                let vector = &e.embedding.as_ref()?.vector;
                Some((e.id.clone(), cosine_similarity(query, vector)?))
            })
            .collect();
        hits.sort_by(|a, b| OrderedFloat(b.1).cmp(&OrderedFloat(a.1)).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn rejected_relations(&self, batch_id: Option<&str>) -> MagpieResult<Vec<RejectedRelation>> {
        Ok(self
            .lock()?
            .rejected
            .iter()
            .filter(|(batch, _)| batch_id.map_or(true, |b| b == batch))
            .map(|(_, r)| r.clone())
            .collect())
    }
}

/// Embedder mapping text to a fixed vector by keyword, or failing on demand.
pub(crate) struct KeywordEmbedder {
    pub(crate) keywords: Vec<(&'static str, Vec<f32>)>,
    pub(crate) fail: bool,
    pub(crate) calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub(crate) fn new(keywords: Vec<(&'static str, Vec<f32>)>) -> Self {
        Self {
            keywords,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            keywords: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> MagpieResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MagpieError::embedding("embedding backend unavailable"));
        }
        let lowered = text.to_lowercase();
        Ok(self
            .keywords
            .iter()
            .find(|(word, _)| lowered.contains(word))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| vec![0.0; self.dimension()]))
    }

    fn dimension(&self) -> usize {
        self.keywords.first().map(|(_, v)| v.len()).unwrap_or(2)
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}
