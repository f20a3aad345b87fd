//! Bounded breadth-first traversal over the committed graph.
//!
//! Starts from a seed set and follows relations in both directions, hopping
//! through same-as aliases so that facts attached to a retired or linked
//! entity reach its canonical. Uses an explicit queue and visited set, so
//! cycles in the graph cost nothing extra.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{MagpieError, MagpieResult};
use crate::resolution::resolve_canonical_in_store;
use crate::traits::GraphStore;
use crate::types::Relation;

/// An entity reached by traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalHit {
    /// Canonical entity id.
    pub id: String,
    /// Hops from the nearest seed (0 for seeds).
    pub hops: usize,
    /// Highest confidence among relations reaching it at `hops`.
    pub best_confidence: f32,
}

/// Result of one traversal.
#[derive(Debug, Clone, Default)]
pub struct TraversalOutcome {
    /// Reached entities: hops ascending, then best confidence descending, then id.
    pub ranked: Vec<TraversalHit>,
    /// Every relation read during traversal, by id.
    pub touched_relations: Vec<Relation>,
    /// Raw entity ids seen, mapped to their canonical id.
    pub canonical_of: HashMap<String, String>,
    /// Whether the deadline cut the traversal short.
    pub timed_out: bool,
}

/// Run `fut`, failing with `RetrievalTimeout` if `deadline` passes first.
pub(crate) async fn within<T>(
    started: Instant,
    deadline: Instant,
    fut: impl Future<Output = MagpieResult<T>>,
) -> MagpieResult<T> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(MagpieError::RetrievalTimeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

/// Breadth-first traversal bounded by hops, visit count and a deadline.
#[derive(Debug)]
pub struct GraphTraversal<'a, S: ?Sized> {
    store: &'a S,
    max_hops: usize,
    max_link_hops: usize,
    max_visited: usize,
}

impl<'a, S: GraphStore + ?Sized> GraphTraversal<'a, S> {
    /// Create a traversal over `store`.
    pub fn new(store: &'a S, max_hops: usize) -> Self {
        Self {
            store,
            max_hops,
            max_link_hops: 16,
            max_visited: 1000,
        }
    }

    /// Set the hop guard for canonical resolution.
    pub fn with_max_link_hops(mut self, max_link_hops: usize) -> Self {
        self.max_link_hops = max_link_hops;
        self
    }

    /// Cap the number of entities visited.
    pub fn with_max_visited(mut self, max_visited: usize) -> Self {
        self.max_visited = max_visited.max(1);
        self
    }

    /// Traverse from `seeds` until the frontier is exhausted or `deadline` passes.
    ///
    /// Seeds are resolved to canonical ids first. A seed whose link chain trips
    /// the cycle guard is skipped and logged. On timeout the entities reached
    /// so far are returned with `timed_out` set.
    pub async fn traverse(&self, seeds: &[String], deadline: Instant) -> MagpieResult<TraversalOutcome> {
        let started = Instant::now();
        let mut outcome = TraversalOutcome::default();
        let mut visited: HashMap<String, (usize, f32)> = HashMap::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut touched: BTreeMap<String, Relation> = BTreeMap::new();

        for seed in seeds {
            if Instant::now() >= deadline {
                outcome.timed_out = true;
                break;
            }
            let canonical = match within(started, deadline, self.canonical(seed, &mut outcome)).await {
                Ok(id) => id,
                Err(MagpieError::RetrievalTimeout { .. }) => {
                    outcome.timed_out = true;
                    break;
                }
                Err(err @ MagpieError::LinkCycleGuardTripped { .. }) => {
                    tracing::error!(seed = %seed, error = %err, "skipping seed");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if !visited.contains_key(&canonical) {
                visited.insert(canonical.clone(), (0, 1.0));
                queue.push_back((canonical, 0));
            }
        }

        while let Some((node, hops)) = queue.pop_front() {
            if hops >= self.max_hops {
                continue;
            }
            if outcome.timed_out || Instant::now() >= deadline {
                outcome.timed_out = true;
                break;
            }

            let step = within(started, deadline, self.expand(&node, &mut outcome)).await;
            let edges = match step {
                Ok(edges) => edges,
                Err(MagpieError::RetrievalTimeout { elapsed_ms }) => {
                    tracing::debug!(node = %node, elapsed_ms, "traversal deadline reached");
                    outcome.timed_out = true;
                    break;
                }
                Err(err) => return Err(err),
            };

            for (relation, neighbor) in edges {
                let confidence = relation.confidence;
                touched.entry(relation.id.clone()).or_insert(relation);
                let Some(neighbor) = neighbor else {
                    continue;
                };
                if let Some((seen_hops, best)) = visited.get_mut(&neighbor) {
                    if *seen_hops == hops + 1 && confidence > *best {
                        *best = confidence;
                    }
                } else if visited.len() < self.max_visited {
                    visited.insert(neighbor.clone(), (hops + 1, confidence));
                    queue.push_back((neighbor, hops + 1));
                }
            }
        }

        let mut ranked: Vec<TraversalHit> = visited
            .into_iter()
            .map(|(id, (hops, best_confidence))| TraversalHit {
                id,
                hops,
                best_confidence,
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.hops
                .cmp(&b.hops)
                .then_with(|| OrderedFloat(b.best_confidence).cmp(&OrderedFloat(a.best_confidence)))
                .then_with(|| a.id.cmp(&b.id))
        });

        outcome.ranked = ranked;
        outcome.touched_relations = touched.into_values().collect();
        tracing::debug!(
            seeds = seeds.len(),
            reached = outcome.ranked.len(),
            relations = outcome.touched_relations.len(),
            timed_out = outcome.timed_out,
            "traversal complete"
        );
        Ok(outcome)
    }

    /// Relations around `node` and its aliases, with the canonical id on the far end.
    async fn expand(
        &self,
        node: &str,
        outcome: &mut TraversalOutcome,
    ) -> MagpieResult<Vec<(Relation, Option<String>)>> {
        let mut ids = vec![node.to_string()];
        for alias in self.store.linked_aliases(node).await? {
            outcome.canonical_of.insert(alias.clone(), node.to_string());
            ids.push(alias);
        }

        let mut edges = Vec::new();
        for id in &ids {
            for relation in self.store.relations_touching(id).await? {
                let neighbor = match relation.other_end(id) {
                    Some(other) => {
                        let canonical = self.canonical(other, outcome).await?;
                        (canonical != node).then_some(canonical)
                    }
                    None => None,
                };
                edges.push((relation, neighbor));
            }
        }
        Ok(edges)
    }

    async fn canonical(&self, id: &str, outcome: &mut TraversalOutcome) -> MagpieResult<String> {
        if let Some(known) = outcome.canonical_of.get(id) {
            return Ok(known.clone());
        }
        let canonical = resolve_canonical_in_store(self.store, id, self.max_link_hops).await?;
        outcome.canonical_of.insert(id.to_string(), canonical.clone());
        Ok(canonical)
    }
}
