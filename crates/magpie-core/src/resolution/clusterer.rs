//! Within-batch clustering.
//!
//! Pairs scoring at or above the cluster threshold are merged with a
//! union-find, so the final partition is the set of connected components of
//! the "similar enough" graph. That makes the output independent of the
//! order entities arrive in.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::similarity::SimilarityEngine;
use crate::types::{BlockingKey, CandidateCluster, Entity};

/// Counters from one clustering run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringStats {
    /// Pairs scored.
    pub pairs_compared: usize,
    /// Pairs whose score could not be computed and counted as 0.
    pub pairs_failed: usize,
    /// Unions that joined two previously separate groups.
    pub merges: usize,
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub(crate) fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Returns true if `a` and `b` were in different sets.
    pub(crate) fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
        true
    }
}

/// Groups same-batch entities that refer to the same real-world thing.
#[derive(Debug, Clone)]
pub struct Clusterer {
    similarity: SimilarityEngine,
    threshold: f32,
    blocking_prefix_len: usize,
    exhaustive_pair_limit: usize,
}

impl Clusterer {
    /// Create a clusterer.
    pub fn new(similarity: SimilarityEngine, threshold: f32) -> Self {
        Self {
            similarity,
            threshold,
            blocking_prefix_len: 3,
            exhaustive_pair_limit: 2000,
        }
    }

    /// Set the blocking-key prefix length.
    pub fn with_blocking_prefix_len(mut self, len: usize) -> Self {
        self.blocking_prefix_len = len;
        self
    }

    /// Set the batch size above which only blocked pairs are compared.
    pub fn with_exhaustive_pair_limit(mut self, limit: usize) -> Self {
        self.exhaustive_pair_limit = limit;
        self
    }

    /// Partition `entities` into candidate clusters.
    ///
    /// Every input id lands in exactly one cluster. Members are sorted and
    /// clusters are ordered by their smallest member id.
    pub fn cluster(&self, entities: &[Entity]) -> (Vec<CandidateCluster>, ClusteringStats) {
        let mut ordered: Vec<&Entity> = entities.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));
        ordered.dedup_by(|a, b| a.id == b.id);

        let mut stats = ClusteringStats::default();
        let mut uf = UnionFind::new(ordered.len());

        for (i, j) in self.candidate_pairs(&ordered) {
            stats.pairs_compared += 1;
            let score = match self.similarity.score(ordered[i], ordered[j]) {
                Ok(score) => score,
                Err(err) => {
                    stats.pairs_failed += 1;
                    tracing::warn!(
                        left = %ordered[i].id,
                        right = %ordered[j].id,
                        error = %err,
                        "pair not comparable, treating as distinct"
                    );
                    0.0
                }
            };
            if score >= self.threshold && uf.union(i, j) {
                stats.merges += 1;
            }
        }

        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (idx, entity) in ordered.iter().enumerate() {
            groups.entry(uf.find(idx)).or_default().push(entity.id.clone());
        }

        let mut clusters: Vec<CandidateCluster> = groups
            .into_values()
            .filter_map(CandidateCluster::new)
            .collect();
        clusters.sort_by(|a, b| a.member_ids()[0].cmp(&b.member_ids()[0]));

        tracing::debug!(
            entities = ordered.len(),
            clusters = clusters.len(),
            pairs_compared = stats.pairs_compared,
            pairs_failed = stats.pairs_failed,
            "clustered batch"
        );

        (clusters, stats)
    }

    fn candidate_pairs(&self, ordered: &[&Entity]) -> Vec<(usize, usize)> {
        let n = ordered.len();
        if n <= self.exhaustive_pair_limit {
            return (0..n)
                .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
                .collect();
        }

        let mut blocks: BTreeMap<BlockingKey, Vec<usize>> = BTreeMap::new();
        for (idx, entity) in ordered.iter().enumerate() {
            for key in entity.blocking_keys(self.blocking_prefix_len) {
                blocks.entry(key).or_default().push(idx);
            }
        }

        let mut pairs = BTreeSet::new();
        for members in blocks.values() {
            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        pairs.into_iter().collect()
    }
}
