//! Reciprocal Rank Fusion for combining ranked lists.
//!
//! RRF is robust without parameter tuning and handles score scale mismatches
//! between retrievers, because it only looks at ranks.
//! Formula: score(d) = sum(1 / (k + rank_i(d))) over every list containing d,
//! with 1-based ranks.
//!
//! Reference: Cormack, Clarke & Buettcher (2009)

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{MagpieError, MagpieResult};

/// One id in the fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedItem {
    /// Item id.
    pub id: String,
    /// Fused RRF score.
    pub score: f64,
    /// 1-based rank of the item in each input list, `None` where absent.
    pub ranks: Vec<Option<usize>>,
}

/// Reciprocal Rank Fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfFusion {
    /// k parameter controls how much to favor top-ranked items.
    /// Higher k = more even distribution; lower k = more weight to top ranks.
    /// Default: 60 (standard value from literature)
    k: f64,
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

impl RrfFusion {
    /// Create RRF fusion with custom k value. `k` must be finite and positive.
    pub fn new(k: f64) -> MagpieResult<Self> {
        if !k.is_finite() || k <= 0.0 {
            return Err(MagpieError::Configuration(format!(
                "RRF k must be a positive number, got {}",
                k
            )));
        }
        Ok(Self { k })
    }

    /// The k parameter.
    pub fn k(&self) -> f64 {
        self.k
    }

    /// Fuse ranked id lists, best first, into one ranking.
    ///
    /// Output is sorted by fused score descending, ties by id ascending.
    /// An id repeated within one list counts once, at its best rank.
    pub fn fuse<T: AsRef<str>>(&self, ranked_lists: &[Vec<T>]) -> Vec<FusedItem> {
        let list_count = ranked_lists.len();
        let mut fused: HashMap<&str, FusedItem> = HashMap::new();

        for (list_idx, list) in ranked_lists.iter().enumerate() {
            for (position, id) in list.iter().enumerate() {
                let id = id.as_ref();
                let item = fused.entry(id).or_insert_with(|| FusedItem {
                    id: id.to_string(),
                    score: 0.0,
                    ranks: vec![None; list_count],
                });
                if item.ranks[list_idx].is_none() {
                    item.ranks[list_idx] = Some(position + 1);
                }
            }
        }

        let mut results: Vec<FusedItem> = fused
            .into_values()
            .map(|mut item| {
                // Sorted ranks: equal rank multisets sum to identical scores.
                let mut ranks: Vec<usize> = item.ranks.iter().flatten().copied().collect();
                ranks.sort_unstable();
                item.score = ranks.iter().map(|r| 1.0 / (self.k + *r as f64)).sum();
                item
            })
            .collect();

        results.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| a.id.cmp(&b.id))
        });
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[FusedItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_rrf_single_list() {
        let rrf = RrfFusion::default();
        let results = rrf.fuse(&[vec!["a", "b", "c"]]);

        assert_eq!(ids(&results), vec!["a", "b", "c"]);
        assert!(results[0].score > results[1].score);
        assert!((results[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_two_lists_example() {
        let rrf = RrfFusion::default();
        let results = rrf.fuse(&[vec!["x", "y", "z"], vec!["y", "x", "w"]]);

        assert_eq!(ids(&results), vec!["x", "y", "w", "z"]);
        assert!((results[0].score - 0.03252).abs() < 1e-5);
        assert_eq!(results[0].score, results[1].score);
        assert_eq!(results[0].ranks, vec![Some(1), Some(2)]);
        assert_eq!(results[3].ranks, vec![Some(3), None]);
    }

    #[test]
    fn test_rrf_top_in_every_list_wins() {
        let rrf = RrfFusion::new(10.0).unwrap();
        let results = rrf.fuse(&[
            vec!["top", "a", "b"],
            vec!["top", "b", "c"],
            vec!["top", "c", "a"],
        ]);
        assert_eq!(results[0].id, "top");
    }

    #[test]
    fn test_rrf_duplicate_uses_best_rank() {
        let rrf = RrfFusion::default();
        let results = rrf.fuse(&[vec!["a", "b", "a"]]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ranks, vec![Some(1)]);
        assert!((results[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_empty_inputs() {
        let rrf = RrfFusion::default();
        assert!(rrf.fuse::<&str>(&[]).is_empty());
        assert!(rrf.fuse(&[Vec::<String>::new()]).is_empty());
    }

    #[test]
    fn test_rrf_k_must_be_positive() {
        assert!(RrfFusion::new(0.0).is_err());
        assert!(RrfFusion::new(-1.0).is_err());
        assert!(RrfFusion::new(f64::NAN).is_err());
    }
}
