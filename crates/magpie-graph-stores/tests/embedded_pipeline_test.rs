//! Integration tests for the embedded store behind the full pipeline.
//!
//! Resolves batches into an on-disk store, queries it, then reopens the
//! database to check that history and links survive a restart.

use std::sync::Arc;

use async_trait::async_trait;
use magpie_core::error::MagpieResult;
use magpie_core::resolution::ResolutionConfig;
use magpie_core::retrieval::RetrievalConfig;
use magpie_core::{
    AcceptAll, CanonicalIndex, EmbeddingRateLimiter, Embedder, Entity, EntityResolver, EntityStatus,
    ExtractionBatch, GraphRagEngine, GraphStore, Mention, QueryRequest, RateLimitConfig,
    RateLimitedEmbedder, Relation, SimilarityEngine,
};
use magpie_graph_stores::EmbeddedGraphStore;
use tokio_test::assert_ok;

/// Maps text containing a keyword to a fixed unit vector.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> MagpieResult<Vec<f32>> {
        let lowered = text.to_lowercase();
        Ok(if lowered.contains("acme") {
            vec![1.0, 0.0]
        } else if lowered.contains("coyote") {
            vec![0.0, 1.0]
        } else {
            vec![0.7, 0.7]
        })
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

fn limiter() -> Arc<EmbeddingRateLimiter> {
    Arc::new(EmbeddingRateLimiter::new(&RateLimitConfig::default()).unwrap())
}

fn resolver(
    store: Arc<EmbeddedGraphStore>,
    limiter: Arc<EmbeddingRateLimiter>,
) -> EntityResolver<Arc<EmbeddedGraphStore>, AcceptAll> {
    let config = ResolutionConfig::default();
    let index = Arc::new(CanonicalIndex::new(config.blocking_prefix_len));
    EntityResolver::new(store, AcceptAll, SimilarityEngine::default(), config, index)
        .unwrap()
        .with_embedder(RateLimitedEmbedder::new(KeywordEmbedder, limiter))
}

fn first_batch() -> ExtractionBatch {
    ExtractionBatch::new("batch-1")
        .with_mention(Mention::new("m1", "Acme Corp", "doc-1", 0, 9))
        .with_mention(Mention::new("m2", "ACME Corporation", "doc-1", 40, 56))
        .with_mention(Mention::new("m3", "Wile E. Coyote", "doc-1", 80, 94))
        .with_entity(
            Entity::new("e1", "Acme Corp")
                .with_type("organization")
                .with_attribute("country", "US")
                .with_confidence(0.9)
                .with_mention("m1"),
        )
        .with_entity(
            Entity::new("e2", "ACME Corporation")
                .with_type("organization")
                .with_attribute("founded", "1947")
                .with_confidence(0.6)
                .with_mention("m2"),
        )
        .with_entity(
            Entity::new("e3", "Wile E. Coyote")
                .with_type("person")
                .with_confidence(0.8)
                .with_mention("m3"),
        )
        .with_relation(
            Relation::between("r1", "e3", "ex:worksFor", "e2")
                .with_confidence(0.9)
                .with_grounding(0.95),
        )
        .with_relation(Relation::between("r2", "e3", "ex:owns", "e1").with_grounding(0.3))
}

fn second_batch() -> ExtractionBatch {
    ExtractionBatch::new("batch-2").with_entity(
        Entity::new("e9", "ACME Corp.")
            .with_type("organization")
            .with_confidence(0.7),
    )
}

#[tokio::test]
async fn test_resolve_link_and_query() {
    let store = Arc::new(EmbeddedGraphStore::in_memory().unwrap());
    let limiter = limiter();
    let resolver = resolver(Arc::clone(&store), Arc::clone(&limiter));

    let first = assert_ok!(resolver.resolve_batch(&first_batch()).await);
    let acme = first
        .clusters
        .iter()
        .find(|c| c.member_ids.contains("e2"))
        .unwrap();
    assert_eq!(acme.canonical_entity_id, "e1");
    assert_eq!(first.rejected_relations.len(), 1);
    assert_eq!(first.rejected_relations[0].relation.id, "r2");

    let canonical = store.get_entity("e1").await.unwrap().unwrap();
    assert_eq!(canonical.attributes.get("founded").map(String::as_str), Some("1947"));
    assert!(canonical.embedding.is_some());

    let second = assert_ok!(resolver.resolve_batch(&second_batch()).await);
    assert_eq!(second.links.len(), 1);
    assert_eq!(second.links[0].to_canonical_entity_id, "e1");

    let engine = GraphRagEngine::new(
        Arc::clone(&store),
        RateLimitedEmbedder::new(KeywordEmbedder, Arc::clone(&limiter)),
        RetrievalConfig::default(),
    )
    .unwrap();
    let result = assert_ok!(engine.query(&QueryRequest::new("Who works for Acme?")).await);

    assert!(!result.partial);
    assert_eq!(result.fused[0].id, "e1");
    assert!(result.fused.iter().all(|item| item.id != "e2" && item.id != "e9"));
    assert!(result.fused.iter().any(|item| item.id == "e3"));
    assert!(result
        .context
        .starts_with("Entity: Acme Corp [organization] {country=US, founded=1947}"));
    assert!(result.context.contains("Wile E. Coyote --ex:worksFor--> Acme Corp (0.90)"));
    assert!(!result.context.contains("ex:owns"));
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("graph.db");

    {
        let store = Arc::new(EmbeddedGraphStore::new(&db_path).unwrap());
        let resolver = resolver(Arc::clone(&store), limiter());
        assert_ok!(resolver.resolve_batch(&first_batch()).await);
        assert_ok!(resolver.resolve_batch(&second_batch()).await);
    }

    let store = Arc::new(EmbeddedGraphStore::new(&db_path).unwrap());
    assert_eq!(store.entity_count().unwrap(), 4);
    assert_eq!(store.relation_count().unwrap(), 1);
    assert_eq!(
        store.active_same_as_link("e9").await.unwrap().unwrap().to_canonical_entity_id,
        "e1"
    );
    assert_eq!(
        store.get_entity("e2").await.unwrap().unwrap().status,
        EntityStatus::Retired {
            canonical_id: "e1".to_string()
        }
    );
    assert_eq!(store.rejected_relations(Some("batch-1")).await.unwrap().len(), 1);
    assert_eq!(store.linked_aliases("e1").await.unwrap(), vec!["e2", "e9"]);

    let hits = store.search_embeddings(&[1.0, 0.0], 10).await.unwrap();
    assert!(hits.iter().any(|(id, _)| id == "e1"));

    // A restarted resolver hydrates its index from disk and still links.
    let resolver = resolver(Arc::clone(&store), limiter());
    let third = assert_ok!(
        resolver
            .resolve_batch(&ExtractionBatch::new("batch-3").with_entity(
                Entity::new("e10", "Acme Corp").with_type("organization")
            ))
            .await
    );
    assert_eq!(third.links[0].to_canonical_entity_id, "e1");
}

#[tokio::test]
async fn test_resubmitting_a_batch_is_idempotent() {
    let store = Arc::new(EmbeddedGraphStore::in_memory().unwrap());
    let resolver = resolver(Arc::clone(&store), limiter());

    assert_ok!(resolver.resolve_batch(&first_batch()).await);
    let again = assert_ok!(resolver.resolve_batch(&first_batch()).await);

    assert!(again.links.is_empty());
    assert_eq!(store.entity_history("e1").unwrap().len(), 1);
    assert_eq!(store.relation_count().unwrap(), 1);
    assert_eq!(store.commit_count("batch-1").unwrap(), 2);
}
