//! SQLite <-> petgraph synchronization.
//!
//! Provides functions to load the current graph from SQLite into memory and
//! to persist a resolution commit inside one transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use magpie_core::error::{MagpieError, MagpieResult};
use magpie_core::types::{
    BlockingKey, Embedding, Entity, EntityCluster, EntityStatus, RejectedRelation, Relation,
    ResolutionCommit, SameAsLink,
};

use super::petgraph_ops::GraphState;

/// Load the current graph from SQLite into `state`.
///
/// This is called on open to hydrate the in-memory graph. Links are
/// replayed in append order so the active link per source matches the log.
pub fn load_graph(conn: &Connection, state: &mut GraphState) -> MagpieResult<()> {
    state.clear();

    // Current entity revisions with their current embedding
    let mut stmt = conn.prepare(
        r#"
        SELECT r.body, e.model, e.vector, e.created_at
        FROM entity_revisions r
        LEFT JOIN entity_embeddings e
            ON e.owner_id = r.entity_id AND e.superseded_at IS NULL
        WHERE r.superseded_at IS NULL
        ORDER BY r.entity_id
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        let body: String = row.get(0)?;
        let model: Option<String> = row.get(1)?;
        let vector: Option<Vec<u8>> = row.get(2)?;
        let created_at: Option<String> = row.get(3)?;
        Ok((body, model, vector, created_at))
    })?;
    for row in rows {
        let (body, model, vector, created_at) = row?;
        let mut entity: Entity = serde_json::from_str(&body)?;
        if let (Some(model), Some(vector), Some(created_at)) = (model, vector, created_at) {
            entity.embedding = Some(Embedding {
                owner_id: entity.id.clone(),
                vector: bytes_to_vector(&vector),
                model,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        state.upsert_entity(entity);
    }

    // Same-as links in append order
    let mut stmt = conn.prepare(
        "SELECT from_entity_id, to_canonical_entity_id, confidence, created_at FROM same_as_links ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        let from: String = row.get(0)?;
        let to: String = row.get(1)?;
        let confidence: f64 = row.get(2)?;
        let created_at: String = row.get(3)?;
        Ok((from, to, confidence, created_at))
    })?;
    for row in rows {
        let (from, to, confidence, created_at) = row?;
        state.links_mut().append(SameAsLink {
            from_entity_id: from,
            to_canonical_entity_id: to,
            confidence: confidence as f32,
            created_at: parse_timestamp(&created_at)?,
        });
    }

    // Relations
    let mut stmt = conn.prepare("SELECT body FROM relations ORDER BY relation_id")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for body in rows {
        let relation: Relation = serde_json::from_str(&body?)?;
        state.add_relation(relation);
    }

    Ok(())
}

/// Persist a commit. Returns the number of new entity revisions written.
pub fn save_commit(
    tx: &Transaction<'_>,
    commit: &ResolutionCommit,
    commit_id: &str,
    blocking_prefix_len: usize,
) -> MagpieResult<usize> {
    let now = Utc::now().to_rfc3339();

    let mut revisions = 0;
    for entity in &commit.entities {
        if save_entity(tx, &commit.batch_id, entity, blocking_prefix_len, &now)? {
            revisions += 1;
        }
    }
    for cluster in &commit.clusters {
        save_cluster(tx, &commit.batch_id, cluster, &now)?;
    }
    for link in &commit.links {
        save_link(tx, &commit.batch_id, link)?;
    }
    for relation in &commit.relations {
        save_relation(tx, &commit.batch_id, relation, &now)?;
    }
    for rejected in &commit.rejected_relations {
        save_rejected(tx, &commit.batch_id, rejected, &now)?;
    }

    tx.execute(
        r#"
        INSERT INTO commits (commit_id, batch_id, entity_count, relation_count, committed_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            commit_id,
            commit.batch_id,
            commit.entities.len() as i64,
            commit.relations.len() as i64,
            now
        ],
    )?;

    Ok(revisions)
}

/// Write a new entity revision if it differs from the current one.
///
/// The previous revision is superseded, never updated in place. Blocking
/// keys are rewritten to match the entity's current status.
pub fn save_entity(
    tx: &Transaction<'_>,
    batch_id: &str,
    entity: &Entity,
    blocking_prefix_len: usize,
    now: &str,
) -> MagpieResult<bool> {
    let body = entity_body(entity)?;
    let current: Option<String> = tx
        .query_row(
            "SELECT body FROM entity_revisions WHERE entity_id = ?1 AND superseded_at IS NULL",
            params![entity.id],
            |row| row.get(0),
        )
        .optional()?;

    let changed = current.as_deref() != Some(body.as_str());
    if changed {
        let canonical_id = match &entity.status {
            EntityStatus::Active => None,
            EntityStatus::Retired { canonical_id } => Some(canonical_id.as_str()),
        };
        tx.execute(
            "UPDATE entity_revisions SET superseded_at = ?2 WHERE entity_id = ?1 AND superseded_at IS NULL",
            params![entity.id, now],
        )?;
        tx.execute(
            r#"
            INSERT INTO entity_revisions (entity_id, batch_id, body, status, canonical_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entity.id,
                batch_id,
                body,
                if entity.is_active() { "active" } else { "retired" },
                canonical_id,
                now
            ],
        )?;
    }

    if let Some(embedding) = &entity.embedding {
        save_embedding(tx, &entity.id, embedding, now)?;
    }

    tx.execute(
        "DELETE FROM entity_blocking_keys WHERE entity_id = ?1",
        params![entity.id],
    )?;
    if entity.is_active() {
        for key in entity.blocking_keys(blocking_prefix_len) {
            tx.execute(
                "INSERT OR IGNORE INTO entity_blocking_keys (entity_id, entity_type, prefix) VALUES (?1, ?2, ?3)",
                params![entity.id, key.entity_type, key.prefix],
            )?;
        }
    }

    Ok(changed)
}

/// Write an embedding revision if the model or vector changed.
pub fn save_embedding(
    tx: &Transaction<'_>,
    owner_id: &str,
    embedding: &Embedding,
    now: &str,
) -> MagpieResult<bool> {
    let bytes = vector_to_bytes(&embedding.vector);
    let current: Option<(String, Vec<u8>)> = tx
        .query_row(
            "SELECT model, vector FROM entity_embeddings WHERE owner_id = ?1 AND superseded_at IS NULL",
            params![owner_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((model, vector)) = current {
        if model == embedding.model && vector == bytes {
            return Ok(false);
        }
    }

    tx.execute(
        "UPDATE entity_embeddings SET superseded_at = ?2 WHERE owner_id = ?1 AND superseded_at IS NULL",
        params![owner_id, now],
    )?;
    tx.execute(
        r#"
        INSERT INTO entity_embeddings (owner_id, model, dimension, vector, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            owner_id,
            embedding.model,
            embedding.dimension() as i64,
            bytes,
            embedding.created_at.to_rfc3339()
        ],
    )?;
    Ok(true)
}

fn save_cluster(tx: &Transaction<'_>, batch_id: &str, cluster: &EntityCluster, now: &str) -> MagpieResult<()> {
    let members = serde_json::to_string(&cluster.member_ids)?;
    tx.execute(
        r#"
        INSERT INTO entity_clusters (cluster_id, canonical_entity_id, member_ids, batch_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![cluster.id, cluster.canonical_entity_id, members, batch_id, now],
    )?;
    Ok(())
}

fn save_link(tx: &Transaction<'_>, batch_id: &str, link: &SameAsLink) -> MagpieResult<()> {
    tx.execute(
        r#"
        INSERT INTO same_as_links (from_entity_id, to_canonical_entity_id, confidence, batch_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            link.from_entity_id,
            link.to_canonical_entity_id,
            link.confidence as f64,
            batch_id,
            link.created_at.to_rfc3339()
        ],
    )?;
    Ok(())
}

fn save_relation(tx: &Transaction<'_>, batch_id: &str, relation: &Relation, now: &str) -> MagpieResult<()> {
    let body = serde_json::to_string(relation)?;
    tx.execute(
        r#"
        INSERT OR IGNORE INTO relations (relation_id, subject_entity_id, body, batch_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![relation.id, relation.subject_entity_id, body, batch_id, now],
    )?;
    Ok(())
}

fn save_rejected(
    tx: &Transaction<'_>,
    batch_id: &str,
    rejected: &RejectedRelation,
    now: &str,
) -> MagpieResult<()> {
    let body = serde_json::to_string(rejected)?;
    tx.execute(
        r#"
        INSERT INTO rejected_relations (batch_id, relation_id, body, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![batch_id, rejected.relation.id, body, now],
    )?;
    Ok(())
}

/// Ids of entities currently indexed under `key`, sorted.
pub fn entity_ids_for_key(conn: &Connection, key: &BlockingKey) -> MagpieResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id FROM entity_blocking_keys WHERE entity_type = ?1 AND prefix = ?2 ORDER BY entity_id",
    )?;
    let ids = stmt
        .query_map(params![key.entity_type, key.prefix], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Rejected relations in review order, optionally for one batch.
pub fn load_rejected(conn: &Connection, batch_id: Option<&str>) -> MagpieResult<Vec<RejectedRelation>> {
    let mut stmt = conn.prepare(
        "SELECT body FROM rejected_relations WHERE ?1 IS NULL OR batch_id = ?1 ORDER BY id",
    )?;
    let bodies = stmt
        .query_map(params![batch_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(MagpieError::from))
        .collect()
}

/// Every revision of an entity, oldest first, without embeddings.
pub fn entity_history(conn: &Connection, entity_id: &str) -> MagpieResult<Vec<Entity>> {
    let mut stmt = conn.prepare("SELECT body FROM entity_revisions WHERE entity_id = ?1 ORDER BY rev_id")?;
    let bodies = stmt
        .query_map(params![entity_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(MagpieError::from))
        .collect()
}

/// Number of embedding revisions stored for an owner.
pub fn embedding_revision_count(conn: &Connection, owner_id: &str) -> MagpieResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entity_embeddings WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Number of commits recorded for a batch.
pub fn commit_count(conn: &Connection, batch_id: &str) -> MagpieResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM commits WHERE batch_id = ?1",
        params![batch_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn entity_body(entity: &Entity) -> MagpieResult<String> {
    let body = Entity {
        embedding: None,
        ..entity.clone()
    };
    Ok(serde_json::to_string(&body)?)
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_timestamp(value: &str) -> MagpieResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MagpieError::database(format!("invalid timestamp {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::schema::init_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_vector_bytes_preserve_values() {
        let vector = vec![0.25, -1.5, f32::MIN_POSITIVE];
        assert_eq!(bytes_to_vector(&vector_to_bytes(&vector)), vector);
    }

    #[test]
    fn test_unchanged_entity_writes_no_revision() {
        let mut conn = conn();
        let entity = Entity::new("e1", "Acme Corp").with_type("organization");

        let tx = conn.transaction().unwrap();
        assert!(save_entity(&tx, "b1", &entity, 3, "2026-01-01T00:00:00Z").unwrap());
        assert!(!save_entity(&tx, "b2", &entity, 3, "2026-01-02T00:00:00Z").unwrap());
        tx.commit().unwrap();

        assert_eq!(entity_history(&conn, "e1").unwrap().len(), 1);
    }

    #[test]
    fn test_retirement_supersedes_and_unindexes() {
        let mut conn = conn();
        let entity = Entity::new("e2", "ACME Corporation").with_type("organization");
        let retired = Entity {
            status: EntityStatus::Retired {
                canonical_id: "e1".into(),
            },
            ..entity.clone()
        };
        let key = BlockingKey::new("organization", "acm");

        let tx = conn.transaction().unwrap();
        save_entity(&tx, "b1", &entity, 3, "2026-01-01T00:00:00Z").unwrap();
        tx.commit().unwrap();
        assert_eq!(entity_ids_for_key(&conn, &key).unwrap(), vec!["e2"]);

        let tx = conn.transaction().unwrap();
        save_entity(&tx, "b2", &retired, 3, "2026-01-02T00:00:00Z").unwrap();
        tx.commit().unwrap();

        let history = entity_history(&conn, "e2").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_active());
        assert!(!history[1].is_active());
        assert!(entity_ids_for_key(&conn, &key).unwrap().is_empty());
    }

    #[test]
    fn test_embedding_regeneration_supersedes() {
        let mut conn = conn();
        let first = Embedding::new("e1", vec![1.0, 0.0], "m1");
        let second = Embedding::new("e1", vec![0.0, 1.0], "m1");

        let tx = conn.transaction().unwrap();
        assert!(save_embedding(&tx, "e1", &first, "2026-01-01T00:00:00Z").unwrap());
        assert!(!save_embedding(&tx, "e1", &first, "2026-01-01T00:00:00Z").unwrap());
        assert!(save_embedding(&tx, "e1", &second, "2026-01-02T00:00:00Z").unwrap());
        tx.commit().unwrap();

        assert_eq!(embedding_revision_count(&conn, "e1").unwrap(), 2);
        let current: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entity_embeddings WHERE owner_id = 'e1' AND superseded_at IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(current, 1);
    }

    #[test]
    fn test_commit_round_trips_through_load() {
        let mut conn = conn();
        let commit = ResolutionCommit {
            batch_id: "b1".into(),
            entities: vec![
                Entity::new("e1", "Acme Corp").with_embedding(vec![1.0, 0.0], "m"),
                Entity::new("e3", "Wile E. Coyote"),
            ],
            links: vec![SameAsLink::new("e3", "e1", 0.5)],
            relations: vec![Relation::between("r1", "e3", "ex:worksFor", "e1")],
            ..Default::default()
        };

        let tx = conn.transaction().unwrap();
        assert_eq!(save_commit(&tx, &commit, "c-1", 3).unwrap(), 2);
        tx.commit().unwrap();
        assert_eq!(commit_count(&conn, "b1").unwrap(), 1);

        let mut state = GraphState::new();
        load_graph(&conn, &mut state).unwrap();
        assert_eq!(state.entity_count(), 2);
        assert_eq!(state.relation_count(), 1);
        assert_eq!(state.links().len(), 1);
        let e1 = state.entity("e1").unwrap();
        assert_eq!(e1.embedding.as_ref().unwrap().vector, vec![1.0, 0.0]);
    }
}
