//! SQLite schema for the embedded graph store.
//!
//! History is never rewritten:
//! - `entity_revisions` and `entity_embeddings` keep every revision; the
//!   current one has `superseded_at IS NULL`
//! - `same_as_links`, `entity_clusters` and `rejected_relations` are append-only
//! - `relations` are written once per relation id
//! - `entity_blocking_keys` indexes current canonical candidates by key
//! - `commits` records one row per committed batch attempt

use rusqlite::Connection;

use magpie_core::error::MagpieResult;

/// Entity revisions. The body is the entity as JSON, without its embedding.
pub const CREATE_ENTITY_REVISIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_revisions (
    rev_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL,
    canonical_id TEXT,
    created_at TEXT NOT NULL,
    superseded_at TEXT
)
"#;

/// At most one current revision per entity.
pub const CREATE_ENTITY_REVISIONS_CURRENT_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_revisions_current
ON entity_revisions(entity_id) WHERE superseded_at IS NULL
"#;

/// Embedding revisions, vectors as little-endian f32 blobs.
pub const CREATE_ENTITY_EMBEDDINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_embeddings (
    rev_id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    model TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL,
    superseded_at TEXT
)
"#;

/// At most one current embedding per owner.
pub const CREATE_ENTITY_EMBEDDINGS_CURRENT_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_embeddings_current
ON entity_embeddings(owner_id) WHERE superseded_at IS NULL
"#;

/// Blocking keys of current entity revisions.
pub const CREATE_ENTITY_BLOCKING_KEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_blocking_keys (
    entity_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    prefix TEXT NOT NULL,
    PRIMARY KEY (entity_id, entity_type, prefix)
)
"#;

/// Lookup by key.
pub const CREATE_BLOCKING_KEYS_LOOKUP_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_blocking_keys_lookup ON entity_blocking_keys(entity_type, prefix)
"#;

/// Append-only same-as link log.
pub const CREATE_SAME_AS_LINKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS same_as_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_entity_id TEXT NOT NULL,
    to_canonical_entity_id TEXT NOT NULL,
    confidence REAL NOT NULL,
    batch_id TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Links by source.
pub const CREATE_SAME_AS_LINKS_FROM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_same_as_links_from ON same_as_links(from_entity_id)
"#;

/// Append-only cluster log.
pub const CREATE_ENTITY_CLUSTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id TEXT NOT NULL,
    canonical_entity_id TEXT NOT NULL,
    member_ids TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Relations, written once.
pub const CREATE_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
    relation_id TEXT PRIMARY KEY,
    subject_entity_id TEXT NOT NULL,
    body TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Relations by subject.
pub const CREATE_RELATIONS_SUBJECT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject_entity_id)
"#;

/// Review log of rejected relations.
pub const CREATE_REJECTED_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rejected_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    relation_id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Rejections by batch.
pub const CREATE_REJECTED_RELATIONS_BATCH_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rejected_relations_batch ON rejected_relations(batch_id)
"#;

/// One row per successful commit.
pub const CREATE_COMMITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    commit_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL,
    entity_count INTEGER NOT NULL,
    relation_count INTEGER NOT NULL,
    committed_at TEXT NOT NULL
)
"#;

/// Initialize the graph schema in the given database connection.
///
/// Creates all tables and indexes if they don't exist.
/// Safe to call multiple times (idempotent).
pub fn init_schema(conn: &Connection) -> MagpieResult<()> {
    // Create tables
    conn.execute(CREATE_ENTITY_REVISIONS_TABLE, [])?;
    conn.execute(CREATE_ENTITY_EMBEDDINGS_TABLE, [])?;
    conn.execute(CREATE_ENTITY_BLOCKING_KEYS_TABLE, [])?;
    conn.execute(CREATE_SAME_AS_LINKS_TABLE, [])?;
    conn.execute(CREATE_ENTITY_CLUSTERS_TABLE, [])?;
    conn.execute(CREATE_RELATIONS_TABLE, [])?;
    conn.execute(CREATE_REJECTED_RELATIONS_TABLE, [])?;
    conn.execute(CREATE_COMMITS_TABLE, [])?;

    // Create indexes
    conn.execute(CREATE_ENTITY_REVISIONS_CURRENT_INDEX, [])?;
    conn.execute(CREATE_ENTITY_EMBEDDINGS_CURRENT_INDEX, [])?;
    conn.execute(CREATE_BLOCKING_KEYS_LOOKUP_INDEX, [])?;
    conn.execute(CREATE_SAME_AS_LINKS_FROM_INDEX, [])?;
    conn.execute(CREATE_RELATIONS_SUBJECT_INDEX, [])?;
    conn.execute(CREATE_REJECTED_RELATIONS_BATCH_INDEX, [])?;

    Ok(())
}
