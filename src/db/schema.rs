//! SQL DDL for all tessera tables.
//!
//! Defines `entities` (with its FTS5 shadow `entities_fts` kept in sync by
//! triggers), `semantic_chunks`, `connection_references`, `canvas_items`, and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for tessera's core tables.
const SCHEMA_SQL: &str = r#"
-- Entities: the opaque knowledge items the index points at
CREATE TABLE IF NOT EXISTS entities (
    row_id INTEGER PRIMARY KEY,
    entity_type TEXT NOT NULL CHECK(entity_type IN ('note','task','content','research','connection','project')),
    entity_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    payload TEXT NOT NULL,
    project_id INTEGER,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(entity_type, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type, is_deleted);
CREATE INDEX IF NOT EXISTS idx_entities_project ON entities(project_id);

-- Keyword index (BM25) over title + body
CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
    title,
    body,
    entity_type UNINDEXED,
    entity_id UNINDEXED,
    content='entities',
    content_rowid='row_id',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE TRIGGER IF NOT EXISTS entities_fts_insert AFTER INSERT ON entities BEGIN
    INSERT INTO entities_fts (rowid, title, body, entity_type, entity_id)
    VALUES (new.row_id, new.title, new.body, new.entity_type, new.entity_id);
END;

CREATE TRIGGER IF NOT EXISTS entities_fts_delete AFTER DELETE ON entities BEGIN
    INSERT INTO entities_fts (entities_fts, rowid, title, body, entity_type, entity_id)
    VALUES ('delete', old.row_id, old.title, old.body, old.entity_type, old.entity_id);
END;

CREATE TRIGGER IF NOT EXISTS entities_fts_update AFTER UPDATE ON entities BEGIN
    INSERT INTO entities_fts (entities_fts, rowid, title, body, entity_type, entity_id)
    VALUES ('delete', old.row_id, old.title, old.body, old.entity_type, old.entity_id);
    INSERT INTO entities_fts (rowid, title, body, entity_type, entity_id)
    VALUES (new.row_id, new.title, new.body, new.entity_type, new.entity_id);
END;

-- Semantic chunks: one embeddable unit of an entity's text
CREATE TABLE IF NOT EXISTS semantic_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    field_name TEXT,
    chunk_index INTEGER NOT NULL DEFAULT 0,
    text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding BLOB,
    dimensions INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(entity_type, entity_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_entity ON semantic_chunks(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_chunks_created ON semantic_chunks(created_at);

-- Explicit references held by connection entities
CREATE TABLE IF NOT EXISTS connection_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    position INTEGER NOT NULL,
    UNIQUE(connection_id, entity_type, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_references_target ON connection_references(entity_type, entity_id);

-- Canvas placements for spatial proximity
CREATE TABLE IF NOT EXISTS canvas_items (
    canvas_id INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    PRIMARY KEY (canvas_id, entity_type, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_canvas_entity ON canvas_items(entity_type, entity_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "entities",
            "entities_fts",
            "semantic_chunks",
            "connection_references",
            "canvas_items",
            "schema_meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn fts_follows_entity_updates() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO entities (entity_type, entity_id, title, body, payload, created_at, updated_at) \
             VALUES ('note', 1, 'Sourdough', 'starter feeding schedule', '{}', 'now', 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE entities SET body = 'hydration ratios' WHERE entity_id = 1",
            [],
        )
        .unwrap();

        let old_hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities_fts WHERE entities_fts MATCH 'starter'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let new_hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities_fts WHERE entities_fts MATCH 'hydration'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(old_hits, 0);
        assert_eq!(new_hits, 1);
    }
}
