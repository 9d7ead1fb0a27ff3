mod helpers;

#[test]
fn full_schema_creates_all_tables_and_indexes() {
    let conn = helpers::test_db();

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    for table in ["entities", "entities_fts", "semantic_chunks", "connection_references", "canvas_items", "schema_meta"] {
        assert!(tables.contains(&table.to_string()), "{table} table missing");
    }

    let indexes: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert!(indexes.contains(&"idx_entities_type".to_string()));
    assert!(indexes.contains(&"idx_chunks_entity".to_string()));
    assert!(indexes.contains(&"idx_chunks_created".to_string()));
    assert!(indexes.contains(&"idx_references_target".to_string()));
    assert!(indexes.contains(&"idx_canvas_entity".to_string()));

    // CHECK constraint rejects unknown entity types
    let result = conn.execute(
        "INSERT INTO entities (entity_type, entity_id, title, payload, created_at, updated_at)
         VALUES ('memo', 1, 'bad', '{}', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        [],
    );
    assert!(result.is_err(), "invalid type should be rejected by CHECK constraint");
}

#[test]
fn fts_triggers_follow_entity_writes() {
    let mut conn = helpers::test_db();
    helpers::add_note(&mut conn, 1, "Sourdough starter", "feed daily with rye flour");

    let hits = |conn: &rusqlite::Connection, term: &str| -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM entities_fts WHERE entities_fts MATCH ?1",
            [term],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(hits(&conn, "rye"), 1);

    helpers::add_note(&mut conn, 1, "Sourdough starter", "feed twice a day with spelt");
    assert_eq!(hits(&conn, "rye"), 0);
    assert_eq!(hits(&conn, "spelt"), 1);

    conn.execute("DELETE FROM entities", []).unwrap();
    assert_eq!(hits(&conn, "spelt"), 0);
}
