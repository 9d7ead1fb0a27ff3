mod helpers;

use tessera::db::migrations::{
    get_embedding_model, get_schema_version, run_migrations, set_embedding_model, CURRENT_SCHEMA_VERSION,
};

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn migration_records_unknown_embedding_model() {
    let conn = helpers::test_db();
    assert_eq!(get_embedding_model(&conn).unwrap(), Some("unknown".to_string()));

    set_embedding_model(&conn, "nomic-embed-text").unwrap();
    assert_eq!(get_embedding_model(&conn).unwrap(), Some("nomic-embed-text".to_string()));
}

#[test]
fn migrations_are_idempotent() {
    let conn = helpers::test_db();
    // Running again should be a no-op
    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn v1_db_backfills_chunk_dimensions() {
    // Simulate a v1 database whose chunks predate the dimensions column being filled
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    tessera::db::schema::init_schema(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(get_embedding_model(&conn).unwrap().is_none());

    let blob = tessera::knowledge::codec::encode(&vec![0.5f32; 768]);
    conn.execute(
        "INSERT INTO semantic_chunks (entity_type, entity_id, chunk_index, text, content_hash, embedding, created_at, updated_at)
         VALUES ('note', 1, 0, 'old', 'h', ?1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        [blob],
    )
    .unwrap();

    run_migrations(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(get_embedding_model(&conn).unwrap().is_some());
    let dims: i64 = conn
        .query_row("SELECT dimensions FROM semantic_chunks", [], |row| row.get(0))
        .unwrap();
    assert_eq!(dims, 768);
}
