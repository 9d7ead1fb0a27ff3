//! Semantic index: persisted chunks of entity text with their vectors.
//!
//! Each entity contributes chunk 0 (title plus body). Chunks are upserted one
//! transaction at a time and never eagerly deleted; every read joins against live
//! entities so orphans simply stop matching. Vectors of different widths coexist
//! and are only ever compared with same-width queries.

use std::collections::HashMap;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::embedding::Embedder;
use crate::error::{KnowledgeError, Result};
use crate::knowledge::codec;
use crate::knowledge::entities::{parse_type, type_set_clause};
use crate::knowledge::similarity::cosine;
use crate::knowledge::types::{EntityRef, EntityType, MatchReason, SearchResult};

/// What [`index_entity`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    /// Blank text; nothing to index.
    Skipped,
    /// Stored chunk already matches the text.
    Unchanged,
    Inserted,
    Updated,
}

/// What [`upsert_chunk`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl From<UpsertOutcome> for IndexOutcome {
    fn from(o: UpsertOutcome) -> Self {
        match o {
            UpsertOutcome::Inserted => Self::Inserted,
            UpsertOutcome::Updated => Self::Updated,
        }
    }
}

/// A chunk about to be written.
#[derive(Debug, Clone)]
pub struct ChunkInput<'a> {
    pub entity_ref: EntityRef,
    pub field_name: Option<&'a str>,
    pub chunk_index: i64,
    pub text: &'a str,
    pub content_hash: String,
    pub embedding: Option<&'a [f32]>,
}

/// A chunk as stored, without its vector.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub id: i64,
    pub entity_ref: EntityRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub chunk_index: i64,
    pub text: String,
    pub content_hash: String,
    pub dimensions: Option<usize>,
    pub created_at: String,
    pub updated_at: String,
}

/// SHA-256 of the chunk text, hex encoded.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

// ── Writes ────────────────────────────────────────────────────────────────────

/// Insert or update one chunk, keyed by `(entity_type, entity_id, chunk_index)`.
///
/// The key check and the write share a transaction, so concurrent upserts of the
/// same key cannot both insert.
pub fn upsert_chunk(conn: &mut Connection, input: &ChunkInput) -> Result<UpsertOutcome> {
    let now = chrono::Utc::now().to_rfc3339();
    let blob = input.embedding.map(codec::encode);
    let dims = input.embedding.map(|v| v.len() as i64);
    let r = input.entity_ref;

    let tx = conn.transaction()?;
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM semantic_chunks \
             WHERE entity_type = ?1 AND entity_id = ?2 AND chunk_index = ?3",
            params![r.entity_type.as_str(), r.entity_id, input.chunk_index],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE semantic_chunks SET field_name = ?1, text = ?2, content_hash = ?3, \
                 embedding = ?4, dimensions = ?5, updated_at = ?6 WHERE id = ?7",
                params![input.field_name, input.text, input.content_hash, blob, dims, now, id],
            )?;
            UpsertOutcome::Updated
        }
        None => {
            tx.execute(
                "INSERT INTO semantic_chunks \
                     (entity_type, entity_id, field_name, chunk_index, text, content_hash, \
                      embedding, dimensions, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    r.entity_type.as_str(),
                    r.entity_id,
                    input.field_name,
                    input.chunk_index,
                    input.text,
                    input.content_hash,
                    blob,
                    dims,
                    now,
                ],
            )?;
            UpsertOutcome::Inserted
        }
    };
    tx.commit()?;
    Ok(outcome)
}

/// Decide whether `text` needs (re-)embedding for `r`.
///
/// Returns the content hash to write, or `None` when the stored chunk 0 already
/// has this text and a vector the embedder is content with.
pub(crate) fn pending_hash(conn: &Connection, embedder: &Embedder, r: EntityRef, text: &str) -> Result<Option<String>> {
    let hash = content_hash(text);
    let stored: Option<(String, Option<i64>)> = conn
        .query_row(
            "SELECT content_hash, dimensions FROM semantic_chunks \
             WHERE entity_type = ?1 AND entity_id = ?2 AND chunk_index = 0 AND embedding IS NOT NULL",
            params![r.entity_type.as_str(), r.entity_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match stored {
        Some((stored_hash, Some(dims))) if stored_hash == hash && !embedder.wants_reembed(dims as usize) => Ok(None),
        _ => Ok(Some(hash)),
    }
}

/// Write chunk 0 for `r` with an already computed vector.
pub(crate) fn write_chunk(
    conn: &mut Connection,
    r: EntityRef,
    field_name: Option<&str>,
    text: &str,
    hash: String,
    vector: &[f32],
) -> Result<IndexOutcome> {
    let input = ChunkInput {
        entity_ref: r,
        field_name,
        chunk_index: 0,
        text,
        content_hash: hash,
        embedding: Some(vector),
    };
    Ok(upsert_chunk(conn, &input)?.into())
}

/// Index (or refresh) the text of one entity.
///
/// Blank text is skipped; unchanged text with a stored vector is left alone.
/// Otherwise the text is embedded (falling back silently if the service is down)
/// and chunk 0 is upserted.
pub fn index_entity(
    conn: &mut Connection,
    embedder: &Embedder,
    r: EntityRef,
    field_name: Option<&str>,
    text: &str,
) -> Result<IndexOutcome> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(IndexOutcome::Skipped);
    }
    let Some(hash) = pending_hash(conn, embedder, r, text)? else {
        tracing::debug!(entity = %r, "chunk unchanged");
        return Ok(IndexOutcome::Unchanged);
    };

    let vector = embedder.embed(text);
    let outcome = write_chunk(conn, r, field_name, text, hash, &vector)?;
    tracing::debug!(entity = %r, dims = vector.len(), outcome = ?outcome, "chunk indexed");
    Ok(outcome)
}

// ── Reads ─────────────────────────────────────────────────────────────────────

/// Counters from one vector scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub scanned: usize,
    pub dimension_mismatches: usize,
    pub undecodable: usize,
}

/// Live embedded chunks, optionally filtered by a type set: (ref, title, text, dims, blob).
type ChunkRow = (EntityRef, String, String, Option<i64>, Vec<u8>);

fn scan_rows(conn: &Connection, type_filter: Option<&[EntityType]>) -> Result<Vec<ChunkRow>> {
    let (type_clause, type_values) = type_set_clause("c.entity_type", type_filter, 1);
    let sql = format!(
        "SELECT c.entity_type, c.entity_id, e.title, c.text, c.dimensions, c.embedding \
         FROM semantic_chunks c \
         JOIN entities e ON e.entity_type = c.entity_type AND e.entity_id = c.entity_id \
         WHERE e.is_deleted = 0 AND c.embedding IS NOT NULL{type_clause}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(type_values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (kind, id, title, text, dims, blob) in raw {
        out.push((EntityRef::new(parse_type(&kind)?, id), title, text, dims, blob));
    }
    Ok(out)
}

/// Nearest-neighbour scan against every live chunk comparable with `vector`.
///
/// Chunks of another width and undecodable blobs are skipped and counted. Results
/// are deduplicated per entity (best chunk wins), sorted by similarity, truncated.
pub fn search_by_vector(
    conn: &Connection,
    vector: &[f32],
    limit: usize,
    min_similarity: f64,
    type_filter: Option<&[EntityType]>,
    exclude: Option<EntityRef>,
) -> Result<Vec<SearchResult>> {
    if vector.is_empty() || limit == 0 {
        return Ok(vec![]);
    }

    let mut stats = ScanStats::default();
    let mut best: HashMap<EntityRef, SearchResult> = HashMap::new();

    for (r, title, text, dims, blob) in scan_rows(conn, type_filter)? {
        if Some(r) == exclude {
            continue;
        }
        stats.scanned += 1;
        let stored = dims.map(|d| d as usize).unwrap_or(blob.len() / 4);
        if stored != vector.len() {
            stats.dimension_mismatches += 1;
            let mismatch = KnowledgeError::DimensionMismatch {
                stored,
                query: vector.len(),
            };
            tracing::trace!(error = %mismatch, entity = %r, "skipping incomparable chunk");
            continue;
        }
        let candidate = match codec::decode(&blob) {
            Ok(v) => v,
            Err(e) => {
                stats.undecodable += 1;
                tracing::debug!(entity = %r, error = %e, "skipping undecodable chunk");
                continue;
            }
        };

        let similarity = cosine(vector, &candidate) as f64;
        if similarity < min_similarity {
            continue;
        }
        match best.get(&r) {
            Some(existing) if existing.similarity >= similarity => {}
            _ => {
                best.insert(
                    r,
                    SearchResult {
                        reference: r,
                        title,
                        preview: super::preview(&text),
                        keyword_score: 0.0,
                        similarity,
                        combined_score: similarity,
                        match_reason: MatchReason::Semantic,
                    },
                );
            }
        }
    }

    if stats.undecodable > 0 {
        tracing::warn!(undecodable = stats.undecodable, "vector scan skipped corrupt chunks");
    }
    tracing::debug!(
        scanned = stats.scanned,
        dimension_mismatches = stats.dimension_mismatches,
        matched = best.len(),
        query_dims = vector.len(),
        "vector scan complete"
    );

    let mut results: Vec<SearchResult> = best.into_values().collect();
    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.reference.cmp(&b.reference))
    });
    results.truncate(limit);
    Ok(results)
}

/// Pure semantic search: embed `query` and scan.
pub fn search(
    conn: &Connection,
    embedder: &Embedder,
    query: &str,
    limit: usize,
    min_similarity: f64,
    type_filter: Option<&[EntityType]>,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(vec![]);
    }
    let vector = embedder.embed(query);
    search_by_vector(conn, &vector, limit, min_similarity, type_filter, None)
}

/// Decoded vectors of each requested entity's live chunks. Entities without a
/// usable vector are absent from the map.
pub fn chunk_vectors_for(conn: &Connection, refs: &[EntityRef]) -> Result<HashMap<EntityRef, Vec<Vec<f32>>>> {
    let mut stmt = conn.prepare(
        "SELECT c.embedding FROM semantic_chunks c \
         JOIN entities e ON e.entity_type = c.entity_type AND e.entity_id = c.entity_id \
         WHERE c.entity_type = ?1 AND c.entity_id = ?2 \
           AND e.is_deleted = 0 AND c.embedding IS NOT NULL \
         ORDER BY c.chunk_index",
    )?;

    let mut out = HashMap::new();
    for r in refs {
        let blobs = stmt
            .query_map(params![r.entity_type.as_str(), r.entity_id], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let vectors: Vec<Vec<f32>> = blobs
            .iter()
            .filter_map(|blob| match codec::decode(blob) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(entity = %r, error = %e, "skipping undecodable chunk");
                    None
                }
            })
            .collect();
        if !vectors.is_empty() {
            out.insert(*r, vectors);
        }
    }
    Ok(out)
}

/// A decoded chunk vector with the owning entity's title.
#[derive(Debug, Clone)]
pub struct TitledVector {
    pub reference: EntityRef,
    pub title: String,
    pub vector: Vec<f32>,
}

/// The `sample` most recently created embedded chunks of live entities.
///
/// Ordered by creation time, so re-indexing an old entity does not pull it into
/// the sample.
pub fn recent_chunk_vectors(conn: &Connection, sample: usize) -> Result<Vec<TitledVector>> {
    let mut stmt = conn.prepare(
        "SELECT c.entity_type, c.entity_id, e.title, c.embedding FROM semantic_chunks c \
         JOIN entities e ON e.entity_type = c.entity_type AND e.entity_id = c.entity_id \
         WHERE e.is_deleted = 0 AND c.embedding IS NOT NULL \
         ORDER BY c.created_at DESC, c.id DESC LIMIT ?1",
    )?;
    let raw = stmt
        .query_map(params![sample as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (kind, id, title, blob) in raw {
        let reference = EntityRef::new(parse_type(&kind)?, id);
        match codec::decode(&blob) {
            Ok(vector) => out.push(TitledVector { reference, title, vector }),
            Err(e) => tracing::debug!(entity = %reference, error = %e, "skipping undecodable chunk"),
        }
    }
    Ok(out)
}

/// Every stored chunk of an entity, deleted owner or not.
pub fn chunks_for_entity(conn: &Connection, r: EntityRef) -> Result<Vec<StoredChunk>> {
    let mut stmt = conn.prepare(
        "SELECT id, field_name, chunk_index, text, content_hash, dimensions, created_at, updated_at \
         FROM semantic_chunks WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY chunk_index",
    )?;
    let rows = stmt
        .query_map(params![r.entity_type.as_str(), r.entity_id], |row| {
            Ok(StoredChunk {
                id: row.get(0)?,
                entity_ref: r,
                field_name: row.get(1)?,
                chunk_index: row.get(2)?,
                text: row.get(3)?,
                content_hash: row.get(4)?,
                dimensions: row.get::<_, Option<i64>>(5)?.map(|d| d as usize),
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_chunks(conn: &Connection, r: EntityRef) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM semantic_chunks WHERE entity_type = ?1 AND entity_id = ?2",
        params![r.entity_type.as_str(), r.entity_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::knowledge::entities::{set_deleted, upsert_entity};
    use crate::knowledge::types::{Entity, EntityBody};

    fn note_ref(id: i64) -> EntityRef {
        EntityRef::new(EntityType::Note, id)
    }

    fn seed_note(conn: &mut Connection, id: i64, title: &str) {
        let e = Entity::new(id, title, EntityBody::Note { content: String::new() });
        upsert_entity(conn, &e).unwrap();
    }

    fn spike(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    fn put_vector(conn: &mut Connection, id: i64, v: &[f32]) {
        let input = ChunkInput {
            entity_ref: note_ref(id),
            field_name: None,
            chunk_index: 0,
            text: "text",
            content_hash: content_hash("text"),
            embedding: Some(v),
        };
        upsert_chunk(conn, &input).unwrap();
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn upsert_chunk_inserts_then_updates() {
        let mut conn = open_memory_database().unwrap();
        seed_note(&mut conn, 1, "a");
        let v = spike(512, 0);
        let input = ChunkInput {
            entity_ref: note_ref(1),
            field_name: Some("content"),
            chunk_index: 0,
            text: "first",
            content_hash: content_hash("first"),
            embedding: Some(&v),
        };
        assert_eq!(upsert_chunk(&mut conn, &input).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(upsert_chunk(&mut conn, &input).unwrap(), UpsertOutcome::Updated);
        assert_eq!(count_chunks(&conn, note_ref(1)).unwrap(), 1);

        let stored = chunks_for_entity(&conn, note_ref(1)).unwrap();
        assert_eq!(stored[0].dimensions, Some(512));
        assert_eq!(stored[0].field_name.as_deref(), Some("content"));
    }

    #[test]
    fn index_entity_is_idempotent() {
        let mut conn = open_memory_database().unwrap();
        seed_note(&mut conn, 1, "a");
        let embedder = Embedder::fallback_only(512);

        let r = note_ref(1);
        assert_eq!(index_entity(&mut conn, &embedder, r, None, "Rust ownership").unwrap(), IndexOutcome::Inserted);
        assert_eq!(index_entity(&mut conn, &embedder, r, None, "Rust ownership").unwrap(), IndexOutcome::Unchanged);
        assert_eq!(index_entity(&mut conn, &embedder, r, None, "Rust lifetimes").unwrap(), IndexOutcome::Updated);
        assert_eq!(index_entity(&mut conn, &embedder, r, None, "   ").unwrap(), IndexOutcome::Skipped);
        assert_eq!(count_chunks(&conn, r).unwrap(), 1);
    }

    #[test]
    fn scan_skips_other_widths() {
        let mut conn = open_memory_database().unwrap();
        for id in 1..=3 {
            seed_note(&mut conn, id, &format!("n{id}"));
        }
        put_vector(&mut conn, 1, &spike(384, 0));
        put_vector(&mut conn, 2, &spike(768, 0));
        put_vector(&mut conn, 3, &spike(768, 1));

        let hits = search_by_vector(&conn, &spike(768, 0), 10, 0.0, None, None).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.reference.entity_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn scan_ignores_deleted_and_excluded_entities() {
        let mut conn = open_memory_database().unwrap();
        for id in 1..=3 {
            seed_note(&mut conn, id, &format!("n{id}"));
            put_vector(&mut conn, id, &spike(512, 0));
        }
        set_deleted(&conn, note_ref(2), true).unwrap();

        let hits = search_by_vector(&conn, &spike(512, 0), 10, 0.5, None, Some(note_ref(3))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, note_ref(1));
    }

    #[test]
    fn scan_survives_corrupt_blob() {
        let mut conn = open_memory_database().unwrap();
        seed_note(&mut conn, 1, "bad");
        seed_note(&mut conn, 2, "good");
        put_vector(&mut conn, 2, &spike(512, 0));
        conn.execute(
            "INSERT INTO semantic_chunks (entity_type, entity_id, chunk_index, text, content_hash, \
             embedding, dimensions, created_at, updated_at) \
             VALUES ('note', 1, 0, 't', 'h', X'00010203', 512, '', '')",
            [],
        )
        .unwrap();

        let hits = search_by_vector(&conn, &spike(512, 0), 10, 0.0, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, note_ref(2));
    }

    #[test]
    fn chunk_vectors_for_omits_missing() {
        let mut conn = open_memory_database().unwrap();
        seed_note(&mut conn, 1, "a");
        seed_note(&mut conn, 2, "b");
        put_vector(&mut conn, 1, &spike(512, 3));

        let map = chunk_vectors_for(&conn, &[note_ref(1), note_ref(2)]).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&note_ref(1)][0][3], 1.0);
    }
}
