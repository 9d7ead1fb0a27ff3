#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tessera::db;
use tessera::embedding::{Embedder, EmbeddingService};
use tessera::knowledge::chunks::{content_hash, upsert_chunk, ChunkInput};
use tessera::knowledge::entities::upsert_entity;
use tessera::knowledge::types::{Entity, EntityBody, EntityRef, EntityType, Reference};

pub const DIMS: usize = 384;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// A unit vector with a spike at position `seed`. Distinct seeds are orthogonal.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed % DIMS] = 1.0;
    v
}

/// A unit vector whose cosine similarity with `spike(base)` is exactly `sim`,
/// leaning the rest of its weight onto `spike(other)`.
pub fn blend(base: usize, other: usize, sim: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[base % DIMS] = sim;
    v[other % DIMS] = (1.0 - sim * sim).sqrt();
    v
}

pub fn note_ref(id: i64) -> EntityRef {
    EntityRef::new(EntityType::Note, id)
}

/// Store a live note.
pub fn add_note(conn: &mut Connection, id: i64, title: &str, content: &str) -> EntityRef {
    let entity = Entity::new(id, title, EntityBody::Note { content: content.into() });
    upsert_entity(conn, &entity).unwrap();
    entity.reference
}

/// Store a live note attached to `project_id`.
pub fn add_project_note(conn: &mut Connection, id: i64, title: &str, project_id: i64) -> EntityRef {
    let entity = Entity::new(id, title, EntityBody::Note { content: String::new() }).with_project(project_id);
    upsert_entity(conn, &entity).unwrap();
    entity.reference
}

/// Store a connection entity referencing `targets`.
pub fn add_connection(conn: &mut Connection, id: i64, title: &str, targets: &[EntityRef]) -> EntityRef {
    let references = targets
        .iter()
        .map(|t| Reference {
            target: *t,
            title: t.to_string(),
        })
        .collect();
    let entity = Entity::new(
        id,
        title,
        EntityBody::Connection {
            description: String::new(),
            references,
        },
    );
    upsert_entity(conn, &entity).unwrap();
    entity.reference
}

/// Write chunk `chunk_index` of `r` with an explicit vector.
pub fn put_vector(conn: &mut Connection, r: EntityRef, chunk_index: i64, vector: &[f32]) {
    let text = format!("{r} chunk {chunk_index}");
    upsert_chunk(
        conn,
        &ChunkInput {
            entity_ref: r,
            field_name: Some("content"),
            chunk_index,
            text: &text,
            content_hash: content_hash(&text),
            embedding: Some(vector),
        },
    )
    .unwrap();
}

/// Embedding service answering from a fixed table; unknown texts get `spike(DIMS - 1)`.
pub struct MapService {
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingService for MapService {
    fn name(&self) -> &str {
        "map-stub"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| spike(DIMS - 1)))
    }

    fn probe(&self) -> bool {
        true
    }
}

/// A service that is never reachable.
pub struct DownService;

impl EmbeddingService for DownService {
    fn name(&self) -> &str {
        "down-stub"
    }

    fn dimensions(&self) -> usize {
        768
    }

    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("connection refused")
    }

    fn probe(&self) -> bool {
        false
    }
}

/// An embedder backed by [`MapService`], with a 512-d hashing fallback.
pub fn map_embedder(pairs: &[(&str, Vec<f32>)]) -> Embedder {
    let vectors = pairs
        .iter()
        .map(|(text, v)| (text.to_string(), v.clone()))
        .collect();
    Embedder::new(Some(Arc::new(MapService { vectors })), 512, 500, Duration::from_secs(30))
}

/// An embedder whose service is down, falling back to 512-d hashing vectors.
pub fn down_embedder() -> Embedder {
    Embedder::new(Some(Arc::new(DownService)), 512, 500, Duration::from_secs(30))
}
