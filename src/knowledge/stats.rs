//! Index statistics: what is stored, and at which vector widths.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::migrations::get_embedding_model;
use crate::error::Result;
use crate::knowledge::codec::dimension_label;
use crate::knowledge::entities::count_entities;
use crate::knowledge::types::EntityType;

#[derive(Debug, Serialize)]
pub struct DimensionCount {
    pub dimensions: usize,
    pub label: &'static str,
    pub chunks: u64,
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub total_entities: u64,
    pub entities_by_type: BTreeMap<String, u64>,
    pub total_chunks: u64,
    pub embedded_chunks: u64,
    /// Chunks whose owner is deleted or gone; ignored by every search.
    pub orphan_chunks: u64,
    pub chunks_by_dimension: Vec<DimensionCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

pub fn index_stats(conn: &Connection) -> Result<IndexStats> {
    let mut entities_by_type = BTreeMap::new();
    for t in EntityType::ALL {
        entities_by_type.insert(t.as_str().to_string(), count_entities(conn, Some(t))?);
    }

    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    };

    let chunks_by_dimension = {
        let mut stmt = conn.prepare(
            "SELECT dimensions, COUNT(*) FROM semantic_chunks \
             WHERE embedding IS NOT NULL AND dimensions IS NOT NULL \
             GROUP BY dimensions ORDER BY dimensions DESC",
        )?;
        let rows = stmt
            .query_map(params![], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(dims, n)| DimensionCount {
                dimensions: dims as usize,
                label: dimension_label(dims as usize),
                chunks: n as u64,
            })
            .collect()
    };

    Ok(IndexStats {
        total_entities: count_entities(conn, None)?,
        entities_by_type,
        total_chunks: count("SELECT COUNT(*) FROM semantic_chunks")?,
        embedded_chunks: count("SELECT COUNT(*) FROM semantic_chunks WHERE embedding IS NOT NULL")?,
        orphan_chunks: count(
            "SELECT COUNT(*) FROM semantic_chunks c WHERE NOT EXISTS (\
                 SELECT 1 FROM entities e WHERE e.entity_type = c.entity_type \
                 AND e.entity_id = c.entity_id AND e.is_deleted = 0)",
        )?,
        chunks_by_dimension,
        embedding_model: get_embedding_model(conn)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::embedding::Embedder;
    use crate::knowledge::chunks::index_entity;
    use crate::knowledge::entities::{set_deleted, upsert_entity};
    use crate::knowledge::types::{Entity, EntityBody, EntityRef};

    #[test]
    fn counts_widths_and_orphans() {
        let mut conn = open_memory_database().unwrap();
        let small = Embedder::fallback_only(384);
        let large = Embedder::fallback_only(512);
        for id in 1..=3 {
            let e = Entity::new(id, format!("n{id}"), EntityBody::Note { content: "text".into() });
            upsert_entity(&mut conn, &e).unwrap();
        }
        let r = |id| EntityRef::new(EntityType::Note, id);
        index_entity(&mut conn, &small, r(1), None, "one").unwrap();
        index_entity(&mut conn, &large, r(2), None, "two").unwrap();
        index_entity(&mut conn, &large, r(3), None, "three").unwrap();
        set_deleted(&conn, r(3), true).unwrap();

        let stats = index_stats(&conn).unwrap();
        assert_eq!(stats.total_entities, 2);
        assert_eq!(stats.entities_by_type["note"], 2);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.orphan_chunks, 1);
        assert_eq!(stats.chunks_by_dimension.len(), 2);
        assert_eq!(stats.chunks_by_dimension[0].dimensions, 512);
        assert_eq!(stats.chunks_by_dimension[0].chunks, 2);
        assert_eq!(stats.chunks_by_dimension[1].label, "legacy-minilm");
    }
}
