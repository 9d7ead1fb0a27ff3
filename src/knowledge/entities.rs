//! Storage boundary for entities, connection references and canvas placements.
//!
//! Rows are turned into [`Entity`] values here and nowhere else. The kind-specific
//! fields travel as a JSON payload; the flattened `title`/`body` columns exist so the
//! FTS5 triggers can index them.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{KnowledgeError, Result};
use crate::knowledge::types::{Entity, EntityBody, EntityInfo, EntityRef, EntityType, Reference};

// ── Writes ────────────────────────────────────────────────────────────────────

/// Insert or update an entity, keyed by its reference.
///
/// For connection entities the reference list is replaced in the same transaction.
/// The row id is preserved across updates so the keyword index stays aligned.
pub fn upsert_entity(conn: &mut Connection, entity: &Entity) -> Result<()> {
    let payload = serde_json::to_string(&entity.body)?;
    let r = entity.reference;
    if entity.body.entity_type() != r.entity_type {
        return Err(KnowledgeError::InvalidInput(format!(
            "body kind {} does not match reference {r}",
            entity.body.entity_type()
        )));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO entities \
             (entity_type, entity_id, title, body, payload, project_id, is_deleted, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(entity_type, entity_id) DO UPDATE SET \
             title = excluded.title, body = excluded.body, payload = excluded.payload, \
             project_id = excluded.project_id, is_deleted = excluded.is_deleted, \
             updated_at = excluded.updated_at",
        params![
            r.entity_type.as_str(),
            r.entity_id,
            entity.title,
            entity.body.text(),
            payload,
            entity.project_id,
            entity.is_deleted,
            entity.created_at,
            entity.updated_at,
        ],
    )?;

    if r.entity_type == EntityType::Connection {
        tx.execute(
            "DELETE FROM connection_references WHERE connection_id = ?1",
            params![r.entity_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO connection_references \
                 (connection_id, entity_type, entity_id, title, position) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, reference) in entity.references().iter().enumerate() {
            stmt.execute(params![
                r.entity_id,
                reference.target.entity_type.as_str(),
                reference.target.entity_id,
                reference.title,
                position as i64,
            ])?;
        }
    }

    tx.commit()?;
    tracing::debug!(entity = %r, "entity stored");
    Ok(())
}

/// Mark an entity deleted (or restore it). Returns `false` when no such entity exists.
///
/// Chunks are left in place; every read path joins against live entities.
pub fn set_deleted(conn: &Connection, r: EntityRef, deleted: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE entities SET is_deleted = ?1, updated_at = ?2 \
         WHERE entity_type = ?3 AND entity_id = ?4",
        params![
            deleted,
            chrono::Utc::now().to_rfc3339(),
            r.entity_type.as_str(),
            r.entity_id
        ],
    )?;
    Ok(changed > 0)
}

/// Place (or move) an entity on a canvas.
pub fn place_on_canvas(conn: &Connection, canvas_id: i64, r: EntityRef, x: f64, y: f64) -> Result<()> {
    conn.execute(
        "INSERT INTO canvas_items (canvas_id, entity_type, entity_id, x, y) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(canvas_id, entity_type, entity_id) DO UPDATE SET x = excluded.x, y = excluded.y",
        params![canvas_id, r.entity_type.as_str(), r.entity_id, x, y],
    )?;
    Ok(())
}

// ── Reads ─────────────────────────────────────────────────────────────────────

struct EntityRow {
    entity_type: String,
    entity_id: i64,
    title: String,
    payload: String,
    project_id: Option<i64>,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

const ENTITY_COLUMNS: &str =
    "entity_type, entity_id, title, payload, project_id, is_deleted, created_at, updated_at";

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        entity_type: row.get(0)?,
        entity_id: row.get(1)?,
        title: row.get(2)?,
        payload: row.get(3)?,
        project_id: row.get(4)?,
        is_deleted: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub(crate) fn parse_type(raw: &str) -> Result<EntityType> {
    raw.parse::<EntityType>().map_err(KnowledgeError::InvalidInput)
}

/// ` AND <column> IN (?n, ...)` for a type set, with its bound values.
///
/// Placeholders are numbered from `first_param`. No filter, or an empty set,
/// yields an empty clause.
pub(crate) fn type_set_clause(
    column: &str,
    filter: Option<&[EntityType]>,
    first_param: usize,
) -> (String, Vec<rusqlite::types::Value>) {
    let types = match filter {
        Some(types) if !types.is_empty() => types,
        _ => return (String::new(), vec![]),
    };
    let placeholders: Vec<String> = (0..types.len()).map(|i| format!("?{}", first_param + i)).collect();
    let values = types
        .iter()
        .map(|t| rusqlite::types::Value::Text(t.as_str().to_string()))
        .collect();
    (format!(" AND {column} IN ({})", placeholders.join(", ")), values)
}

fn into_entity(conn: &Connection, row: EntityRow) -> Result<Entity> {
    let reference = EntityRef::new(parse_type(&row.entity_type)?, row.entity_id);
    let mut body: EntityBody = serde_json::from_str(&row.payload)?;
    if let EntityBody::Connection { references, .. } = &mut body {
        *references = references_of(conn, row.entity_id)?;
    }
    Ok(Entity {
        reference,
        title: row.title,
        project_id: row.project_id,
        is_deleted: row.is_deleted,
        created_at: row.created_at,
        updated_at: row.updated_at,
        body,
    })
}

/// Load an entity, deleted or not.
pub fn get_entity(conn: &Connection, r: EntityRef) -> Result<Option<Entity>> {
    let row = conn
        .query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_type = ?1 AND entity_id = ?2"),
            params![r.entity_type.as_str(), r.entity_id],
            read_row,
        )
        .optional()?;
    row.map(|row| into_entity(conn, row)).transpose()
}

/// Title and project of a live entity; `None` if it is missing or deleted.
pub fn entity_info(conn: &Connection, r: EntityRef) -> Result<Option<EntityInfo>> {
    let row = conn
        .query_row(
            "SELECT title, project_id FROM entities \
             WHERE entity_type = ?1 AND entity_id = ?2 AND is_deleted = 0",
            params![r.entity_type.as_str(), r.entity_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .optional()?;
    Ok(row.map(|(title, project_id)| EntityInfo {
        reference: r,
        title,
        project_id,
    }))
}

/// Every live entity of one type, ordered by id.
pub fn list_entities(conn: &Connection, entity_type: EntityType) -> Result<Vec<Entity>> {
    let rows: Vec<EntityRow> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE entity_type = ?1 AND is_deleted = 0 ORDER BY entity_id"
        ))?;
        let rows = stmt
            .query_map(params![entity_type.as_str()], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    rows.into_iter().map(|row| into_entity(conn, row)).collect()
}

/// Number of live entities, per type when `entity_type` is given.
pub fn count_entities(conn: &Connection, entity_type: Option<EntityType>) -> Result<u64> {
    let n: i64 = match entity_type {
        Some(t) => conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE entity_type = ?1 AND is_deleted = 0",
            params![t.as_str()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE is_deleted = 0",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(n as u64)
}

/// The stored reference list of a connection entity, in order.
pub fn references_of(conn: &Connection, connection_id: i64) -> Result<Vec<Reference>> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, entity_id, title FROM connection_references \
         WHERE connection_id = ?1 ORDER BY position",
    )?;
    let raw = stmt
        .query_map(params![connection_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (kind, id, title) in raw {
        match parse_type(&kind) {
            Ok(t) => out.push(Reference {
                target: EntityRef::new(t, id),
                title,
            }),
            Err(e) => tracing::warn!(connection_id, error = %e, "skipping malformed reference"),
        }
    }
    Ok(out)
}

/// Live connection entities whose reference list contains `target`.
pub fn connections_referencing(conn: &Connection, target: EntityRef) -> Result<Vec<EntityInfo>> {
    let mut stmt = conn.prepare(
        "SELECT e.entity_id, e.title, e.project_id FROM connection_references r \
         JOIN entities e ON e.entity_type = 'connection' AND e.entity_id = r.connection_id \
         WHERE r.entity_type = ?1 AND r.entity_id = ?2 AND e.is_deleted = 0 \
         ORDER BY e.entity_id",
    )?;
    let rows = stmt
        .query_map(params![target.entity_type.as_str(), target.entity_id], |row| {
            Ok(EntityInfo {
                reference: EntityRef::new(EntityType::Connection, row.get(0)?),
                title: row.get(1)?,
                project_id: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Whether an explicit link exists between `a` and `b`: one is a live connection
/// referencing the other, or a single live connection references both.
pub fn explicitly_linked(conn: &Connection, a: EntityRef, b: EntityRef) -> Result<bool> {
    let direct = |conn_side: EntityRef, target: EntityRef| -> Result<bool> {
        if conn_side.entity_type != EntityType::Connection {
            return Ok(false);
        }
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM connection_references r \
             JOIN entities e ON e.entity_type = 'connection' AND e.entity_id = r.connection_id \
             WHERE e.is_deleted = 0 \
               AND r.connection_id = ?1 AND r.entity_type = ?2 AND r.entity_id = ?3",
            params![conn_side.entity_id, target.entity_type.as_str(), target.entity_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    };
    if direct(a, b)? || direct(b, a)? {
        return Ok(true);
    }
    let shared: i64 = conn.query_row(
        "SELECT COUNT(*) FROM connection_references r1 \
         JOIN connection_references r2 ON r1.connection_id = r2.connection_id \
         JOIN entities e ON e.entity_type = 'connection' AND e.entity_id = r1.connection_id \
         WHERE e.is_deleted = 0 \
           AND r1.entity_type = ?1 AND r1.entity_id = ?2 \
           AND r2.entity_type = ?3 AND r2.entity_id = ?4",
        params![
            a.entity_type.as_str(),
            a.entity_id,
            b.entity_type.as_str(),
            b.entity_id
        ],
        |row| row.get(0),
    )?;
    Ok(shared > 0)
}

/// Live entities belonging to `project_id`, excluding `exclude`.
pub fn project_members(conn: &Connection, project_id: i64, exclude: EntityRef) -> Result<Vec<EntityInfo>> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, entity_id, title FROM entities \
         WHERE project_id = ?1 AND is_deleted = 0 \
         ORDER BY entity_type, entity_id",
    )?;
    let raw = stmt
        .query_map(params![project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for (kind, id, title) in raw {
        let reference = EntityRef::new(parse_type(&kind)?, id);
        if reference != exclude {
            out.push(EntityInfo {
                reference,
                title,
                project_id: Some(project_id),
            });
        }
    }
    Ok(out)
}

/// A live entity placed near another on a shared canvas.
#[derive(Debug, Clone, Serialize)]
pub struct CanvasNeighbour {
    pub reference: EntityRef,
    pub title: String,
    pub canvas_id: i64,
    /// Manhattan distance between the two placements.
    pub distance: f64,
}

/// For every canvas holding `r`, the live placements within `radius` (Manhattan),
/// nearest first, at most `limit` per canvas.
pub fn canvas_neighbours(conn: &Connection, r: EntityRef, radius: f64, limit: usize) -> Result<Vec<CanvasNeighbour>> {
    let placements: Vec<(i64, f64, f64)> = {
        let mut stmt = conn.prepare(
            "SELECT canvas_id, x, y FROM canvas_items \
             WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY canvas_id",
        )?;
        let rows = stmt
            .query_map(params![r.entity_type.as_str(), r.entity_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut stmt = conn.prepare(
        "SELECT c.entity_type, c.entity_id, e.title, c.x, c.y FROM canvas_items c \
         JOIN entities e ON e.entity_type = c.entity_type AND e.entity_id = c.entity_id \
         WHERE c.canvas_id = ?1 AND e.is_deleted = 0",
    )?;

    let mut out = Vec::new();
    for (canvas_id, x, y) in placements {
        let rows = stmt
            .query_map(params![canvas_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut near: Vec<CanvasNeighbour> = Vec::new();
        for (kind, id, title, ox, oy) in rows {
            let reference = EntityRef::new(parse_type(&kind)?, id);
            if reference == r {
                continue;
            }
            let distance = (ox - x).abs() + (oy - y).abs();
            if distance <= radius {
                near.push(CanvasNeighbour {
                    reference,
                    title,
                    canvas_id,
                    distance,
                });
            }
        }
        near.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.reference.cmp(&b.reference)));
        near.truncate(limit);
        out.extend(near);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn note(id: i64, title: &str, content: &str) -> Entity {
        Entity::new(id, title, EntityBody::Note { content: content.into() })
    }

    fn connection(id: i64, title: &str, targets: &[EntityRef]) -> Entity {
        Entity::new(
            id,
            title,
            EntityBody::Connection {
                description: String::new(),
                references: targets
                    .iter()
                    .map(|t| Reference { target: *t, title: format!("ref {t}") })
                    .collect(),
            },
        )
    }

    #[test]
    fn upsert_then_get_round_trips_body() {
        let mut conn = open_memory_database().unwrap();
        let task = Entity::new(
            3,
            "Water plants",
            EntityBody::Task { description: "Twice a week".into(), completed: true },
        )
        .with_project(9);
        upsert_entity(&mut conn, &task).unwrap();

        let loaded = get_entity(&conn, task.reference).unwrap().unwrap();
        assert_eq!(loaded.title, "Water plants");
        assert_eq!(loaded.project_id, Some(9));
        assert_eq!(loaded.body, task.body);
    }

    #[test]
    fn upsert_preserves_row_id_and_updates_text() {
        let mut conn = open_memory_database().unwrap();
        upsert_entity(&mut conn, &note(1, "Old", "first")).unwrap();
        let row_before: i64 = conn
            .query_row("SELECT row_id FROM entities WHERE entity_id = 1", [], |r| r.get(0))
            .unwrap();

        upsert_entity(&mut conn, &note(1, "New", "second")).unwrap();
        let (row_after, title): (i64, String) = conn
            .query_row("SELECT row_id, title FROM entities WHERE entity_id = 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(row_before, row_after);
        assert_eq!(title, "New");
    }

    #[test]
    fn connection_references_are_replaced_in_order() {
        let mut conn = open_memory_database().unwrap();
        let a = EntityRef::new(EntityType::Note, 1);
        let b = EntityRef::new(EntityType::Task, 2);
        upsert_entity(&mut conn, &connection(5, "Link", &[a, b])).unwrap();
        upsert_entity(&mut conn, &connection(5, "Link", &[b])).unwrap();

        let refs = references_of(&conn, 5).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target, b);

        let loaded = get_entity(&conn, EntityRef::new(EntityType::Connection, 5)).unwrap().unwrap();
        assert_eq!(loaded.references().len(), 1);
    }

    #[test]
    fn deleted_entities_are_hidden_from_info_and_listing() {
        let mut conn = open_memory_database().unwrap();
        let n = note(1, "Gone", "soon");
        upsert_entity(&mut conn, &n).unwrap();
        assert!(set_deleted(&conn, n.reference, true).unwrap());

        assert!(entity_info(&conn, n.reference).unwrap().is_none());
        assert!(list_entities(&conn, EntityType::Note).unwrap().is_empty());
        assert!(get_entity(&conn, n.reference).unwrap().unwrap().is_deleted);
        assert!(!set_deleted(&conn, EntityRef::new(EntityType::Note, 99), true).unwrap());
    }

    #[test]
    fn connections_referencing_skips_deleted_connections() {
        let mut conn = open_memory_database().unwrap();
        let target = EntityRef::new(EntityType::Note, 1);
        upsert_entity(&mut conn, &note(1, "Target", "x")).unwrap();
        upsert_entity(&mut conn, &connection(10, "Live", &[target])).unwrap();
        upsert_entity(&mut conn, &connection(11, "Dead", &[target])).unwrap();
        set_deleted(&conn, EntityRef::new(EntityType::Connection, 11), true).unwrap();

        let found = connections_referencing(&conn, target).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Live");
    }

    #[test]
    fn explicit_links_cover_both_shapes() {
        let mut conn = open_memory_database().unwrap();
        let a = EntityRef::new(EntityType::Note, 1);
        let b = EntityRef::new(EntityType::Note, 2);
        let c = EntityRef::new(EntityType::Note, 3);
        upsert_entity(&mut conn, &connection(7, "A and B", &[a, b])).unwrap();
        let link = EntityRef::new(EntityType::Connection, 7);

        assert!(explicitly_linked(&conn, a, b).unwrap());
        assert!(explicitly_linked(&conn, link, a).unwrap());
        assert!(explicitly_linked(&conn, b, link).unwrap());
        assert!(!explicitly_linked(&conn, a, c).unwrap());
    }

    #[test]
    fn deleted_connection_no_longer_links_anything() {
        let mut conn = open_memory_database().unwrap();
        let a = EntityRef::new(EntityType::Note, 1);
        let b = EntityRef::new(EntityType::Note, 2);
        upsert_entity(&mut conn, &connection(7, "A and B", &[a, b])).unwrap();
        let link = EntityRef::new(EntityType::Connection, 7);
        set_deleted(&conn, link, true).unwrap();

        assert!(!explicitly_linked(&conn, link, a).unwrap());
        assert!(!explicitly_linked(&conn, b, link).unwrap());
        assert!(!explicitly_linked(&conn, a, b).unwrap());
    }

    #[test]
    fn canvas_neighbours_sorted_and_bounded() {
        let mut conn = open_memory_database().unwrap();
        for id in 1..=4 {
            upsert_entity(&mut conn, &note(id, &format!("n{id}"), "")).unwrap();
        }
        let r = |id| EntityRef::new(EntityType::Note, id);
        place_on_canvas(&conn, 1, r(1), 0.0, 0.0).unwrap();
        place_on_canvas(&conn, 1, r(2), 300.0, 100.0).unwrap();
        place_on_canvas(&conn, 1, r(3), 50.0, 50.0).unwrap();
        place_on_canvas(&conn, 1, r(4), 700.0, 700.0).unwrap();

        let near = canvas_neighbours(&conn, r(1), 800.0, 5).unwrap();
        let ids: Vec<i64> = near.iter().map(|n| n.reference.entity_id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(near[0].distance, 100.0);

        let capped = canvas_neighbours(&conn, r(1), 800.0, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn project_members_exclude_the_asker() {
        let mut conn = open_memory_database().unwrap();
        upsert_entity(&mut conn, &note(1, "a", "").with_project(4)).unwrap();
        upsert_entity(&mut conn, &note(2, "b", "").with_project(4)).unwrap();
        upsert_entity(&mut conn, &note(3, "c", "").with_project(5)).unwrap();

        let members = project_members(&conn, 4, EntityRef::new(EntityType::Note, 1)).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].reference.entity_id, 2);
    }
}
