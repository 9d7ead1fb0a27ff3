//! Keyword index over entity titles and bodies (FTS5, BM25).
//!
//! The FTS table is external-content over `entities` and kept in sync by triggers,
//! so there is nothing to write here. FTS5's `bm25()` reports better matches as
//! more negative numbers; scores are negated on the way out so higher means more
//! relevant everywhere else in the crate.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use crate::error::Result;
use crate::knowledge::entities::{parse_type, type_set_clause};
use crate::knowledge::types::{EntityRef, EntityType};

/// One keyword match.
#[derive(Debug, Clone, Serialize)]
pub struct KeywordHit {
    pub reference: EntityRef,
    pub title: String,
    pub body: String,
    /// Negated BM25: non-negative, higher is better, unbounded above.
    pub score: f64,
}

/// Build an FTS5 MATCH expression: every alphanumeric token quoted, prefix-matched
/// and OR-ed together. Returns `None` when the text has no tokens.
///
/// `"rust borrow"` becomes `"rust"* OR "borrow"*`.
pub fn build_match_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Rank live entities against `query` by BM25.
///
/// The type set narrows the candidate set only; it does not change scores.
pub fn keyword_search(
    conn: &Connection,
    query: &str,
    limit: usize,
    type_filter: Option<&[EntityType]>,
) -> Result<Vec<KeywordHit>> {
    let Some(match_query) = build_match_query(query) else {
        return Ok(vec![]);
    };
    if limit == 0 {
        return Ok(vec![]);
    }

    let (type_clause, type_values) = type_set_clause("e.entity_type", type_filter, 3);
    let sql = format!(
        "SELECT e.entity_type, e.entity_id, e.title, e.body, -bm25(entities_fts) AS score \
         FROM entities_fts \
         JOIN entities e ON e.row_id = entities_fts.rowid \
         WHERE entities_fts MATCH ?1 AND e.is_deleted = 0{type_clause} \
         ORDER BY score DESC, e.entity_type, e.entity_id LIMIT ?2"
    );

    let mut args = vec![Value::Text(match_query.clone()), Value::Integer(limit as i64)];
    args.extend(type_values);

    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(args), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut hits = Vec::with_capacity(raw.len());
    for (kind, id, title, body, score) in raw {
        hits.push(KeywordHit {
            reference: EntityRef::new(parse_type(&kind)?, id),
            title,
            body,
            score: score.max(0.0),
        });
    }
    tracing::debug!(query = %match_query, hits = hits.len(), "keyword search");
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::knowledge::entities::{set_deleted, upsert_entity};
    use crate::knowledge::types::{Entity, EntityBody};

    fn seed(conn: &mut Connection, body: EntityBody, id: i64, title: &str) {
        upsert_entity(conn, &Entity::new(id, title, body)).unwrap();
    }

    fn note(content: &str) -> EntityBody {
        EntityBody::Note { content: content.into() }
    }

    #[test]
    fn match_query_quotes_prefixes_and_ors() {
        assert_eq!(build_match_query("rust borrow").unwrap(), "\"rust\"* OR \"borrow\"*");
        assert_eq!(build_match_query("C++ (templates)!").unwrap(), "\"c\"* OR \"templates\"*");
        assert_eq!(build_match_query("NOT AND").unwrap(), "\"not\"* OR \"and\"*");
        assert!(build_match_query("  --  ").is_none());
    }

    #[test]
    fn prefix_matching_and_positive_scores() {
        let mut conn = open_memory_database().unwrap();
        seed(&mut conn, note("Ownership and borrowing"), 1, "Rust memory");
        seed(&mut conn, note("Sourdough hydration"), 2, "Bread");

        let hits = keyword_search(&conn, "owner", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, EntityRef::new(EntityType::Note, 1));
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn any_term_matches_and_better_matches_rank_first() {
        let mut conn = open_memory_database().unwrap();
        seed(&mut conn, note("graph traversal with graph colouring"), 1, "Graph algorithms");
        seed(&mut conn, note("a short aside on traversal"), 2, "Misc");
        seed(&mut conn, note("nothing relevant"), 3, "Other");

        let hits = keyword_search(&conn, "graph traversal", 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].reference.entity_id, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn deleted_entities_and_filtered_types_are_excluded() {
        let mut conn = open_memory_database().unwrap();
        seed(&mut conn, note("compost temperature"), 1, "Compost");
        seed(
            &mut conn,
            EntityBody::Task { description: "turn the compost".into(), completed: false },
            2,
            "Chores",
        );
        seed(&mut conn, note("compost again"), 3, "Duplicate");
        set_deleted(&conn, EntityRef::new(EntityType::Note, 3), true).unwrap();

        let all = keyword_search(&conn, "compost", 10, None).unwrap();
        assert_eq!(all.len(), 2);

        let tasks = keyword_search(&conn, "compost", 10, Some(&[EntityType::Task])).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].reference.entity_type, EntityType::Task);
    }

    #[test]
    fn type_set_admits_every_listed_type() {
        let mut conn = open_memory_database().unwrap();
        seed(&mut conn, note("kiln firing schedule"), 1, "Pottery");
        seed(
            &mut conn,
            EntityBody::Task { description: "book the kiln".into(), completed: false },
            2,
            "Studio",
        );
        seed(
            &mut conn,
            EntityBody::Research { summary: "kiln atmospheres".into(), url: None },
            3,
            "Glazes",
        );

        let hits = keyword_search(&conn, "kiln", 10, Some(&[EntityType::Note, EntityType::Task])).unwrap();
        let mut kinds: Vec<EntityType> = hits.iter().map(|h| h.reference.entity_type).collect();
        kinds.sort();
        assert_eq!(kinds, vec![EntityType::Note, EntityType::Task]);

        assert_eq!(keyword_search(&conn, "kiln", 10, Some(&[])).unwrap().len(), 3);
    }

    #[test]
    fn updates_are_reflected_in_the_index() {
        let mut conn = open_memory_database().unwrap();
        seed(&mut conn, note("alpha"), 1, "First");
        seed(&mut conn, note("omega"), 1, "First");
        assert!(keyword_search(&conn, "alpha", 10, None).unwrap().is_empty());
        assert_eq!(keyword_search(&conn, "omega", 10, None).unwrap().len(), 1);
    }
}
