//! Connection discovery: what else in the knowledge base relates to one entity.
//!
//! Several independent passes each propose candidate connections with a strength
//! in `[0, 1]`:
//!
//! | Pass | Strength |
//! |------|----------|
//! | Direct reference (explicit links held by connection entities) | 1.0 |
//! | Semantic neighbours (chunk vectors) | cosine similarity |
//! | Shared project | `shared_project_strength` |
//! | Transitive, through a connection entity (depth > 1) | `transitive_strength` |
//! | Spatial proximity on a canvas | `spatial_strength` |
//! | Shared concepts (opt-in) | 0.3 to 0.6 |
//!
//! The proposals are then collapsed to one connection per target: the strongest
//! wins, and on equal strength the more explicit kind wins.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::knowledge::chunks::{chunk_vectors_for, search_by_vector};
use crate::knowledge::concepts::extract_concepts;
use crate::knowledge::entities::{
    canvas_neighbours, connections_referencing, entity_info, get_entity, project_members, references_of,
};
use crate::knowledge::keyword::keyword_search;
use crate::knowledge::types::{ConnectionKind, DiscoveredConnection, Entity, EntityRef, EntityType};

/// Concepts taken from the source entity for the shared-concepts pass.
const SOURCE_CONCEPTS: usize = 10;
/// Keyword candidates examined by the shared-concepts pass.
const CONCEPT_CANDIDATES: usize = 50;

/// Discover connections of `source`.
///
/// An unknown or deleted source yields no connections rather than an error.
/// `depth > 1` enables the transitive pass.
pub fn discover_connections(
    conn: &Connection,
    source: EntityRef,
    depth: u32,
    cfg: &DiscoveryConfig,
) -> Result<Vec<DiscoveredConnection>> {
    let Some(entity) = get_entity(conn, source)?.filter(|e| !e.is_deleted) else {
        tracing::debug!(entity = %source, "discovery source missing or deleted");
        return Ok(vec![]);
    };

    let mut found = direct_references(conn, &entity)?;
    let direct = found.clone();
    found.extend(semantic_neighbours(conn, source, cfg)?);
    found.extend(shared_project(conn, &entity, cfg)?);
    if depth > 1 {
        found.extend(transitive(conn, source, &direct, cfg)?);
    }
    found.extend(spatial(conn, source, cfg)?);
    if cfg.shared_concepts {
        found.extend(shared_concepts(conn, &entity)?);
    }

    let connections = aggregate(source, found, cfg.max_connections);
    tracing::debug!(entity = %source, depth, found = connections.len(), "connections discovered");
    Ok(connections)
}

/// One connection per target, strongest first, at most `max`.
pub fn aggregate(source: EntityRef, found: Vec<DiscoveredConnection>, max: usize) -> Vec<DiscoveredConnection> {
    let mut best: HashMap<EntityRef, DiscoveredConnection> = HashMap::new();
    for c in found {
        if c.target == source {
            continue;
        }
        match best.get(&c.target) {
            Some(existing) if !outranks(&c, existing) => {}
            _ => {
                best.insert(c.target, c);
            }
        }
    }

    let mut out: Vec<DiscoveredConnection> = best.into_values().collect();
    out.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then(b.kind.priority().cmp(&a.kind.priority()))
            .then(a.target.cmp(&b.target))
    });
    out.truncate(max);
    out
}

fn outranks(candidate: &DiscoveredConnection, existing: &DiscoveredConnection) -> bool {
    match candidate.strength.total_cmp(&existing.strength) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.kind.priority() > existing.kind.priority(),
    }
}

fn connection(
    source: EntityRef,
    target: EntityRef,
    target_title: String,
    strength: f64,
    kind: ConnectionKind,
    explanation: String,
) -> DiscoveredConnection {
    DiscoveredConnection {
        source,
        target,
        target_title,
        strength: strength.clamp(0.0, 1.0),
        kind,
        explanation,
    }
}

// ── Passes ────────────────────────────────────────────────────────────────────

fn direct_references(conn: &Connection, entity: &Entity) -> Result<Vec<DiscoveredConnection>> {
    let source = entity.reference;
    let mut out = Vec::new();

    for holder in connections_referencing(conn, source)? {
        out.push(connection(
            source,
            holder.reference,
            holder.title.clone(),
            1.0,
            ConnectionKind::DirectReference,
            format!("Referenced by connection \"{}\"", holder.title),
        ));
    }

    if entity.reference.entity_type == EntityType::Connection {
        for reference in entity.references() {
            let title = match get_entity(conn, reference.target)? {
                Some(target) if target.is_deleted => continue,
                Some(target) => target.title,
                None => reference.title.clone(),
            };
            out.push(connection(
                source,
                reference.target,
                title,
                1.0,
                ConnectionKind::DirectReference,
                format!("Referenced by \"{}\"", entity.title),
            ));
        }
    }
    Ok(out)
}

fn semantic_neighbours(conn: &Connection, source: EntityRef, cfg: &DiscoveryConfig) -> Result<Vec<DiscoveredConnection>> {
    let Some(vectors) = chunk_vectors_for(conn, &[source])?.remove(&source) else {
        return Ok(vec![]);
    };

    let mut best: HashMap<EntityRef, (f64, String)> = HashMap::new();
    for vector in &vectors {
        let hits = search_by_vector(conn, vector, cfg.semantic_candidates, cfg.semantic_floor, None, Some(source))?;
        for hit in hits {
            match best.get(&hit.reference) {
                Some((sim, _)) if *sim >= hit.similarity => {}
                _ => {
                    best.insert(hit.reference, (hit.similarity, hit.title));
                }
            }
        }
    }

    let mut ranked: Vec<(EntityRef, f64, String)> =
        best.into_iter().map(|(r, (sim, title))| (r, sim, title)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(cfg.semantic_candidates);

    Ok(ranked
        .into_iter()
        .map(|(target, sim, title)| {
            connection(
                source,
                target,
                title,
                sim,
                ConnectionKind::SemanticSimilarity,
                format!("{:.0}% semantic similarity", sim * 100.0),
            )
        })
        .collect())
}

fn shared_project(conn: &Connection, entity: &Entity, cfg: &DiscoveryConfig) -> Result<Vec<DiscoveredConnection>> {
    let source = entity.reference;
    let mut projects: Vec<i64> = entity.project_id.into_iter().collect();
    if source.entity_type == EntityType::Project {
        projects.push(source.entity_id);
    }

    let mut out = Vec::new();
    for project_id in projects {
        let project_title = entity_info(conn, EntityRef::new(EntityType::Project, project_id))?
            .map(|p| p.title)
            .unwrap_or_else(|| format!("#{project_id}"));
        for member in project_members(conn, project_id, source)? {
            out.push(connection(
                source,
                member.reference,
                member.title,
                cfg.shared_project_strength,
                ConnectionKind::SharedProject,
                format!("Both in project \"{project_title}\""),
            ));
        }
    }
    Ok(out)
}

fn transitive(
    conn: &Connection,
    source: EntityRef,
    direct: &[DiscoveredConnection],
    cfg: &DiscoveryConfig,
) -> Result<Vec<DiscoveredConnection>> {
    let mut visited: HashSet<EntityRef> = direct.iter().map(|c| c.target).collect();
    visited.insert(source);

    let mut out = Vec::new();
    for via in direct.iter().filter(|c| c.target.entity_type == EntityType::Connection) {
        for reference in references_of(conn, via.target.entity_id)? {
            if !visited.insert(reference.target) {
                continue;
            }
            let Some(info) = entity_info(conn, reference.target)? else {
                continue;
            };
            out.push(connection(
                source,
                info.reference,
                info.title,
                cfg.transitive_strength,
                ConnectionKind::Transitive,
                format!("Linked through \"{}\"", via.target_title),
            ));
        }
    }
    Ok(out)
}

fn spatial(conn: &Connection, source: EntityRef, cfg: &DiscoveryConfig) -> Result<Vec<DiscoveredConnection>> {
    Ok(canvas_neighbours(conn, source, cfg.spatial_radius, cfg.spatial_limit)?
        .into_iter()
        .map(|n| {
            connection(
                source,
                n.reference,
                n.title,
                cfg.spatial_strength,
                ConnectionKind::SpatialProximity,
                format!("Placed nearby on canvas {} ({:.0} apart)", n.canvas_id, n.distance),
            )
        })
        .collect())
}

fn shared_concepts(conn: &Connection, entity: &Entity) -> Result<Vec<DiscoveredConnection>> {
    let source = entity.reference;
    let concepts = extract_concepts(&entity.searchable_text(), SOURCE_CONCEPTS);
    if concepts.len() < 2 {
        return Ok(vec![]);
    }

    let mut out = Vec::new();
    for hit in keyword_search(conn, &concepts.join(" "), CONCEPT_CANDIDATES, None)? {
        if hit.reference == source {
            continue;
        }
        let words: HashSet<String> = format!("{} {}", hit.title, hit.body)
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .collect();
        let shared: Vec<&str> = concepts
            .iter()
            .filter(|c| words.contains(c.as_str()))
            .map(String::as_str)
            .collect();
        if shared.len() < 2 {
            continue;
        }
        let strength = (0.3 + 0.1 * (shared.len() - 2) as f64).min(0.6);
        out.push(connection(
            source,
            hit.reference,
            hit.title,
            strength,
            ConnectionKind::SharedConcepts,
            format!("Shares concepts: {}", shared.join(", ")),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(target: i64, strength: f64, kind: ConnectionKind) -> DiscoveredConnection {
        DiscoveredConnection {
            source: EntityRef::new(EntityType::Note, 1),
            target: EntityRef::new(EntityType::Note, target),
            target_title: format!("n{target}"),
            strength,
            kind,
            explanation: String::new(),
        }
    }

    #[test]
    fn aggregate_keeps_strongest_per_target() {
        let source = EntityRef::new(EntityType::Note, 1);
        let out = aggregate(
            source,
            vec![
                candidate(2, 0.4, ConnectionKind::SpatialProximity),
                candidate(2, 0.9, ConnectionKind::SemanticSimilarity),
                candidate(3, 0.5, ConnectionKind::Transitive),
            ],
            20,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target.entity_id, 2);
        assert_eq!(out[0].strength, 0.9);
        assert_eq!(out[0].kind, ConnectionKind::SemanticSimilarity);
    }

    #[test]
    fn aggregate_prefers_direct_on_ties() {
        let source = EntityRef::new(EntityType::Note, 1);
        let out = aggregate(
            source,
            vec![
                candidate(2, 1.0, ConnectionKind::SemanticSimilarity),
                candidate(2, 1.0, ConnectionKind::DirectReference),
                candidate(2, 1.0, ConnectionKind::SemanticSimilarity),
            ],
            20,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ConnectionKind::DirectReference);
    }

    #[test]
    fn aggregate_drops_self_and_truncates() {
        let source = EntityRef::new(EntityType::Note, 1);
        let found = (1..=30)
            .map(|i| candidate(i, i as f64 / 100.0, ConnectionKind::SemanticSimilarity))
            .collect();
        let out = aggregate(source, found, 20);
        assert_eq!(out.len(), 20);
        assert!(out.iter().all(|c| c.target != source));
        assert_eq!(out[0].target.entity_id, 30);
        assert!(out.windows(2).all(|w| w[0].strength >= w[1].strength));
    }
}
